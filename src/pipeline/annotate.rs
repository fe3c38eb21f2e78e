use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::pipeline::detector::Detection;

pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
pub const LABEL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const CORNER_LENGTH: i32 = 30;
const CORNER_THICKNESS: i32 = 2;
const GLYPH_SIZE: i32 = 8;
const GLYPH_SCALE: i32 = 2;
const LABEL_PADDING: i32 = 4;
// label baseline sits this far above the box
const LABEL_OFFSET: i32 = 10;

/// Draws the box and its label plate onto `frame`.
pub fn draw_detection(frame: &mut RgbImage, det: &Detection, label: &str) {
    if frame.width() == 0 || frame.height() == 0 {
        return;
    }
    draw_box(frame, det);
    draw_label(frame, det.xmin, det.ymin - LABEL_OFFSET, label);
}

fn draw_box(frame: &mut RgbImage, det: &Detection) {
    let (x0, x1) = (det.xmin.min(det.xmax), det.xmin.max(det.xmax));
    let (y0, y1) = (det.ymin.min(det.ymax), det.ymin.max(det.ymax));
    let w = x1 - x0 + 1;
    let h = y1 - y0 + 1;
    draw_hollow_rect_mut(frame, Rect::at(x0, y0).of_size(w as u32, h as u32), BOX_COLOR);

    let l = CORNER_LENGTH.min(w).min(h).max(1);
    let t = CORNER_THICKNESS.min(w).min(h).max(1);
    let bars = [
        // top-left
        (x0, y0, l, t),
        (x0, y0, t, l),
        // top-right
        (x1 - l + 1, y0, l, t),
        (x1 - t + 1, y0, t, l),
        // bottom-left
        (x0, y1 - t + 1, l, t),
        (x0, y1 - l + 1, t, l),
        // bottom-right
        (x1 - l + 1, y1 - t + 1, l, t),
        (x1 - t + 1, y1 - l + 1, t, l),
    ];
    for (x, y, bw, bh) in bars {
        draw_filled_rect_mut(frame, Rect::at(x, y).of_size(bw as u32, bh as u32), BOX_COLOR);
    }
}

/// Filled plate with `text` whose baseline is at (`x`, `baseline`), nudged
/// back inside the frame when it would fall off an edge.
fn draw_label(frame: &mut RgbImage, x: i32, baseline: i32, text: &str) {
    let text_width = text.chars().count() as i32 * GLYPH_SIZE * GLYPH_SCALE;
    let text_height = GLYPH_SIZE * GLYPH_SCALE;
    let plate_width = text_width + 2 * LABEL_PADDING;
    let plate_height = text_height + 2 * LABEL_PADDING;

    let frame_width = frame.width() as i32;
    let frame_height = frame.height() as i32;
    let mut left = x - LABEL_PADDING;
    let mut top = baseline - text_height - LABEL_PADDING;
    if left + plate_width > frame_width {
        left = frame_width - plate_width;
    }
    if top + plate_height > frame_height {
        top = frame_height - plate_height;
    }
    left = left.max(0);
    top = top.max(0);

    draw_filled_rect_mut(
        frame,
        Rect::at(left, top).of_size(plate_width as u32, plate_height as u32),
        LABEL_COLOR,
    );

    let mut pen_x = left + LABEL_PADDING;
    let pen_y = top + LABEL_PADDING;
    for c in text.chars() {
        let glyph = BASIC_FONTS.get(c).or_else(|| BASIC_FONTS.get('?')).unwrap_or([0; 8]);
        draw_glyph(frame, &glyph, pen_x, pen_y);
        pen_x += GLYPH_SIZE * GLYPH_SCALE;
    }
}

fn draw_glyph(frame: &mut RgbImage, glyph: &[u8; 8], x: i32, y: i32) {
    for (row, bits) in glyph.iter().enumerate() {
        for col in 0..GLYPH_SIZE {
            if bits & (1 << col) == 0 {
                continue;
            }
            let px = x + col * GLYPH_SCALE;
            let py = y + row as i32 * GLYPH_SCALE;
            draw_filled_rect_mut(
                frame,
                Rect::at(px, py).of_size(GLYPH_SCALE as u32, GLYPH_SCALE as u32),
                TEXT_COLOR,
            );
        }
    }
}
