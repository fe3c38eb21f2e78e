use axum::body::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::Result;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(frame)?;
    Ok(jpeg)
}

/// One part of a `multipart/x-mixed-replace` stream carrying a single JPEG.
pub fn part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut out = Vec::with_capacity(header.len() + jpeg.len() + 2);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\r\n");
    Bytes::from(out)
}

/// Splits a concatenated stream back into the JPEG payloads it carries.
#[cfg(test)]
pub(crate) fn split_parts(stream: &[u8]) -> Vec<&[u8]> {
    let delimiter = format!("--{BOUNDARY}\r\n");
    let delimiter = delimiter.as_bytes();
    let mut starts = Vec::new();
    let mut i = 0;
    while i + delimiter.len() <= stream.len() {
        if &stream[i..i + delimiter.len()] == delimiter {
            starts.push(i);
            i += delimiter.len();
        } else {
            i += 1;
        }
    }
    starts
        .iter()
        .enumerate()
        .filter_map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(stream.len());
            let chunk = &stream[start + delimiter.len()..end];
            let body = chunk.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
            let payload = &chunk[body..];
            Some(payload.strip_suffix(b"\r\n").unwrap_or(payload))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_framing() {
        let bytes = part(b"JPEGDATA");
        assert_eq!(
            &bytes[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n".as_slice()
        );
    }

    #[test]
    fn test_split_parts_recovers_payloads() {
        let mut stream = Vec::new();
        for payload in [b"one".as_slice(), b"two", b"three"] {
            stream.extend_from_slice(&part(payload));
        }
        assert_eq!(split_parts(&stream), vec![b"one".as_slice(), b"two", b"three"]);
    }

    #[test]
    fn test_encode_jpeg_is_decodable() {
        let jpeg = encode_jpeg(&RgbImage::new(32, 16), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }
}
