use std::cmp::{max, min};

use image::imageops::{self, FilterType};
use image::RgbImage;
use tflite::ops::builtin::BuiltinOpResolver;
use tflite::Interpreter;
use tflite::{FlatBufferModel, InterpreterBuilder};

use crate::app::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::pipeline::detector::{Detection, Detections, Detector};

/// A TensorFlow Lite detection model with SSD-style post-processing outputs
/// (boxes, classes, scores, count).
pub struct TFLiteStage<'a> {
    interpreter: Interpreter<'a, BuiltinOpResolver>,
    min_score: f32,
    width: u32,
    height: u32,
}

impl<'a> TFLiteStage<'a> {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let model = FlatBufferModel::build_from_file(&config.model_filename)?;
        let resolver = BuiltinOpResolver::default();
        let builder = InterpreterBuilder::new(model, resolver)?;
        let mut interpreter = builder.build()?;
        interpreter.allocate_tensors()?;

        if interpreter.inputs().len() != 1 {
            return Err(Error::Model(format!(
                "expected one input tensor, model has {}",
                interpreter.inputs().len()
            )));
        }
        let tinfos = interpreter.get_input_details()?;
        let dims = &tinfos[0].dims;
        if dims.len() != 4 || dims[3] != 3 {
            return Err(Error::Model(format!("expected a 1xHxWx3 input, model has {:?}", dims)));
        }
        let height = dims[1] as u32;
        let width = dims[2] as u32;

        if interpreter.outputs().len() != 4 {
            return Err(Error::Model(format!(
                "expected 4 output tensors (boxes, classes, scores, count), model has {}",
                interpreter.outputs().len()
            )));
        }

        interpreter.set_num_threads(config.num_threads as i32);
        tracing::info!(model = %config.model_filename.display(), width, height, "loaded detection model");

        Ok(Self {
            interpreter,
            min_score: config.min_score,
            width,
            height,
        })
    }

    fn load_input(&mut self, frame: &RgbImage) -> Result<()> {
        let resized = if frame.dimensions() == (self.width, self.height) {
            frame.clone()
        } else {
            imageops::resize(frame, self.width, self.height, FilterType::Triangle)
        };
        let rgb_bytes = resized.as_raw();

        let input_index = self.interpreter.inputs()[0];
        let quantized = self.interpreter.tensor_data::<u8>(input_index).is_ok();
        if quantized {
            let input: &mut [u8] = self.interpreter.tensor_data_mut(input_index)?;
            if input.len() != rgb_bytes.len() {
                return Err(Error::Model(format!(
                    "input tensor holds {} bytes, frame has {}",
                    input.len(),
                    rgb_bytes.len()
                )));
            }
            input.copy_from_slice(rgb_bytes);
        } else {
            let input: &mut [f32] = self.interpreter.tensor_data_mut(input_index)?;
            if input.len() != rgb_bytes.len() {
                return Err(Error::Model(format!(
                    "input tensor holds {} values, frame has {}",
                    input.len(),
                    rgb_bytes.len()
                )));
            }
            for (dst, src) in input.iter_mut().zip(rgb_bytes) {
                *dst = *src as f32 / 255.0;
            }
        }
        Ok(())
    }
}

impl<'a> Detector for TFLiteStage<'a> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Detections> {
        self.load_input(frame)?;
        self.interpreter.invoke()?;

        let outputs = self.interpreter.outputs().to_vec();
        let locations: &[f32] = self.interpreter.tensor_data(outputs[0])?;
        let classes: &[f32] = self.interpreter.tensor_data(outputs[1])?;
        let scores: &[f32] = self.interpreter.tensor_data(outputs[2])?;
        let raw_num_detections: &[f32] = self.interpreter.tensor_data(outputs[3])?;
        let capacity = scores.len().min(classes.len()).min(locations.len() / 4);
        let num_detections = detection_count(raw_num_detections, capacity);

        let (frame_width, frame_height) = frame.dimensions();
        Ok(decode_boxes(
            &locations[..4 * num_detections],
            &classes[..num_detections],
            &scores[..num_detections],
            frame_width,
            frame_height,
            self.min_score,
        ))
    }
}

/// Number of valid rows reported by the count tensor, capped at what the
/// other outputs actually hold. An empty or non-finite count means none.
fn detection_count(raw_num_detections: &[f32], capacity: usize) -> usize {
    match raw_num_detections.first() {
        Some(&count) if count.is_finite() && count > 0.0 => (count as usize).min(capacity),
        _ => 0,
    }
}

/// Maps normalised `[ymin, xmin, ymax, xmax]` boxes onto a `width` x `height`
/// frame, dropping anything scored at or below `min_score`.
fn decode_boxes(
    locations: &[f32],
    classes: &[f32],
    scores: &[f32],
    width: u32,
    height: u32,
    min_score: f32,
) -> Detections {
    let width = width as f32;
    let height = height as f32;
    let mut detections = Detections::new();
    for (index, (&class, &score)) in classes.iter().zip(scores).enumerate() {
        if score.is_nan() || score <= min_score || class < 0.0 {
            continue;
        }
        let ymin = max(0, (height * locations[4 * index]) as i32);
        let xmin = max(0, (width * locations[4 * index + 1]) as i32);
        let ymax = min(height as i32 - 1, (height * locations[4 * index + 2]) as i32);
        let xmax = min(width as i32 - 1, (width * locations[4 * index + 3]) as i32);
        let class_index = class as usize;
        tracing::trace!("det class {class_index} with score {score} at {xmin},{ymin} - {xmax},{ymax}");
        detections.push(Detection {
            xmin,
            ymin,
            xmax,
            ymax,
            score,
            class_index,
        });
    }
    detections
}
