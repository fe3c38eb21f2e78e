use image::RgbImage;

use crate::error::Result;
use crate::pipeline::annotate::draw_detection;
use crate::pipeline::detector::{Detection, Detector};
use crate::record::{round_confidence, DamageKind, DetectionRecord, Origin};
use crate::store::StoreHandle;

/// Destination for detection records produced while annotating.
pub trait RecordSink {
    fn record(&mut self, record: DetectionRecord) -> Result<()>;
}

impl RecordSink for StoreHandle {
    fn record(&mut self, record: DetectionRecord) -> Result<()> {
        self.append_blocking(record)
    }
}

impl RecordSink for Vec<DetectionRecord> {
    fn record(&mut self, record: DetectionRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Where annotated frames go.
pub trait FrameSink {
    /// Takes one annotated frame. `Flow::Stop` ends the run early, e.g. when
    /// the receiving side has gone away.
    fn emit(&mut self, frame: &RgbImage, detections: usize) -> Result<Flow>;

    fn finish(self) -> Result<()>
    where
        Self: Sized;
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub threshold: f64,
    pub origin: Origin,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: usize,
    pub detections: usize,
}

/// Draws and records every detection scoring above `threshold` once rounded
/// to two decimals. Everything else is dropped without a trace. Returns the
/// number of detections kept.
pub fn annotate_detections<R: RecordSink + ?Sized>(
    frame: &mut RgbImage,
    detections: &[Detection],
    threshold: f64,
    origin: &Origin,
    recorder: &mut R,
) -> Result<usize> {
    let mut kept = 0;
    for det in detections {
        let confidence = round_confidence(det.score);
        if confidence.is_nan() || confidence <= threshold {
            continue;
        }
        let Some(kind) = DamageKind::from_index(det.class_index) else {
            tracing::warn!(class_index = det.class_index, "model returned an unknown class; skipping");
            continue;
        };
        draw_detection(frame, det, &format!("{} {:.2}", kind, confidence));
        recorder.record(DetectionRecord::new(kind, confidence, origin.clone()))?;
        kept += 1;
    }
    Ok(kept)
}

/// Acquire, infer, threshold, annotate, record, emit; for every frame `frames`
/// yields until it runs dry or `sink` asks to stop.
pub fn run<I, D, R, S>(
    frames: I,
    detector: &mut D,
    recorder: &mut R,
    mut sink: S,
    options: &PipelineOptions,
) -> Result<PipelineStats>
where
    I: IntoIterator<Item = Result<RgbImage>>,
    D: Detector + ?Sized,
    R: RecordSink + ?Sized,
    S: FrameSink,
{
    let mut stats = PipelineStats::default();
    for frame in frames {
        let mut frame = frame?;
        let detections = detector.detect(&frame)?;
        let kept = annotate_detections(&mut frame, &detections, options.threshold, &options.origin, recorder)?;
        stats.frames += 1;
        stats.detections += kept;
        tracing::trace!(frame = stats.frames, raw = detections.len(), kept, "processed frame");
        if sink.emit(&frame, kept)? == Flow::Stop {
            tracing::debug!(origin = %options.origin, "sink closed; stopping");
            break;
        }
    }
    sink.finish()?;
    tracing::info!(origin = %options.origin, frames = stats.frames, detections = stats.detections, "pipeline finished");
    Ok(stats)
}
