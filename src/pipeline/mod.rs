pub mod annotate;

pub mod detector;
pub use detector::Detection;
pub use detector::Detections;
pub use detector::Detector;
pub use detector::DetectorHandle;

mod tflite;
pub use self::tflite::TFLiteStage;

mod frame;
pub use frame::{annotate_detections, run};
pub use frame::{Flow, FrameSink, PipelineOptions, PipelineStats, RecordSink};

mod summarize;
pub use summarize::DetectionSummary;
pub use summarize::summarize_records;
