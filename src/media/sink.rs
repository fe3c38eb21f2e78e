use std::path::{Path, PathBuf};

use axum::body::Bytes;
use chrono::Local;
use image::imageops::{self, FilterType};
use image::RgbImage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use video_rs::encode::{Encoder, Settings};

use crate::error::Result;
use crate::media::mjpeg;
use crate::media::video::FrameClock;
use crate::media::image_to_frame;
use crate::pipeline::{Flow, FrameSink};

/// Writes the annotated frame to `path`; the format follows the extension.
pub struct ImageFileSink {
    path: PathBuf,
    written: bool,
}

impl ImageFileSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            written: false,
        }
    }
}

impl FrameSink for ImageFileSink {
    fn emit(&mut self, frame: &RgbImage, _detections: usize) -> Result<Flow> {
        frame.save(&self.path)?;
        self.written = true;
        Ok(Flow::Continue)
    }

    fn finish(self) -> Result<()> {
        tracing::debug!(path = %self.path.display(), written = self.written, "image sink finished");
        Ok(())
    }
}

/// H.264 output video. The encoder is created from the first frame's size;
/// odd dimensions are trimmed to even ones, which yuv420p requires.
pub struct VideoFileSink {
    path: PathBuf,
    frame_rate: f32,
    encoder: Option<(Encoder, u32, u32)>,
    clock: FrameClock,
}

impl VideoFileSink {
    pub fn new(path: &Path, frame_rate: f32) -> Self {
        Self {
            path: path.to_path_buf(),
            frame_rate,
            encoder: None,
            clock: FrameClock::new(frame_rate),
        }
    }
}

impl FrameSink for VideoFileSink {
    fn emit(&mut self, frame: &RgbImage, _detections: usize) -> Result<Flow> {
        if self.encoder.is_none() {
            let width = (frame.width() & !1).max(2);
            let height = (frame.height() & !1).max(2);
            let settings = Settings::preset_h264_yuv420p(width as usize, height as usize, false);
            let encoder = Encoder::new(self.path.clone(), settings)?;
            tracing::debug!(path = %self.path.display(), width, height, fps = self.frame_rate, "opened video encoder");
            self.encoder = Some((encoder, width, height));
        }
        if let Some((encoder, width, height)) = self.encoder.as_mut() {
            let frame = if frame.dimensions() == (*width, *height) {
                frame.clone()
            } else {
                imageops::resize(frame, *width, *height, FilterType::Triangle)
            };
            encoder.encode(&image_to_frame(frame)?, self.clock.tick())?;
        }
        Ok(Flow::Continue)
    }

    fn finish(self) -> Result<()> {
        if let Some((mut encoder, _, _)) = self.encoder {
            encoder.finish()?;
            tracing::debug!(path = %self.path.display(), "video sink finished");
        }
        Ok(())
    }
}

/// Pushes every frame as one JPEG part of a `multipart/x-mixed-replace`
/// stream. Stops once the receiving half has been dropped or `shutdown` is
/// cancelled, so open streams do not hold up a graceful server shutdown.
pub struct MjpegSink {
    part_tx: mpsc::Sender<Bytes>,
    quality: u8,
    shutdown: CancellationToken,
}

impl MjpegSink {
    pub fn new(part_tx: mpsc::Sender<Bytes>, quality: u8, shutdown: CancellationToken) -> Self {
        Self {
            part_tx,
            quality,
            shutdown,
        }
    }
}

impl FrameSink for MjpegSink {
    fn emit(&mut self, frame: &RgbImage, _detections: usize) -> Result<Flow> {
        if self.shutdown.is_cancelled() {
            tracing::debug!("server shutting down; ending mjpeg stream");
            return Ok(Flow::Stop);
        }
        let jpeg = mjpeg::encode_jpeg(frame, self.quality)?;
        if self.part_tx.blocking_send(mjpeg::part(&jpeg)).is_err() {
            tracing::debug!("mjpeg client went away");
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    fn finish(self) -> Result<()> {
        Ok(())
    }
}

/// Passes frames through to `inner`, also saving a JPEG into `dir` for every
/// frame that had at least one detection.
pub struct SnapshotSink<S> {
    inner: S,
    dir: PathBuf,
    saved: usize,
}

impl<S: FrameSink> SnapshotSink<S> {
    pub fn new(inner: S, dir: &Path) -> Self {
        Self {
            inner,
            dir: dir.to_path_buf(),
            saved: 0,
        }
    }
}

impl<S: FrameSink> FrameSink for SnapshotSink<S> {
    fn emit(&mut self, frame: &RgbImage, detections: usize) -> Result<Flow> {
        if detections > 0 {
            let name = format!("live_{}_{:06}.jpg", Local::now().format("%Y%m%d_%H%M%S"), self.saved);
            let path = self.dir.join(name);
            frame.save(&path)?;
            self.saved += 1;
            tracing::trace!(path = %path.display(), detections, "saved live snapshot");
        }
        self.inner.emit(frame, detections)
    }

    fn finish(self) -> Result<()> {
        tracing::debug!(saved = self.saved, "snapshot sink finished");
        self.inner.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detector::tests::{det, FixedDetector};
    use crate::pipeline::{run, PipelineOptions};
    use crate::media::{MediaDescriptor, VideoSource};
    use crate::record::{DetectionRecord, Origin};

    fn frames(n: usize) -> Vec<Result<RgbImage>> {
        (0..n).map(|_| Ok(RgbImage::new(48, 32))).collect()
    }

    #[test]
    fn test_live_stream_yields_one_jpeg_per_frame() {
        let (part_tx, mut part_rx) = mpsc::channel(16);
        let mut detector = FixedDetector(vec![det(2, 0.75)]);
        let mut log: Vec<DetectionRecord> = Vec::new();
        let options = PipelineOptions { threshold: 0.3, origin: Origin::LiveFeed };
        let stats = run(frames(5), &mut detector, &mut log, MjpegSink::new(part_tx, 80, CancellationToken::new()), &options).unwrap();
        assert_eq!(stats.frames, 5);

        let mut stream = Vec::new();
        while let Ok(part) = part_rx.try_recv() {
            stream.extend_from_slice(&part);
        }
        let jpegs = mjpeg::split_parts(&stream);
        assert_eq!(jpegs.len(), 5);
        for jpeg in jpegs {
            let decoded = image::load_from_memory(jpeg).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (48, 32));
        }
        assert_eq!(log.len(), 5);
        assert!(log.iter().all(|r| r.file_path == Origin::LiveFeed));
    }

    #[test]
    fn test_mjpeg_sink_stops_when_client_leaves() {
        let (part_tx, part_rx) = mpsc::channel(4);
        drop(part_rx);
        let mut sink = MjpegSink::new(part_tx, 80, CancellationToken::new());
        assert_eq!(sink.emit(&RgbImage::new(8, 8), 0).unwrap(), Flow::Stop);
    }

    #[test]
    fn test_mjpeg_sink_stops_on_shutdown() {
        let (part_tx, mut part_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let mut sink = MjpegSink::new(part_tx, 80, shutdown.clone());
        assert_eq!(sink.emit(&RgbImage::new(8, 8), 0).unwrap(), Flow::Continue);
        shutdown.cancel();
        assert_eq!(sink.emit(&RgbImage::new(8, 8), 0).unwrap(), Flow::Stop);
        assert!(part_rx.try_recv().is_ok());
        assert!(part_rx.try_recv().is_err());
    }

    #[test]
    fn test_video_sink_round_trips_through_decoder() {
        crate::media::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output_clip.mp4");
        let mut sink = VideoFileSink::new(&path, 25.0);
        for shade in 0..6u8 {
            let frame = RgbImage::from_pixel(63, 47, image::Rgb([shade * 40, 80, 120]));
            assert_eq!(sink.emit(&frame, 0).unwrap(), Flow::Continue);
        }
        sink.finish().unwrap();

        let source = VideoSource::open(MediaDescriptor::File(path)).unwrap();
        assert_eq!(source.size(), (62, 46));
        assert!((source.frame_rate() - 25.0).abs() < 0.5);
        let decoded: Vec<RgbImage> = source.map(|frame| frame.unwrap()).collect();
        assert_eq!(decoded.len(), 6);
        assert!(decoded.iter().all(|frame| frame.dimensions() == (62, 46)));
    }

    #[test]
    fn test_video_sink_without_frames_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        VideoFileSink::new(&path, 30.0).finish().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_image_sink_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output_car.png");
        let mut sink = ImageFileSink::new(&path);
        sink.emit(&RgbImage::new(10, 6), 0).unwrap();
        sink.finish().unwrap();
        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (10, 6));
    }

    #[test]
    fn test_snapshot_sink_saves_only_frames_with_detections() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.png");
        let mut sink = SnapshotSink::new(ImageFileSink::new(&out), dir.path());
        sink.emit(&RgbImage::new(8, 8), 0).unwrap();
        sink.emit(&RgbImage::new(8, 8), 2).unwrap();
        sink.emit(&RgbImage::new(8, 8), 1).unwrap();
        sink.finish().unwrap();
        let snapshots = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("live_"))
            .count();
        assert_eq!(snapshots, 2);
    }
}
