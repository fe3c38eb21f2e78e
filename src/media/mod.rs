pub mod mjpeg;
pub mod sink;
pub mod video;

pub use sink::{ImageFileSink, MjpegSink, SnapshotSink, VideoFileSink};

use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbImage;
use video_rs::{Decoder, Frame, Location, Url};

use crate::error::{Error, Result};

/// Initialises the video backend. Call once before opening any source.
pub fn init() -> Result<()> {
    video_rs::init()?;
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Error);
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub enum MediaDescriptor {
    Stream(Url),
    File(PathBuf),
}

impl MediaDescriptor {
    /// Anything with a scheme is treated as a network stream, everything else
    /// as a file or capture device such as `/dev/video0`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.contains("://") {
            raw.parse::<Url>()
                .map(MediaDescriptor::Stream)
                .map_err(|err| Error::Other(format!("invalid stream url {raw}: {err}")))
        } else {
            Ok(MediaDescriptor::File(PathBuf::from(raw)))
        }
    }
}

impl fmt::Display for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MediaDescriptor::File(path) => write!(f, "file: {}", path.display()),
            MediaDescriptor::Stream(url) => write!(f, "stream: {}", url),
        }
    }
}

impl From<MediaDescriptor> for Location {
    fn from(descriptor: MediaDescriptor) -> Self {
        match descriptor {
            MediaDescriptor::File(path) => Location::File(path),
            MediaDescriptor::Stream(url) => Location::Network(url),
        }
    }
}

/// A source that yields exactly one frame: the decoded image at `path`.
pub fn still_image(path: &Path) -> impl Iterator<Item = Result<RgbImage>> {
    let frame = image::open(path).map(|img| img.into_rgb8()).map_err(Error::from);
    std::iter::once(frame)
}

/// Decoded frames of a video file, network stream, or capture device. The
/// underlying handle is released when the source is dropped.
pub struct VideoSource {
    decoder: Decoder,
    descriptor: MediaDescriptor,
    done: bool,
}

impl VideoSource {
    pub const DEFAULT_FRAME_RATE: f32 = 30.0;

    pub fn open(descriptor: MediaDescriptor) -> Result<Self> {
        tracing::debug!(%descriptor, "opening video source");
        let decoder = Decoder::new(Location::from(descriptor.clone()))?;
        let (width, height) = decoder.size();
        tracing::info!(%descriptor, width, height, fps = decoder.frame_rate(), "opened video source");
        Ok(Self {
            decoder,
            descriptor,
            done: false,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        self.decoder.size()
    }

    /// Falls back to 30 when the container does not say.
    pub fn frame_rate(&self) -> f32 {
        let fps = self.decoder.frame_rate();
        if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            Self::DEFAULT_FRAME_RATE
        }
    }
}

impl Iterator for VideoSource {
    type Item = Result<RgbImage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decoder.decode() {
            Ok((_timestamp, frame)) => Some(frame_to_image(&frame)),
            Err(video_rs::Error::DecodeExhausted) | Err(video_rs::Error::ReadExhausted) => {
                tracing::debug!(descriptor = %self.descriptor, "video source exhausted");
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err.into()))
            }
        }
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        tracing::trace!(descriptor = %self.descriptor, "releasing video source");
    }
}

pub fn frame_to_image(frame: &Frame) -> Result<RgbImage> {
    let (height, width, channels) = frame.dim();
    if channels != 3 {
        return Err(Error::Other(format!("expected an rgb frame, got {channels} channels")));
    }
    let raw = match frame.as_slice() {
        Some(slice) => slice.to_vec(),
        None => frame.iter().copied().collect(),
    };
    RgbImage::from_raw(width as u32, height as u32, raw)
        .ok_or_else(|| Error::Other("frame buffer does not match its dimensions".to_string()))
}

pub fn image_to_frame(image: RgbImage) -> Result<Frame> {
    let (width, height) = image.dimensions();
    Frame::from_shape_vec((height as usize, width as usize, 3), image.into_raw())
        .map_err(|err| Error::Other(format!("cannot shape frame: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_descriptor_parse() {
        assert_eq!(
            MediaDescriptor::parse("/dev/video0").unwrap(),
            MediaDescriptor::File(PathBuf::from("/dev/video0"))
        );
        match MediaDescriptor::parse("rtsp://10.0.0.2:554/cam").unwrap() {
            MediaDescriptor::Stream(url) => assert_eq!(url.scheme(), "rtsp"),
            other => panic!("unexpected {other}"),
        }
        assert!(MediaDescriptor::parse("rtsp://[bad").is_err());
    }

    #[test]
    fn test_frame_conversion_keeps_pixels() {
        let mut image = RgbImage::new(5, 3);
        image.put_pixel(4, 2, Rgb([1, 2, 3]));
        image.put_pixel(0, 1, Rgb([9, 8, 7]));
        let frame = image_to_frame(image.clone()).unwrap();
        assert_eq!(frame.dim(), (3, 5, 3));
        assert_eq!(frame[[2, 4, 2]], 3);
        assert_eq!(frame_to_image(&frame).unwrap(), image);
    }

    #[test]
    fn test_still_image_yields_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("car.png");
        RgbImage::new(16, 12).save(&path).unwrap();
        let frames: Vec<_> = still_image(&path).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().dimensions(), (16, 12));
    }

    #[test]
    fn test_still_image_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        let frames: Vec<_> = still_image(&path).collect();
        assert!(frames[0].is_err());
    }
}
