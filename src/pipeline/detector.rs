use std::thread;

use image::RgbImage;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// One model output, in pixel coordinates of the frame it was run on.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
    pub score: f32,
    pub class_index: usize,
}

pub type Detections = Vec<Detection>;

pub trait Detector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Detections>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Detections> {
        (**self).detect(frame)
    }
}

struct DetectRequest {
    frame: RgbImage,
    reply: oneshot::Sender<Result<Detections>>,
}

/// Cloneable front for a model that lives on its own thread.
///
/// Model runtimes generally hold raw pointers and cannot cross threads, so the
/// model is built by `factory` on the worker thread and never leaves it. Every
/// request is answered in submission order, one at a time.
#[derive(Clone)]
pub struct DetectorHandle {
    request_tx: mpsc::Sender<DetectRequest>,
}

impl DetectorHandle {
    const MAX_QUEUED_FRAMES: usize = 4;

    pub async fn spawn<F>(factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn Detector>> + Send + 'static,
    {
        let (request_tx, mut request_rx) = mpsc::channel::<DetectRequest>(Self::MAX_QUEUED_FRAMES);
        let (ready_tx, ready_rx) = oneshot::channel();

        thread::Builder::new()
            .name("detector".to_string())
            .spawn(move || {
                let mut detector = match factory() {
                    Ok(detector) => {
                        let _ = ready_tx.send(Ok(()));
                        detector
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                tracing::debug!("detector ready");
                while let Some(request) = request_rx.blocking_recv() {
                    let _ = request.reply.send(detector.detect(&request.frame));
                }
                tracing::debug!("detector stopped");
            })?;

        ready_rx.await.map_err(|_| Error::DetectorGone)??;
        Ok(Self { request_tx })
    }
}

impl Detector for DetectorHandle {
    /// Blocks the calling thread; use from blocking contexts only.
    fn detect(&mut self, frame: &RgbImage) -> Result<Detections> {
        let (reply, reply_rx) = oneshot::channel();
        self.request_tx
            .blocking_send(DetectRequest {
                frame: frame.clone(),
                reply,
            })
            .map_err(|_| Error::DetectorGone)?;
        reply_rx.blocking_recv().map_err(|_| Error::DetectorGone)?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns the same detections for every frame.
    pub struct FixedDetector(pub Detections);

    impl Detector for FixedDetector {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Detections> {
            Ok(self.0.clone())
        }
    }

    pub fn det(class_index: usize, score: f32) -> Detection {
        Detection {
            xmin: 4,
            ymin: 20,
            xmax: 40,
            ymax: 50,
            score,
            class_index,
        }
    }

    #[tokio::test]
    async fn test_handle_forwards_to_worker() {
        let handle = DetectorHandle::spawn(|| Ok(Box::new(FixedDetector(vec![det(3, 0.8)])) as Box<dyn Detector>))
            .await
            .unwrap();
        let dets = tokio::task::spawn_blocking(move || {
            let mut handle = handle;
            handle.detect(&RgbImage::new(8, 8))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(dets, vec![det(3, 0.8)]);
    }

    #[tokio::test]
    async fn test_factory_error_is_reported() {
        let err = DetectorHandle::spawn(|| Err(Error::Model("no such model".to_string())))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Model(_)));
    }
}
