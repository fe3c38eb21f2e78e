use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use image::RgbImage;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::app::config::AppConfig;
use crate::app::views::{self, OutputMedia};
use crate::error::{Error, Result};
use crate::media::{self, mjpeg, ImageFileSink, MediaDescriptor, MjpegSink, SnapshotSink, VideoFileSink, VideoSource};
use crate::pipeline::{self, summarize_records, DetectorHandle, PipelineOptions, PipelineStats};
use crate::record::Origin;
use crate::store::StoreHandle;

pub type Frames = Box<dyn Iterator<Item = Result<RgbImage>>>;

/// Opens the live camera. Called on the blocking thread that will consume the
/// frames, so the returned source never crosses threads.
pub type CameraOpener = Arc<dyn Fn() -> Result<Frames> + Send + Sync>;

pub fn open_camera(descriptor: MediaDescriptor) -> CameraOpener {
    Arc::new(move || Ok(Box::new(VideoSource::open(descriptor.clone())?) as Frames))
}

#[derive(Clone)]
pub struct AppHandler {
    config: Arc<AppConfig>,
    store: StoreHandle,
    detector: DetectorHandle,
    camera: CameraOpener,
    shutdown: CancellationToken,
}

impl AppHandler {
    /// Parts queued for a live-feed client before the capture loop blocks.
    const MAX_QUEUED_PARTS: usize = 2;

    /// `shutdown` is the server's graceful-shutdown token; live feeds end
    /// their streams once it is cancelled.
    pub fn new(
        config: Arc<AppConfig>,
        store: StoreHandle,
        detector: DetectorHandle,
        camera: CameraOpener,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            detector,
            camera,
            shutdown,
        }
    }

    pub fn router(self) -> Router {
        let static_dir = self.config.storage.static_dir.clone();
        let max_upload_bytes = self.config.server.max_upload_bytes;
        Router::new()
            .route("/", get(index))
            .route("/upload", post(upload))
            .route("/live_feed", get(live_feed))
            .route("/detected_dents", get(detected_dents))
            .nest_service("/static", ServeDir::new(static_dir))
            .layer(DefaultBodyLimit::max(max_upload_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    fn options(&self, origin: Origin) -> PipelineOptions {
        PipelineOptions {
            threshold: self.config.detector.threshold,
            origin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Image,
    Video,
}

impl UploadKind {
    fn from_filename(filename: &str) -> Option<Self> {
        let (_, extension) = filename.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" => Some(UploadKind::Image),
            "mp4" => Some(UploadKind::Video),
            _ => None,
        }
    }
}

/// Reduces a client-supplied name to something safe to join onto the uploads
/// dir: path separators and whitespace become `_`, anything outside
/// `[A-Za-z0-9._-]` is dropped, leading and trailing `.`/`_` are trimmed.
pub fn secure_filename(raw: &str) -> String {
    let spaced = raw.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Browser path for a file under the static dir, if it is under it.
fn static_url(static_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(static_dir).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("/static/{}", parts.join("/")))
}

async fn index() -> Html<String> {
    Html(views::index_page())
}

async fn upload(State(handler): State<AppHandler>, mut multipart: Multipart) -> Result<Response> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await?;
            upload = Some((filename, data));
            break;
        }
    }

    let Some((raw_name, data)) = upload else {
        tracing::debug!("upload without a file field");
        return Ok(Redirect::to("/").into_response());
    };
    let filename = secure_filename(&raw_name);
    if filename.is_empty() {
        tracing::debug!(%raw_name, "upload without a usable filename");
        return Ok(Redirect::to("/").into_response());
    }
    let Some(kind) = UploadKind::from_filename(&filename) else {
        tracing::warn!(%filename, "rejecting upload with unsupported extension");
        return Err(Error::Unsupported(filename));
    };

    let uploads_dir = &handler.config.storage.uploads_dir;
    let input = uploads_dir.join(&filename);
    let output = uploads_dir.join(format!("output_{filename}"));
    tokio::fs::write(&input, &data).await?;
    tracing::info!(path = %input.display(), bytes = data.len(), ?kind, "saved upload");

    let options = handler.options(Origin::file(&input));
    let detector = handler.detector.clone();
    let store = handler.store.clone();
    let job = {
        let input = input.clone();
        let output = output.clone();
        move || process_upload(kind, &input, &output, detector, store, &options)
    };
    let stats = tokio::task::spawn_blocking(job).await??;
    tracing::info!(path = %output.display(), frames = stats.frames, detections = stats.detections, "processed upload");

    let records = handler.store.records().await?;
    let output_display = output.display().to_string();
    let url = static_url(&handler.config.storage.static_dir, &output).unwrap_or_else(|| output_display.clone());
    let media = match kind {
        UploadKind::Image => OutputMedia::Image { url: &url },
        UploadKind::Video => OutputMedia::Video { url: &url },
    };
    Ok(Html(views::result_page(&output_display, media, &records)).into_response())
}

fn process_upload(
    kind: UploadKind,
    input: &Path,
    output: &Path,
    mut detector: DetectorHandle,
    mut store: StoreHandle,
    options: &PipelineOptions,
) -> Result<PipelineStats> {
    match kind {
        UploadKind::Image => pipeline::run(
            media::still_image(input),
            &mut detector,
            &mut store,
            ImageFileSink::new(output),
            options,
        ),
        UploadKind::Video => {
            let source = VideoSource::open(MediaDescriptor::File(input.to_path_buf()))?;
            let sink = VideoFileSink::new(output, source.frame_rate());
            pipeline::run(source, &mut detector, &mut store, sink, options)
        }
    }
}

async fn live_feed(State(handler): State<AppHandler>) -> Result<Response> {
    let (part_tx, part_rx) = mpsc::channel(AppHandler::MAX_QUEUED_PARTS);
    let (opened_tx, opened_rx) = oneshot::channel::<Result<()>>();

    let options = handler.options(Origin::LiveFeed);
    let quality = handler.config.camera.jpeg_quality;
    let snapshot_dir: Option<PathBuf> = handler
        .config
        .camera
        .save_snapshots
        .then(|| handler.config.storage.live_dir.clone());
    let camera = handler.camera.clone();
    let mut detector = handler.detector.clone();
    let mut store = handler.store.clone();
    let shutdown = handler.shutdown.clone();

    tokio::task::spawn_blocking(move || {
        // The response is only committed once the first frame has been read.
        let first = (*camera)().and_then(|mut frames| match frames.next() {
            Some(Ok(frame)) => Ok((frame, frames)),
            Some(Err(err)) => Err(err),
            None => Err(Error::Other("camera produced no frames".to_string())),
        });
        let (first, rest) = match first {
            Ok(first) => first,
            Err(err) => {
                let _ = opened_tx.send(Err(err));
                return;
            }
        };
        let _ = opened_tx.send(Ok(()));
        let frames = std::iter::once(Ok(first)).chain(rest);
        let sink = MjpegSink::new(part_tx, quality, shutdown);
        let result = match snapshot_dir {
            Some(dir) => pipeline::run(frames, &mut detector, &mut store, SnapshotSink::new(sink, &dir), &options),
            None => pipeline::run(frames, &mut detector, &mut store, sink, &options),
        };
        if let Err(err) = result {
            tracing::error!(%err, "live feed stopped");
        }
    });

    opened_rx
        .await
        .map_err(|_| Error::Other("camera worker exited before reading a frame".to_string()))??;
    tracing::info!(device = %handler.config.camera.device, "streaming live feed");

    let body = Body::from_stream(ReceiverStream::new(part_rx).map(Ok::<_, Infallible>));
    Ok(([(header::CONTENT_TYPE, mjpeg::CONTENT_TYPE)], body).into_response())
}

async fn detected_dents(State(handler): State<AppHandler>) -> Result<Html<String>> {
    let records = handler.store.records().await?;
    let summary = summarize_records(&records);
    Ok(Html(views::log_page(&records, &summary)))
}
