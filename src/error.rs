use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("video error: {0}")]
    Video(#[from] video_rs::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("detection log {path} is corrupt: {source}")]
    CorruptLog {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("detection store is no longer running")]
    StoreGone,

    #[error("detector is no longer running")]
    DetectorGone,

    #[error("bad upload: {0}")]
    Upload(#[from] axum::extract::multipart::MultipartError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

impl From<tflite::Error> for Error {
    fn from(err: tflite::Error) -> Self {
        Error::Model(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::Upload(err) => err.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
