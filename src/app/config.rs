use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use config::{Config, ConfigError};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: Server,
    pub storage: Storage,
    pub detector: DetectorConfig,
    pub camera: Camera,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Storage {
    /// Served under `/static`; the other two dirs are expected inside it.
    pub static_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub live_dir: PathBuf,
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_filename: PathBuf,
    pub num_threads: u8,
    pub threshold: f64,
    pub min_score: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub device: String,
    pub save_snapshots: bool,
    pub jpeg_quality: u8,
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "camera {}, jpeg quality {}, snapshots {}",
            self.device,
            self.jpeg_quality,
            if self.save_snapshots { "on" } else { "off" }
        )
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("static"),
            uploads_dir: PathBuf::from("static/uploads"),
            live_dir: PathBuf::from("static/live_detections"),
            log_file: PathBuf::from("detected_dents.json"),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_filename: PathBuf::from("Weights/best.tflite"),
            num_threads: 2,
            threshold: 0.3,
            min_score: 0.0,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            save_snapshots: false,
            jpeg_quality: 80,
        }
    }
}

impl AppConfig {
    pub const ENV_PREFIX: &'static str = "DENTCAM";

    /// Defaults, overlaid with `path` when given, overlaid with
    /// `DENTCAM__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(config::Environment::with_prefix(Self::ENV_PREFIX).prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()
    }
}
