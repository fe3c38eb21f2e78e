pub mod config;
pub mod handler;
pub mod views;

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::config::{AppConfig, Storage};
use crate::app::handler::{open_camera, AppHandler};
use crate::media::{self, MediaDescriptor};
use crate::pipeline::{Detector, DetectorHandle, TFLiteStage};
use crate::store::DetectionStore;

macro_rules! handle_err {
    ($stop:ident, $expr:expr) => {
        match $expr {
            Ok(ret) => Ok(ret),
            Err(err) => {
                $stop.cancel();
                Err(err)
            }
        }
    };
}

pub struct App {
    server: JoinHandle<()>,
    store: DetectionStore,
    /// Graceful shutdown of the http server, live feeds included.
    shutdown: CancellationToken,
    /// Stops the detection store; only cancelled once the server is done.
    stop: CancellationToken,
    local_addr: SocketAddr,
}

impl App {
    pub async fn start(config: AppConfig) -> Result<App, Box<dyn Error>> {
        let stop = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let config = Arc::new(config);

        prepare_dirs(&config.storage).await?;
        media::init()?;
        let camera = MediaDescriptor::parse(&config.camera.device)?;
        tracing::info!(%config.camera, "using camera");

        let store = DetectionStore::open(&config.storage.log_file, stop.clone()).await?;
        let detector = handle_err!(stop, initialize_detector(&config).await)?;

        let handler = AppHandler::new(config.clone(), store.handle(), detector, open_camera(camera), shutdown.clone());
        let (server, local_addr) = handle_err!(stop, initialize_server(&config, handler, shutdown.clone()).await)?;

        Ok(Self {
            server,
            store,
            shutdown,
            stop,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Drains in-flight requests before the store goes away, so uploads being
    /// processed still get their records written.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
        self.stop.cancel();
        self.store.join().await;
        tracing::debug!("app stopped");
    }
}

/// Creates the uploads and live-detections dirs if they do not exist yet.
pub async fn prepare_dirs(storage: &Storage) -> std::io::Result<()> {
    for dir in [&storage.static_dir, &storage.uploads_dir, &storage.live_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }
    Ok(())
}

async fn initialize_detector(config: &AppConfig) -> crate::error::Result<DetectorHandle> {
    let detector_config = config.detector.clone();
    DetectorHandle::spawn(move || {
        let stage = TFLiteStage::new(&detector_config)?;
        Ok(Box::new(stage) as Box<dyn Detector>)
    })
    .await
}

async fn initialize_server(
    config: &AppConfig,
    handler: AppHandler,
    shutdown: CancellationToken,
) -> Result<(JoinHandle<()>, SocketAddr), Box<dyn Error>> {
    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "listening");

    let router = handler.router();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if let Err(err) = result {
            tracing::error!(%err, "http server failed");
        }
    });
    Ok((server, local_addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DamageKind, DetectionRecord, Origin};

    #[tokio::test]
    async fn test_stop_drains_server_before_closing_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detected_dents.json");
        let stop = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let store = DetectionStore::open(&path, stop.clone()).await.unwrap();

        // stands in for a request that is still writing records while the
        // server shuts down
        let handle = store.handle();
        let draining = shutdown.clone();
        let server = tokio::spawn(async move {
            draining.cancelled().await;
            tokio::task::yield_now().await;
            handle
                .append(DetectionRecord::new(DamageKind::DoorouterDent, 0.8, Origin::LiveFeed))
                .await
                .unwrap();
        });

        let app = App {
            server,
            store,
            shutdown,
            stop,
            local_addr: "127.0.0.1:0".parse().unwrap(),
        };
        app.stop().await;

        let on_disk: Vec<DetectionRecord> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0].kind, DamageKind::DoorouterDent);
    }
}
