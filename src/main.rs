use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dentcam::app::config::AppConfig;
use dentcam::app::App;

/// Car damage detection over uploads and a live camera feed.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// YAML config file; built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("loading config")?;
    tracing::debug!(?config, "loaded config");

    let app = App::start(config).await.map_err(|err| anyhow::anyhow!("starting dentcam: {err}"))?;
    tracing::info!("dentcam ready on http://{}", app.local_addr());

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    app.stop().await;
    Ok(())
}
