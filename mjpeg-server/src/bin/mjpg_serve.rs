//! MJPEG fan-out server for one frame source.

use anyhow::{Context, Result};
use clap::Parser;
use mjpeg_server::acquisition;
use mjpeg_server::args::{ServerArgs, SourceArgs};
use mjpeg_server::{MjpegServer, StreamState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a camera or stream as MJPEG over HTTP")]
struct Args {
    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    server: ServerArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = args.server.settings().context("Invalid server settings")?;

    let spec = args.source.spec();
    info!("Opening frame source {spec}...");
    let source = tokio::task::spawn_blocking(move || frame_source::open_source(&spec))
        .await
        .context("Source open task panicked")?
        .context("Failed to open frame source")?;
    info!("Frame source ready: {}", source.name());

    let state = StreamState::new(&settings, source);
    let server = MjpegServer::bind(settings.socket_addr(), state.clone()).await?;

    if settings.eager_acquisition {
        acquisition::ensure_started(&state);
    }

    tokio::select! {
        _ = server.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
        }
    }

    if let Err(e) = state.release_source() {
        warn!("Failed to release frame source: {e}");
    }
    Ok(())
}
