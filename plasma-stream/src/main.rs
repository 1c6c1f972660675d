//! plasma-stream entry point.
//!
//! ```text
//! plasma-stream --udid <ID>                Emit the multipart stream on stdout
//! plasma-stream --udid <ID> --port 8787    Serve MJPEG over loopback HTTP instead
//! plasma-stream --udid <ID> --port 0       Serve MJPEG on an OS-assigned port
//! ```
//!
//! Diagnostics go to stderr only; stdout is reserved for the stream
//! body, which the embedding app reads directly from this process.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use plasma_core::server::{self, SessionStats, StreamServer};
use plasma_core::{CaptureConfig, CaptureSession, FrameBuffer, PipeOptions};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "plasma-stream", about = "Simulator screen capture served as MJPEG over HTTP or stdout")]
struct Cli {
    /// Capture target (simulator UDID).
    #[arg(long)]
    udid: String,

    /// Target frames per second (clamped to 1..=120).
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// JPEG quality (clamped to 0.1..=1.0).
    #[arg(long, default_value_t = 0.7)]
    quality: f32,

    /// Serve over loopback HTTP on this port (0 = OS-assigned) instead
    /// of emitting the stream on stdout.
    #[arg(long)]
    port: Option<u16>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = CaptureConfig::new(cli.fps, cli.quality);
    let pipe = PipeOptions::from_env();

    info!("plasma-stream v{}", env!("CARGO_PKG_VERSION"));
    info!("target: {}", cli.udid);
    info!("fps: {}, quality: {}", config.fps, config.quality);

    // The standalone tool has no host-supplied surface feed or hardware
    // encode service; the backend chain starts at the subprocess.
    let buffer = Arc::new(FrameBuffer::new());
    let session =
        CaptureSession::start(&cli.udid, config, Arc::clone(&buffer), None, None, &pipe).await?;
    let source = session.info();
    info!(
        "capturing {}x{} via '{}' backend",
        source.width, source.height, source.backend
    );

    // Ctrl-C → stop capture; the select below then winds everything down.
    let stop = session.stop_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    let capture = tokio::spawn(session.run());

    if let Some(port) = cli.port {
        let server = StreamServer::bind(port, Arc::clone(&buffer)).await?;
        info!("stream url: http://{}/", server.local_addr()?);
        tokio::select! {
            res = server.run() => res?,
            res = capture => res??,
        }
    } else {
        // Default mode: HTTP status line and headers once, then the
        // multipart body straight to stdout.
        let mut out = tokio::io::stdout();
        out.write_all(server::stream_response_header().as_bytes())
            .await?;
        let mut stats = SessionStats::default();
        tokio::select! {
            res = server::stream_frames(&mut out, &buffer, &mut stats) => res?,
            res = capture => res??,
        }
    }

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
