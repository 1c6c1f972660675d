//! Capture session orchestration and the paced capture loop.
//!
//! A [`CaptureSession`] wires Frame Source → Frame Encoder → Frame
//! Buffer for one target. Push-driven sources encode and append from
//! inside the feed callback (arrival is already rate-limited by the
//! display refresh); pull-driven sources run a precisely paced loop:
//! coarse sleep until within ~1 ms of the deadline, then busy-wait the
//! remainder, never appending faster than the target interval.
//!
//! The session is an explicitly owned, explicitly torn-down object
//! with no ambient globals, so start/stop semantics stay testable.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::buffer::FrameBuffer;
use crate::config::{CaptureConfig, PipeOptions};
use crate::encoder::{AcceleratedFactory, FrameEncoder};
use crate::error::PlasmaError;
use crate::source::{open_source, FrameSource, Source, SourceInfo, SurfaceFeed, SurfaceSource};

/// Coarse-sleep cutoff: below this remainder the pacer busy-waits for
/// sub-millisecond accuracy.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

// ── CaptureSession ───────────────────────────────────────────────

/// One active capture pipeline: source, encoder, shared frame buffer.
///
/// Created when streaming starts for a target; torn down when it stops.
/// Frame dimensions are fixed for its lifetime. Already-connected
/// clients need no notification on teardown; their reads simply stop
/// returning new frames.
pub struct CaptureSession {
    target: String,
    source: Source,
    encoder: FrameEncoder,
    buffer: Arc<FrameBuffer>,
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    info: SourceInfo,
}

impl CaptureSession {
    /// Resolve a capture source for `target` and prepare the pipeline.
    ///
    /// Fails with [`PlasmaError::NoCaptureSource`] when every backend
    /// is unavailable; the session never partially starts.
    pub async fn start(
        target: &str,
        config: CaptureConfig,
        buffer: Arc<FrameBuffer>,
        feed: Option<Box<dyn SurfaceFeed>>,
        accel: Option<&dyn AcceleratedFactory>,
        pipe: &PipeOptions,
    ) -> Result<Self, PlasmaError> {
        let source = open_source(target, feed, pipe).await?;
        let info = source.info();
        info!(
            "capture session for {target}: {}x{} via '{}'",
            info.width, info.height, info.backend
        );

        let encoder = FrameEncoder::with_factory(info.width, info.height, config.quality, accel);

        Ok(Self {
            target: target.to_string(),
            source,
            encoder,
            buffer,
            config,
            running: Arc::new(AtomicBool::new(true)),
            info,
        })
    }

    /// Backend identity and frame dimensions.
    pub fn info(&self) -> SourceInfo {
        self.info
    }

    /// The capture target this session was started for.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The shared frame buffer this session appends to.
    pub fn buffer(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Cloneable handle to stop the session from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run the pipeline until stopped or a fatal source error occurs.
    /// Tears the source down on exit.
    pub async fn run(self) -> Result<(), PlasmaError> {
        let Self {
            source,
            encoder,
            buffer,
            config,
            running,
            ..
        } = self;

        match source {
            Source::Push(surface) => run_push(surface, encoder, buffer, running).await,
            Source::Pull(source) => run_pull(source, encoder, buffer, config, running).await,
        }
    }
}

// ── Push mode ────────────────────────────────────────────────────

/// Encode and append synchronously inside the feed callback; no pacing
/// loop is needed. Parks until stopped.
async fn run_push(
    mut surface: SurfaceSource,
    mut encoder: FrameEncoder,
    buffer: Arc<FrameBuffer>,
    running: Arc<AtomicBool>,
) -> Result<(), PlasmaError> {
    surface.start(Box::new(move |raw| {
        match encoder.encode(&raw) {
            Ok(payload) => {
                buffer.append(payload, raw.captured_at);
            }
            Err(e) => warn!("encode failed, frame dropped: {e}"),
        }
    }))?;

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    surface.stop();
    Ok(())
}

// ── Pull mode ────────────────────────────────────────────────────

/// Paced capture loop: one capture+encode+append per interval, with a
/// throughput diagnostic every `fps` frames.
async fn run_pull(
    mut source: Box<dyn FrameSource>,
    mut encoder: FrameEncoder,
    buffer: Arc<FrameBuffer>,
    config: CaptureConfig,
    running: Arc<AtomicBool>,
) -> Result<(), PlasmaError> {
    let fps = config.fps.min(source.native_fps().unwrap_or(config.fps)).max(1);
    let interval = Duration::from_secs_f64(1.0 / fps as f64);

    let mut next_deadline = Instant::now();
    let mut window_start = Instant::now();
    let mut window_frames: u32 = 0;

    while running.load(Ordering::SeqCst) {
        pace_until(next_deadline).await;

        match source.next_frame().await {
            Ok(raw) => match encoder.encode(&raw) {
                Ok(payload) => {
                    buffer.append(payload, raw.captured_at);
                    window_frames += 1;
                }
                Err(e) => warn!("encode failed, frame dropped: {e}"),
            },
            // A single unusable frame; skip it and keep the cadence.
            Err(PlasmaError::Encode(e)) => warn!("capture produced unusable frame: {e}"),
            Err(e) => return Err(e),
        }

        // Deadlines are spaced from the append that just happened, not
        // the nominal cadence: an over-long capture must never be
        // followed by an immediate catch-up append.
        next_deadline = Instant::now() + interval;

        if window_frames >= fps {
            let elapsed = window_start.elapsed().as_secs_f64();
            info!("throughput: {:.1} fps over {window_frames} frames", window_frames as f64 / elapsed);
            window_start = Instant::now();
            window_frames = 0;
        }
    }

    Ok(())
}

/// Sleep in coarse increments until within ~1 ms of `deadline`, then
/// busy-wait the remainder for sub-millisecond accuracy.
async fn pace_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining <= SPIN_THRESHOLD {
            break;
        }
        tokio::time::sleep(remaining - SPIN_THRESHOLD).await;
    }
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

// ── Tests ────────────────────────────────────────────────────────
