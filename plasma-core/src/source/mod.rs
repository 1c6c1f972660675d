//! Capture source abstraction and the backend fallback chain.
//!
//! Three interchangeable backends exist, tried in fixed priority order
//! (lowest latency first):
//!
//! | Backend      | Drive | Mechanism                                    |
//! |--------------|-------|----------------------------------------------|
//! | `surface`    | push  | display-surface callback feed (zero-copy)    |
//! | `pipe`       | pull  | external subprocess emitting raw BGRA frames |
//! | `screenshot` | pull  | periodic full-window screenshot (low rate)   |
//!
//! An unavailable backend is skipped with a warning; exhausting the
//! chain is [`PlasmaError::NoCaptureSource`], fatal to the capture
//! session.

pub mod pipe;
pub mod screenshot;
pub mod surface;

pub use pipe::{PipeSource, StreamAttributes};
pub use screenshot::ScreenshotSource;
pub use surface::{FeedToken, FrameHandler, SurfaceFeed, SurfaceSource};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::PipeOptions;
use crate::error::PlasmaError;
use crate::frame::RawFrame;

// ── SourceInfo ───────────────────────────────────────────────────

/// Identity and fixed dimensions of a resolved capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    /// Backend name (`surface`, `pipe`, `screenshot`).
    pub backend: &'static str,
    /// Frame width in pixels, fixed for the session.
    pub width: u32,
    /// Frame height in pixels, fixed for the session.
    pub height: u32,
}

// ── FrameSource ──────────────────────────────────────────────────

/// A pull-driven capture source, polled by the paced capture loop.
#[async_trait]
pub trait FrameSource: Send {
    /// Backend identity and frame dimensions.
    fn info(&self) -> SourceInfo;

    /// Rate cap this backend can realistically sustain, if any.
    fn native_fps(&self) -> Option<u32> {
        None
    }

    /// Produce the next raw BGRA frame. An [`PlasmaError::Encode`]
    /// error marks a single unusable frame (dropped by the loop); any
    /// other error ends capture.
    async fn next_frame(&mut self) -> Result<RawFrame, PlasmaError>;
}

// ── Source ───────────────────────────────────────────────────────

/// A resolved capture source, push- or pull-driven.
pub enum Source {
    /// Push-driven: frames arrive via a registered surface handler.
    Push(SurfaceSource),
    /// Pull-driven: the capture loop polls at a paced interval.
    Pull(Box<dyn FrameSource>),
}

impl Source {
    pub fn info(&self) -> SourceInfo {
        match self {
            Source::Push(s) => s.info(),
            Source::Pull(s) => s.info(),
        }
    }
}

/// Resolve a capture source for `target`, walking the backend chain in
/// priority order.
///
/// `feed` is the host-supplied display-surface connection, if any; the
/// standalone tool passes `None` and starts at the subprocess backend.
pub async fn open_source(
    target: &str,
    feed: Option<Box<dyn SurfaceFeed>>,
    pipe: &PipeOptions,
) -> Result<Source, PlasmaError> {
    match SurfaceSource::resolve(target, feed) {
        Ok(source) => {
            info!("using surface backend");
            return Ok(Source::Push(source));
        }
        Err(e) => warn!("surface backend skipped: {e}"),
    }

    match PipeSource::resolve(target, pipe).await {
        Ok(source) => {
            info!("using pipe backend");
            return Ok(Source::Pull(Box::new(source)));
        }
        Err(e) => warn!("pipe backend skipped: {e}"),
    }

    match ScreenshotSource::resolve(target).await {
        Ok(source) => {
            info!("using screenshot backend");
            return Ok(Source::Pull(Box::new(source)));
        }
        Err(e) => warn!("screenshot backend skipped: {e}"),
    }

    Err(PlasmaError::NoCaptureSource(target.to_string()))
}
