//! Direct display-surface capture backend (push-driven).
//!
//! The platform exposes the simulator's render surface through a
//! register/unregister callback service: a handler registered by
//! identifier fires once per rendered frame with the latest surface
//! contents: a zero-copy handoff, already rate-limited by the real
//! display refresh. That service is represented here as the narrow
//! [`SurfaceFeed`] capability. The embedding host supplies the concrete
//! connection; the standalone tool has none, so this backend reports
//! itself unavailable and the fallback chain advances.

use tracing::debug;

use crate::error::PlasmaError;
use crate::frame::RawFrame;
use crate::source::SourceInfo;

/// Handler invoked once per rendered frame with the latest BGRA surface.
pub type FrameHandler = Box<dyn FnMut(RawFrame) + Send>;

/// Opaque registration token returned by [`SurfaceFeed::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedToken(pub u64);

/// Narrow capability interface over the platform's display-surface
/// callback service.
pub trait SurfaceFeed: Send {
    /// Surface dimensions in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Register `handler` to fire on every new rendered frame.
    fn register(&mut self, handler: FrameHandler) -> Result<FeedToken, PlasmaError>;

    /// Remove a previously registered handler.
    fn unregister(&mut self, token: FeedToken);
}

// ── SurfaceSource ────────────────────────────────────────────────

/// Push-driven capture source backed by a [`SurfaceFeed`].
pub struct SurfaceSource {
    feed: Box<dyn SurfaceFeed>,
    token: Option<FeedToken>,
    info: SourceInfo,
}

impl SurfaceSource {
    /// Resolve the surface backend for `target`.
    ///
    /// `feed` is the host-supplied surface service connection; without
    /// one the backend is unavailable. A feed reporting zero dimensions
    /// means the target has no capturable display.
    pub fn resolve(target: &str, feed: Option<Box<dyn SurfaceFeed>>) -> Result<Self, PlasmaError> {
        let feed = feed.ok_or_else(|| {
            PlasmaError::unavailable(
                "surface",
                format!("no display-surface service connection for {target}"),
            )
        })?;

        let (width, height) = feed.dimensions();
        if width == 0 || height == 0 {
            return Err(PlasmaError::NotFound(target.to_string()));
        }

        Ok(Self {
            feed,
            token: None,
            info: SourceInfo {
                backend: "surface",
                width,
                height,
            },
        })
    }

    pub fn info(&self) -> SourceInfo {
        self.info
    }

    /// Register the capture handler; it fires on each rendered frame
    /// until [`stop`](Self::stop).
    pub fn start(&mut self, handler: FrameHandler) -> Result<(), PlasmaError> {
        let token = self.feed.register(handler)?;
        debug!("surface feed registered (token {})", token.0);
        self.token = Some(token);
        Ok(())
    }

    /// Unregister the handler. Idempotent.
    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            self.feed.unregister(token);
            debug!("surface feed unregistered (token {})", token.0);
        }
    }
}

impl Drop for SurfaceSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// Manual impl: the feed trait object has no Debug bound.
impl std::fmt::Debug for SurfaceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceSource")
            .field("token", &self.token)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────
