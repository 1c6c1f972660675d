//! Domain-specific error types for the mirroring pipeline.
//!
//! All fallible operations return `Result<T, PlasmaError>`.
//! Backend- and frame-level failures are absorbed close to where they
//! occur and surface only as diagnostics; just two variants terminate a
//! larger unit of work: [`NoCaptureSource`](PlasmaError::NoCaptureSource)
//! ends the capture session, [`Bind`](PlasmaError::Bind) ends the process
//! at startup.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the mirroring pipeline.
#[derive(Debug, Error)]
pub enum PlasmaError {
    // ── Capture source errors ────────────────────────────────────
    /// A specific capture backend cannot be reached. Non-fatal: the
    /// fallback chain advances to the next backend.
    #[error("capture backend '{backend}' unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// No capturable display exists for the requested target.
    #[error("no capturable display for target {0}")]
    NotFound(String),

    /// Every backend in the fallback chain was unavailable. Fatal to
    /// the capture session; it never partially starts.
    #[error("all capture backends exhausted for target {0}")]
    NoCaptureSource(String),

    /// The subprocess backend emitted a malformed attributes header.
    #[error("invalid stream header: {0}")]
    InvalidStreamHeader(String),

    // ── Encoder errors ───────────────────────────────────────────
    /// A single frame failed to encode. Non-fatal: the frame is
    /// dropped and capture continues.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The hardware encoder missed its per-frame deadline. Non-fatal:
    /// the frame falls back to the software path.
    #[error("hardware encode timed out after {0:?}")]
    EncodeTimeout(Duration),

    // ── Server errors ────────────────────────────────────────────
    /// The listening socket could not be opened. Fatal at startup.
    #[error("failed to bind stream listener: {0}")]
    Bind(std::io::Error),

    /// A socket write to a client failed (client gone). Ends that
    /// session only; never retried.
    #[error("client write failed: {0}")]
    ClientWrite(std::io::Error),

    // ── I/O ──────────────────────────────────────────────────────
    /// The underlying I/O layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlasmaError {
    /// Shorthand for a backend-unavailable error.
    pub fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        PlasmaError::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }
}
