//! # plasma-core
//!
//! Live frame distribution pipeline for mirroring a simulator's screen
//! to remote viewers in near-real time:
//!
//! ```text
//! Frame Source ──► Frame Encoder ──► Frame Buffer ──► N client sessions
//! (surface /        (hardware or      (bounded ring,    (catch-up burst,
//!  pipe /            software JPEG)    seq-numbered)     then live tail)
//!  screenshot)
//! ```
//!
//! | Module    | Purpose                                                |
//! |-----------|--------------------------------------------------------|
//! | `frame`   | Raw and encoded frame types (BGRA end-to-end)          |
//! | `buffer`  | Bounded, sequence-numbered frame ring (the one piece of shared mutable state) |
//! | `source`  | Capture backends and the fallback chain                |
//! | `encoder` | JPEG compression, hardware-preferred with software fallback |
//! | `capture` | Capture session lifecycle and the paced capture loop   |
//! | `server`  | Multipart MJPEG stream server over loopback HTTP       |
//! | `config`  | Capture settings and environment overrides             |
//! | `error`   | `PlasmaError`, the typed `thiserror`-based error hierarchy |

pub mod buffer;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod server;
pub mod source;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use buffer::{FRAME_BUFFER_CAPACITY, FrameBuffer};
pub use capture::CaptureSession;
pub use config::{CaptureConfig, PipeOptions};
pub use encoder::{AcceleratedFactory, AcceleratedSession, FrameEncoder};
pub use error::PlasmaError;
pub use frame::{Frame, RawFrame};
pub use server::{SessionStats, StreamServer};
pub use source::{FrameSource, Source, SourceInfo, SurfaceFeed, SurfaceSource};
