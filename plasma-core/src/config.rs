//! Capture configuration: CLI-facing settings plus environment
//! overrides for the subprocess backend.

use std::path::PathBuf;

/// Default capture rate in frames per second.
pub const DEFAULT_FPS: u32 = 60;
/// Allowed capture rate range.
pub const FPS_RANGE: std::ops::RangeInclusive<u32> = 1..=120;
/// Default JPEG quality.
pub const DEFAULT_QUALITY: f32 = 0.7;
/// Allowed JPEG quality range.
pub const QUALITY_RANGE: std::ops::RangeInclusive<f32> = 0.1..=1.0;

/// Default capture rate requested from the subprocess backend.
pub const DEFAULT_PIPE_FPS: u32 = 30;

// ── CaptureConfig ────────────────────────────────────────────────

/// Settings fixed for the lifetime of one capture session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    /// Target frames per second (clamped to [`FPS_RANGE`]).
    pub fps: u32,
    /// JPEG quality in [0.1, 1.0].
    pub quality: f32,
}

impl CaptureConfig {
    /// Build a config, clamping both values into their allowed ranges.
    pub fn new(fps: u32, quality: f32) -> Self {
        Self {
            fps: fps.clamp(*FPS_RANGE.start(), *FPS_RANGE.end()),
            quality: quality.clamp(*QUALITY_RANGE.start(), *QUALITY_RANGE.end()),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            quality: DEFAULT_QUALITY,
        }
    }
}

// ── PipeOptions ──────────────────────────────────────────────────

/// Subprocess-backend options, resolved from the environment.
///
/// | Variable            | Meaning                              | Default        |
/// |---------------------|--------------------------------------|----------------|
/// | `PLASMA_PIPE`       | Capture subprocess binary path       | auto-discover  |
/// | `PLASMA_PIPE_FPS`   | Subprocess target capture rate       | 30             |
/// | `PLASMA_PIPE_DEBUG` | Verbose subprocess diagnostics       | off            |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeOptions {
    /// Binary path override. `None` = search standard locations + PATH.
    pub binary: Option<PathBuf>,
    /// Capture rate requested from the subprocess.
    pub fps: u32,
    /// Forward subprocess stderr to tracing at debug level.
    pub debug: bool,
}

impl PipeOptions {
    /// Read the options from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("PLASMA_PIPE").ok(),
            std::env::var("PLASMA_PIPE_FPS").ok(),
            std::env::var("PLASMA_PIPE_DEBUG").ok(),
        )
    }

    fn from_vars(binary: Option<String>, fps: Option<String>, debug: Option<String>) -> Self {
        Self {
            binary: binary.filter(|s| !s.is_empty()).map(PathBuf::from),
            fps: fps
                .and_then(|v| v.parse::<u32>().ok())
                .map(|v| v.clamp(*FPS_RANGE.start(), *FPS_RANGE.end()))
                .unwrap_or(DEFAULT_PIPE_FPS),
            debug: matches!(debug.as_deref(), Some("1") | Some("true") | Some("yes")),
        }
    }
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            binary: None,
            fps: DEFAULT_PIPE_FPS,
            debug: false,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_clamps() {
        let cfg = CaptureConfig::new(500, 2.0);
        assert_eq!(cfg.fps, 120);
        assert_eq!(cfg.quality, 1.0);

        let cfg = CaptureConfig::new(0, 0.0);
        assert_eq!(cfg.fps, 1);
        assert_eq!(cfg.quality, 0.1);
    }

    #[test]
    fn capture_config_defaults() {
        let cfg = CaptureConfig::default();
        assert_eq!(cfg.fps, 60);
        assert_eq!(cfg.quality, 0.7);
    }

    #[test]
    fn pipe_options_defaults_when_unset() {
        let opts = PipeOptions::from_vars(None, None, None);
        assert_eq!(opts, PipeOptions::default());
    }

    #[test]
    fn pipe_options_parses_overrides() {
        let opts = PipeOptions::from_vars(
            Some("/opt/tools/plasma-pipe".into()),
            Some("15".into()),
            Some("1".into()),
        );
        assert_eq!(opts.binary.as_deref(), Some(std::path::Path::new("/opt/tools/plasma-pipe")));
        assert_eq!(opts.fps, 15);
        assert!(opts.debug);
    }

    #[test]
    fn pipe_options_ignores_garbage_fps() {
        let opts = PipeOptions::from_vars(None, Some("fast".into()), Some("0".into()));
        assert_eq!(opts.fps, DEFAULT_PIPE_FPS);
        assert!(!opts.debug);
    }
}
