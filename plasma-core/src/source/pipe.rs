//! External raw-pixel subprocess backend (pull-driven).
//!
//! The capture subprocess emits a one-time attributes header
//! (`width=W;height=H;row_size=R;frame_size=S`, newline-terminated) on
//! stdout, followed by a continuous stream of `frame_size`-byte BGRA
//! frames. The header may arrive split across any number of reads.
//! `row_size` may exceed `width * 4`; trailing per-row padding is kept
//! in the raw buffer and stripped downstream via [`RawFrame::packed`].
//!
//! Subprocess stderr is diagnostics only and is drained in a background
//! task (forwarded to tracing when debug is enabled) so it can never
//! stall the pixel stream.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::config::PipeOptions;
use crate::error::PlasmaError;
use crate::frame::{BYTES_PER_PIXEL, RawFrame};
use crate::source::{FrameSource, SourceInfo};

/// Name of the capture subprocess binary searched for on disk.
pub const PIPE_BINARY_NAME: &str = "plasma-pipe";

/// Standard install locations checked before `PATH`.
const STANDARD_LOCATIONS: [&str; 2] = ["/opt/homebrew/bin/plasma-pipe", "/usr/local/bin/plasma-pipe"];

/// How long to wait for the attributes header before giving up.
const HEADER_DEADLINE: Duration = Duration::from_secs(5);

// ── StreamAttributes ─────────────────────────────────────────────

/// Parsed one-time attributes header describing the raw pixel stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamAttributes {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes; at least `width * 4`.
    pub row_size: u32,
    /// Bytes per frame; exactly `row_size * height`.
    pub frame_size: u32,
}

impl StreamAttributes {
    /// Parse `width=W;height=H;row_size=R;frame_size=S`.
    ///
    /// Unknown keys are ignored so the subprocess can grow its header
    /// without breaking older readers.
    pub fn parse(line: &str) -> Result<Self, PlasmaError> {
        let mut width = None;
        let mut height = None;
        let mut row_size = None;
        let mut frame_size = None;

        for field in line.trim().split(';').filter(|f| !f.is_empty()) {
            let Some((key, value)) = field.split_once('=') else {
                return Err(PlasmaError::InvalidStreamHeader(format!(
                    "malformed field '{field}'"
                )));
            };
            // Match the key before touching the value: unknown keys
            // are skipped whole, whatever their values look like.
            let slot = match key.trim() {
                "width" => &mut width,
                "height" => &mut height,
                "row_size" => &mut row_size,
                "frame_size" => &mut frame_size,
                _ => continue,
            };
            let parsed: u32 = value.trim().parse().map_err(|_| {
                PlasmaError::InvalidStreamHeader(format!("non-numeric value in '{field}'"))
            })?;
            *slot = Some(parsed);
        }

        let require = |name: &str, v: Option<u32>| {
            v.ok_or_else(|| PlasmaError::InvalidStreamHeader(format!("missing {name}")))
        };
        let attrs = Self {
            width: require("width", width)?,
            height: require("height", height)?,
            row_size: require("row_size", row_size)?,
            frame_size: require("frame_size", frame_size)?,
        };

        if attrs.width == 0 || attrs.height == 0 {
            return Err(PlasmaError::InvalidStreamHeader("zero dimensions".into()));
        }
        if (attrs.row_size as usize) < attrs.width as usize * BYTES_PER_PIXEL {
            return Err(PlasmaError::InvalidStreamHeader(format!(
                "row_size {} < width {} * 4",
                attrs.row_size, attrs.width
            )));
        }
        // Widen before multiplying; a hostile header must not overflow.
        if attrs.frame_size as u64 != attrs.row_size as u64 * attrs.height as u64 {
            return Err(PlasmaError::InvalidStreamHeader(format!(
                "frame_size {} != row_size {} * height {}",
                attrs.frame_size, attrs.row_size, attrs.height
            )));
        }

        Ok(attrs)
    }

    /// Trailing padding bytes per scanline.
    pub fn padding_per_row(&self) -> u32 {
        self.row_size
            .saturating_sub(self.width.saturating_mul(BYTES_PER_PIXEL as u32))
    }
}

/// Read the newline-terminated attributes header, tolerating arbitrary
/// splits across reads.
pub async fn read_attributes<R>(reader: &mut R) -> Result<StreamAttributes, PlasmaError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(PlasmaError::InvalidStreamHeader(
            "stream closed before attributes header".into(),
        ));
    }
    StreamAttributes::parse(&line)
}

// ── PipeSource ───────────────────────────────────────────────────

/// Pull-driven source reading raw BGRA frames from a capture
/// subprocess's stdout.
pub struct PipeSource {
    // Held for lifetime; the child is killed when the source drops.
    _child: Child,
    stdout: BufReader<ChildStdout>,
    attrs: StreamAttributes,
    info: SourceInfo,
}

impl PipeSource {
    /// Locate the capture subprocess binary: explicit override first,
    /// then standard install locations, then `PATH`.
    pub fn discover_binary(options: &PipeOptions) -> Option<PathBuf> {
        if let Some(path) = &options.binary {
            if path.exists() {
                return Some(path.clone());
            }
            debug!("pipe binary override {} does not exist", path.display());
        }

        for candidate in STANDARD_LOCATIONS {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Some(path);
            }
        }

        if let Ok(path_var) = std::env::var("PATH") {
            for entry in std::env::split_paths(&path_var) {
                let candidate = entry.join(PIPE_BINARY_NAME);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }

        None
    }

    /// Spawn the subprocess for `target` and read its attributes header.
    pub async fn resolve(target: &str, options: &PipeOptions) -> Result<Self, PlasmaError> {
        let binary = Self::discover_binary(options)
            .ok_or_else(|| PlasmaError::unavailable("pipe", "no capture subprocess binary found"))?;
        debug!("pipe binary: {}", binary.display());

        let mut cmd = Command::new(&binary);
        cmd.args(["--udid", target, "--fps", &options.fps.to_string()])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if options.debug {
            cmd.arg("--debug");
        }

        let mut child = cmd.spawn().map_err(|e| {
            PlasmaError::unavailable("pipe", format!("spawn {}: {e}", binary.display()))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlasmaError::unavailable("pipe", "subprocess stdout not captured"))?;

        // Drain stderr regardless of the debug flag so the subprocess
        // never blocks on a full pipe; log only when asked to.
        if let Some(stderr) = child.stderr.take() {
            let verbose = options.debug;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if verbose && !line.is_empty() {
                        debug!(target: "plasma::pipe", "{line}");
                    }
                }
            });
        }

        let mut stdout = BufReader::new(stdout);
        let attrs = tokio::time::timeout(HEADER_DEADLINE, read_attributes(&mut stdout))
            .await
            .map_err(|_| {
                PlasmaError::unavailable("pipe", "timed out waiting for attributes header")
            })??;
        debug!(
            "pipe stream: {}x{}, row_size {} ({} pad bytes/row)",
            attrs.width,
            attrs.height,
            attrs.row_size,
            attrs.padding_per_row()
        );

        Ok(Self {
            _child: child,
            stdout,
            attrs,
            info: SourceInfo {
                backend: "pipe",
                width: attrs.width,
                height: attrs.height,
            },
        })
    }

    pub fn attributes(&self) -> StreamAttributes {
        self.attrs
    }
}

#[async_trait]
impl FrameSource for PipeSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    async fn next_frame(&mut self) -> Result<RawFrame, PlasmaError> {
        let mut data = vec![0u8; self.attrs.frame_size as usize];
        self.stdout.read_exact(&mut data).await?;
        Ok(RawFrame {
            width: self.attrs.width,
            height: self.attrs.height,
            row_size: self.attrs.row_size,
            data,
            captured_at: Instant::now(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio_test::assert_ok;

    #[test]
    fn parse_padded_header() {
        let attrs =
            StreamAttributes::parse("width=100;height=50;row_size=416;frame_size=20800").unwrap();
        assert_eq!(attrs.width, 100);
        assert_eq!(attrs.height, 50);
        assert_eq!(attrs.padding_per_row(), 16);
    }

    #[test]
    fn parse_rejects_inconsistent_sizes() {
        let err = StreamAttributes::parse("width=100;height=50;row_size=416;frame_size=999")
            .unwrap_err();
        assert!(matches!(err, PlasmaError::InvalidStreamHeader(_)));
    }

    #[test]
    fn parse_rejects_missing_fields() {
        let err = StreamAttributes::parse("width=100;height=50").unwrap_err();
        assert!(matches!(err, PlasmaError::InvalidStreamHeader(_)));
    }

    #[test]
    fn parse_rejects_overflowing_sizes() {
        // row_size * height exceeds u32; must reject, not panic.
        let err = StreamAttributes::parse(
            "width=1;height=16777216;row_size=4294967040;frame_size=0",
        )
        .unwrap_err();
        assert!(matches!(err, PlasmaError::InvalidStreamHeader(_)));
    }

    #[test]
    fn parse_rejects_undersized_rows() {
        let err = StreamAttributes::parse("width=100;height=50;row_size=100;frame_size=5000")
            .unwrap_err();
        assert!(matches!(err, PlasmaError::InvalidStreamHeader(_)));
    }

    #[test]
    fn parse_ignores_unknown_keys() {
        let attrs = StreamAttributes::parse(
            "width=2;height=2;row_size=8;frame_size=16;color_space=srgb",
        )
        .unwrap();
        assert_eq!(attrs.frame_size, 16);
    }

    #[tokio::test]
    async fn header_split_across_reads() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = BufReader::new(rx);

        let parse = tokio::spawn(async move { read_attributes(&mut reader).await });

        // The header arrives in three fragments.
        tx.write_all(b"width=100;hei").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.write_all(b"ght=50;row_size=416;fra").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.write_all(b"me_size=20800\n").await.unwrap();

        let attrs = assert_ok!(parse.await.unwrap());
        assert_eq!(attrs.width, 100);
        assert_eq!(attrs.row_size, 416);
    }

    #[tokio::test]
    async fn padded_frame_packs_to_usable_bytes() {
        // Header declares 16 pad bytes per row; the packed frame must
        // come out at exactly width*height*4 bytes.
        let attrs =
            StreamAttributes::parse("width=100;height=50;row_size=416;frame_size=20800").unwrap();
        let raw = RawFrame {
            width: attrs.width,
            height: attrs.height,
            row_size: attrs.row_size,
            data: vec![0x55; attrs.frame_size as usize],
            captured_at: Instant::now(),
        };
        assert_eq!(raw.packed().len(), 100 * 50 * 4);
    }

    #[tokio::test]
    async fn closed_stream_is_invalid_header() {
        let (tx, rx) = tokio::io::duplex(16);
        drop(tx);
        let mut reader = BufReader::new(rx);
        let err = read_attributes(&mut reader).await.unwrap_err();
        assert!(matches!(err, PlasmaError::InvalidStreamHeader(_)));
    }

    #[test]
    fn discover_respects_missing_override() {
        let options = PipeOptions {
            binary: Some(PathBuf::from("/nonexistent/plasma-pipe")),
            ..PipeOptions::default()
        };
        // Falls through to the search path; must not return the bogus
        // override.
        if let Some(found) = PipeSource::discover_binary(&options) {
            assert_ne!(found, PathBuf::from("/nonexistent/plasma-pipe"));
        }
    }
}
