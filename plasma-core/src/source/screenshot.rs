//! Periodic screenshot fallback backend (pull-driven, low rate).
//!
//! Last resort in the chain: shells out to the simulator tooling for a
//! full-window screenshot once per tick and decodes the PNG into a BGRA
//! frame. An order of magnitude slower than the other backends, but it
//! works with nothing beyond the platform tools installed.

use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::PlasmaError;
use crate::frame::RawFrame;
use crate::source::{FrameSource, SourceInfo};

/// Polling rate cap for this backend; screenshots are too slow for more.
pub const SCREENSHOT_FPS: u32 = 10;

/// Pull-driven source taking one screenshot per frame.
pub struct ScreenshotSource {
    target: String,
    info: SourceInfo,
}

impl ScreenshotSource {
    /// Resolve the backend by taking a probe screenshot, which both
    /// validates the target and yields the fixed frame dimensions.
    pub async fn resolve(target: &str) -> Result<Self, PlasmaError> {
        let png = Self::screenshot(target).await?;
        let image = image::load_from_memory(&png).map_err(|e| {
            PlasmaError::unavailable("screenshot", format!("probe decode failed: {e}"))
        })?;
        debug!("screenshot probe: {}x{}", image.width(), image.height());

        Ok(Self {
            target: target.to_string(),
            info: SourceInfo {
                backend: "screenshot",
                width: image.width(),
                height: image.height(),
            },
        })
    }

    /// One full-window screenshot as PNG bytes.
    async fn screenshot(target: &str) -> Result<Vec<u8>, PlasmaError> {
        let output = Command::new("xcrun")
            .args(["simctl", "io", target, "screenshot", "--type=png", "-"])
            .output()
            .await
            .map_err(|e| PlasmaError::unavailable("screenshot", format!("xcrun: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlasmaError::NotFound(format!(
                "{target}: {}",
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// PNG → tightly packed BGRA frame.
    fn decode(png: &[u8], captured_at: Instant) -> Result<RawFrame, PlasmaError> {
        let image = image::load_from_memory(png)
            .map_err(|e| PlasmaError::Encode(format!("screenshot decode failed: {e}")))?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut data = rgba.into_raw();
        // RGBA → BGRA, keeping the pipeline's native byte order.
        for px in data.chunks_exact_mut(4) {
            px.swap(0, 2);
        }

        Ok(RawFrame::tight(width, height, data, captured_at))
    }
}

#[async_trait]
impl FrameSource for ScreenshotSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn native_fps(&self) -> Option<u32> {
        Some(SCREENSHOT_FPS)
    }

    async fn next_frame(&mut self) -> Result<RawFrame, PlasmaError> {
        let captured_at = Instant::now();
        let png = Self::screenshot(&self.target).await?;
        Self::decode(&png, captured_at)
    }
}

// ── Tests ────────────────────────────────────────────────────────
