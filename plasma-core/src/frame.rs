//! Shared frame types used between pipeline stages.
//!
//! Raw captures stay in their native BGRA byte order end-to-end: the
//! hardware encoder consumes BGRA directly and the raw-passthrough path
//! expects it too, so no per-pixel channel swap happens on the hot path.
//! Only the cold software JPEG fallback converts internally.

use std::borrow::Cow;
use std::time::Instant;

use bytes::Bytes;

/// Bytes per pixel for BGRA frames.
pub const BYTES_PER_PIXEL: usize = 4;

// ── RawFrame ─────────────────────────────────────────────────────

/// A raw, uncompressed BGRA capture obtained from a frame source.
///
/// The `data` buffer holds `height` rows of `row_size` bytes each.
/// `row_size` may exceed `width * 4` when the producer pads scanlines
/// to an alignment boundary.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in **bytes** (may exceed `width * 4`).
    pub row_size: u32,
    /// Raw BGRA pixel data, `row_size * height` bytes.
    pub data: Vec<u8>,
    /// Monotonic capture timestamp.
    pub captured_at: Instant,
}

impl RawFrame {
    /// Build a frame whose rows carry no padding.
    pub fn tight(width: u32, height: u32, data: Vec<u8>, captured_at: Instant) -> Self {
        Self {
            width,
            height,
            row_size: width * BYTES_PER_PIXEL as u32,
            data,
            captured_at,
        }
    }

    /// Total byte size of the raw bitmap including padding.
    pub fn byte_len(&self) -> usize {
        self.row_size as usize * self.height as usize
    }

    /// The usable (unpadded) bytes of row `y`.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.row_size as usize;
        let len = self.width as usize * BYTES_PER_PIXEL;
        &self.data[start..start + len]
    }

    /// Tightly packed pixel bytes with any trailing per-row padding
    /// stripped. Borrows when the rows are already tight.
    pub fn packed(&self) -> Cow<'_, [u8]> {
        let tight_row = self.width as usize * BYTES_PER_PIXEL;
        if self.row_size as usize == tight_row {
            return Cow::Borrowed(&self.data);
        }
        let mut out = Vec::with_capacity(tight_row * self.height as usize);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        Cow::Owned(out)
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// An immutable encoded frame as retained by the frame buffer.
///
/// `payload` is refcounted, so N client sessions share one copy of the
/// compressed bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number, gapless in producer order.
    pub sequence: u64,
    /// Compressed image bytes (JPEG).
    pub payload: Bytes,
    /// Capture timestamp of the source frame.
    pub captured_at: Instant,
}

// ── Tests ────────────────────────────────────────────────────────
