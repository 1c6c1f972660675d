//! JPEG frame encoder with an optional hardware-accelerated session.
//!
//! The preferred path hands BGRA buffers to an [`AcceleratedSession`]
//! created once per capture session and reused across frames, with a
//! bounded wait per frame. A frame whose hardware encode misses the
//! deadline falls back to the software path; if the session cannot be
//! created at all, hardware stays disabled for the remainder of the
//! capture session. The software path strips row padding, converts
//! BGRA→RGB and uses the `image` JPEG encoder at the same quality.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use tracing::{debug, warn};

use crate::error::PlasmaError;
use crate::frame::RawFrame;

/// Bounded wait for one asynchronous hardware encode.
pub const HARDWARE_ENCODE_DEADLINE: Duration = Duration::from_millis(50);

// ── Capability interfaces ────────────────────────────────────────

/// One configured hardware encoder session (e.g. the platform's video
/// encode service). Consumes BGRA directly. Calls may block; the
/// encoder bounds each frame's wait at [`HARDWARE_ENCODE_DEADLINE`]
/// and falls back to software when the deadline passes.
pub trait AcceleratedSession: Send {
    /// Encode one BGRA frame at `quality` in [0.0, 1.0].
    fn encode(&mut self, frame: &RawFrame, quality: f32) -> Result<Bytes, PlasmaError>;
}

/// Factory for accelerated sessions, supplied by the embedding host.
/// The standalone tool runs without one and uses software throughout.
pub trait AcceleratedFactory: Send + Sync {
    /// Create a session for frames of the given fixed dimensions.
    fn create(&self, width: u32, height: u32) -> Result<Box<dyn AcceleratedSession>, PlasmaError>;
}

// ── Accelerated worker ───────────────────────────────────────────

/// Runs the hardware session on a dedicated thread so a hung encode
/// can never stall the capture loop; each frame's wait is bounded at
/// [`HARDWARE_ENCODE_DEADLINE`].
struct AcceleratedWorker {
    requests: mpsc::Sender<(u64, RawFrame, f32)>,
    results: mpsc::Receiver<(u64, Result<Bytes, PlasmaError>)>,
    next_id: u64,
}

impl AcceleratedWorker {
    fn spawn(mut session: Box<dyn AcceleratedSession>) -> Self {
        let (req_tx, req_rx) = mpsc::channel::<(u64, RawFrame, f32)>();
        let (res_tx, res_rx) = mpsc::channel();
        std::thread::spawn(move || {
            while let Ok((id, frame, quality)) = req_rx.recv() {
                let result = session.encode(&frame, quality);
                if res_tx.send((id, result)).is_err() {
                    break;
                }
            }
        });
        Self {
            requests: req_tx,
            results: res_rx,
            next_id: 0,
        }
    }

    fn encode(&mut self, frame: &RawFrame, quality: f32) -> Result<Bytes, PlasmaError> {
        let id = self.next_id;
        self.next_id += 1;
        self.requests
            .send((id, frame.clone(), quality))
            .map_err(|_| PlasmaError::Encode("hardware encode worker exited".into()))?;

        let deadline = Instant::now() + HARDWARE_ENCODE_DEADLINE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.results.recv_timeout(remaining) {
                Ok((got, result)) if got == id => return result,
                // A result for a frame that already fell back; discard
                // and keep waiting for ours.
                Ok(_) => continue,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(PlasmaError::EncodeTimeout(HARDWARE_ENCODE_DEADLINE));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(PlasmaError::Encode("hardware encode worker exited".into()));
                }
            }
        }
    }
}

// ── FrameEncoder ─────────────────────────────────────────────────

/// Compresses raw BGRA frames into JPEG payloads.
///
/// Created once per capture session; frame dimensions are fixed for its
/// lifetime (a dimension change requires recreating the encoder).
pub struct FrameEncoder {
    quality: f32,
    accelerated: Option<AcceleratedWorker>,
    frames_encoded: u64,
}

impl FrameEncoder {
    /// Software-only encoder at `quality` in [0.1, 1.0].
    pub fn new(quality: f32) -> Self {
        Self {
            quality: quality.clamp(0.1, 1.0),
            accelerated: None,
            frames_encoded: 0,
        }
    }

    /// Encoder that prefers a hardware session from `factory`.
    ///
    /// Session creation failure is absorbed here: the encoder simply
    /// runs software-only for the rest of the session.
    pub fn with_factory(
        width: u32,
        height: u32,
        quality: f32,
        factory: Option<&dyn AcceleratedFactory>,
    ) -> Self {
        let mut encoder = Self::new(quality);
        if let Some(factory) = factory {
            match factory.create(width, height) {
                Ok(session) => {
                    debug!("hardware encode session created ({width}x{height})");
                    encoder.accelerated = Some(AcceleratedWorker::spawn(session));
                }
                Err(e) => {
                    warn!("hardware encode unavailable, using software: {e}");
                }
            }
        }
        encoder
    }

    /// Compress one frame. A hardware timeout falls back to software
    /// for this frame only; any failure here is non-fatal to capture:
    /// the caller drops the frame and proceeds.
    pub fn encode(&mut self, frame: &RawFrame) -> Result<Bytes, PlasmaError> {
        if let Some(worker) = self.accelerated.as_mut() {
            match worker.encode(frame, self.quality) {
                Ok(payload) => {
                    self.frames_encoded += 1;
                    return Ok(payload);
                }
                Err(PlasmaError::EncodeTimeout(waited)) => {
                    debug!("hardware encode missed deadline ({waited:?}), software fallback");
                }
                Err(e) => {
                    debug!("hardware encode failed ({e}), software fallback");
                }
            }
        }

        let payload = self.encode_software(frame)?;
        self.frames_encoded += 1;
        Ok(payload)
    }

    /// Whether a hardware session is active.
    pub fn hardware_active(&self) -> bool {
        self.accelerated.is_some()
    }

    /// Number of frames successfully encoded so far.
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    /// Software path: strip padding, BGRA→RGB, JPEG-compress.
    fn encode_software(&self, frame: &RawFrame) -> Result<Bytes, PlasmaError> {
        let packed = frame.packed();

        let mut rgb = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);
        for px in packed.chunks_exact(4) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }

        // Quality 0.1..=1.0 → 10..=100.
        let jpeg_quality = (self.quality * 100.0).round() as u8;
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, jpeg_quality);
        encoder
            .encode(&rgb, frame.width, frame.height, image::ExtendedColorType::Rgb8)
            .map_err(|e| PlasmaError::Encode(e.to_string()))?;

        Ok(Bytes::from(out))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn test_frame(w: u32, h: u32) -> RawFrame {
        RawFrame::tight(w, h, vec![0x80; (w * h * 4) as usize], Instant::now())
    }

    struct CannedSession(Bytes);

    impl AcceleratedSession for CannedSession {
        fn encode(&mut self, _frame: &RawFrame, _quality: f32) -> Result<Bytes, PlasmaError> {
            Ok(self.0.clone())
        }
    }

    struct TimingOutSession;

    impl AcceleratedSession for TimingOutSession {
        fn encode(&mut self, _frame: &RawFrame, _quality: f32) -> Result<Bytes, PlasmaError> {
            Err(PlasmaError::EncodeTimeout(HARDWARE_ENCODE_DEADLINE))
        }
    }

    /// Never completes within any reasonable deadline.
    struct HangingSession;

    impl AcceleratedSession for HangingSession {
        fn encode(&mut self, _frame: &RawFrame, _quality: f32) -> Result<Bytes, PlasmaError> {
            std::thread::sleep(Duration::from_secs(30));
            Ok(Bytes::new())
        }
    }

    struct FailingFactory;

    impl AcceleratedFactory for FailingFactory {
        fn create(&self, _w: u32, _h: u32) -> Result<Box<dyn AcceleratedSession>, PlasmaError> {
            Err(PlasmaError::Encode("no encode service".into()))
        }
    }

    struct CannedFactory;

    impl AcceleratedFactory for CannedFactory {
        fn create(&self, _w: u32, _h: u32) -> Result<Box<dyn AcceleratedSession>, PlasmaError> {
            Ok(Box::new(CannedSession(Bytes::from_static(b"hw-jpeg"))))
        }
    }

    #[test]
    fn software_output_is_jpeg() {
        let mut enc = FrameEncoder::new(0.7);
        let payload = enc.encode(&test_frame(16, 16)).unwrap();
        // JPEG SOI marker.
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);
        assert_eq!(enc.frames_encoded(), 1);
    }

    #[test]
    fn software_handles_padded_rows() {
        let width = 4u32;
        let height = 4u32;
        let row_size = width * 4 + 12;
        let frame = RawFrame {
            width,
            height,
            row_size,
            data: vec![0x40; (row_size * height) as usize],
            captured_at: Instant::now(),
        };
        let mut enc = FrameEncoder::new(0.5);
        let payload = enc.encode(&frame).unwrap();
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn hardware_session_preferred() {
        let mut enc = FrameEncoder::with_factory(16, 16, 0.7, Some(&CannedFactory));
        assert!(enc.hardware_active());
        let payload = enc.encode(&test_frame(16, 16)).unwrap();
        assert_eq!(&payload[..], b"hw-jpeg");
    }

    #[test]
    fn timeout_falls_back_to_software_per_frame() {
        let mut enc = FrameEncoder::new(0.7);
        enc.accelerated = Some(AcceleratedWorker::spawn(Box::new(TimingOutSession)));

        let payload = enc.encode(&test_frame(16, 16)).unwrap();
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);
        // Session stays installed; the timeout was per-frame.
        assert!(enc.hardware_active());
    }

    #[test]
    fn hung_session_is_bounded_by_the_deadline() {
        let mut enc = FrameEncoder::new(0.7);
        enc.accelerated = Some(AcceleratedWorker::spawn(Box::new(HangingSession)));

        let started = Instant::now();
        let payload = enc.encode(&test_frame(16, 16)).unwrap();
        let waited = started.elapsed();

        // Software output, produced after the bounded wait but long
        // before the session would ever have answered.
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);
        assert!(waited >= HARDWARE_ENCODE_DEADLINE);
        assert!(waited < Duration::from_secs(5), "encode stalled for {waited:?}");
        assert!(enc.hardware_active());
    }

    #[test]
    fn factory_failure_disables_hardware() {
        let enc = FrameEncoder::with_factory(16, 16, 0.7, Some(&FailingFactory));
        assert!(!enc.hardware_active());
    }

    #[test]
    fn quality_is_clamped() {
        let enc = FrameEncoder::new(7.0);
        assert_eq!(enc.quality, 1.0);
    }
}
