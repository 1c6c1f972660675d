//! Bounded, sequence-numbered ring of the most recently encoded frames.
//!
//! The frame buffer is the single piece of shared mutable state in the
//! pipeline: one writer (the capture path) appends, arbitrarily many
//! readers (client sessions) poll with their own cursors. All mutation
//! and snapshot reads happen under one mutex held only for the
//! O(capacity) duration of the operation, never across a socket write.
//!
//! A reader that falls behind by more than the retained window is
//! fast-forwarded to the oldest retained frame: lost history is skipped
//! silently, never reconstructed or reported as an error.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;

use crate::frame::Frame;

/// Frames retained before the oldest is evicted.
pub const FRAME_BUFFER_CAPACITY: usize = 5;

/// Fixed-capacity ring of encoded frames with gapless sequence numbers.
pub struct FrameBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    frames: VecDeque<Arc<Frame>>,
    next_seq: u64,
}

impl FrameBuffer {
    /// Buffer with the default capacity of [`FRAME_BUFFER_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(FRAME_BUFFER_CAPACITY)
    }

    /// Buffer retaining at most `capacity` frames (min 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Append an encoded frame, assigning the next sequence number and
    /// evicting the oldest frame once past capacity. Returns the
    /// assigned sequence. Single writer, O(1).
    pub fn append(&self, payload: Bytes, captured_at: Instant) -> u64 {
        let mut inner = self.lock();
        let sequence = inner.next_seq;
        inner.next_seq += 1;
        if inner.frames.len() == self.capacity {
            inner.frames.pop_front();
        }
        inner.frames.push_back(Arc::new(Frame {
            sequence,
            payload,
            captured_at,
        }));
        sequence
    }

    /// All retained frames with sequence >= `cursor`, ascending, plus
    /// the buffer's next-to-assign sequence as the caller's new cursor.
    ///
    /// The returned slice is snapshot-consistent: it never mixes frames
    /// from two different append generations.
    pub fn read_since(&self, cursor: u64) -> (Vec<Arc<Frame>>, u64) {
        let inner = self.lock();
        let frames = inner
            .frames
            .iter()
            .filter(|f| f.sequence >= cursor)
            .cloned()
            .collect();
        (frames, inner.next_seq)
    }

    /// Everything currently retained: the initial catch-up burst for a
    /// newly connected client.
    pub fn read_all(&self) -> (Vec<Arc<Frame>>, u64) {
        self.read_since(0)
    }

    /// The sequence number the next append will be assigned.
    pub fn next_sequence(&self) -> u64 {
        self.lock().next_seq
    }

    /// Number of frames currently retained.
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    /// Whether no frames are retained yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Appends and reads never panic while holding the lock, so
        // poisoning cannot occur in practice.
        self.inner.lock().expect("frame buffer lock poisoned")
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn append_n(buf: &FrameBuffer, n: u64) {
        for i in 0..n {
            buf.append(Bytes::from(format!("frame-{i}")), Instant::now());
        }
    }

    #[test]
    fn sequences_start_at_zero_and_are_gapless() {
        let buf = FrameBuffer::with_capacity(3);
        for expected in 0..5u64 {
            let seq = buf.append(Bytes::from_static(b"x"), Instant::now());
            assert_eq!(seq, expected);
        }
    }

    #[test]
    fn eviction_keeps_last_capacity_frames() {
        let buf = FrameBuffer::with_capacity(3);
        append_n(&buf, 8);

        let (frames, cursor) = buf.read_all();
        let seqs: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![5, 6, 7]);
        assert_eq!(cursor, 8);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn stale_cursor_skips_evicted_frames() {
        let buf = FrameBuffer::with_capacity(3);
        append_n(&buf, 8); // retained: 5, 6, 7

        // Client caught up through sequence 5, then stalled while
        // frame 8 evicted frame 5.
        buf.append(Bytes::from_static(b"frame-8"), Instant::now());

        let (frames, cursor) = buf.read_since(5);
        let seqs: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![6, 7, 8]);
        assert_eq!(cursor, 9);
    }

    #[test]
    fn read_since_is_idempotent_without_appends() {
        let buf = FrameBuffer::with_capacity(4);
        append_n(&buf, 6);

        let (first, c1) = buf.read_since(3);
        let (second, c2) = buf.read_since(3);
        assert_eq!(c1, c2);
        assert_eq!(
            first.iter().map(|f| f.sequence).collect::<Vec<_>>(),
            second.iter().map(|f| f.sequence).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn caught_up_cursor_reads_empty() {
        let buf = FrameBuffer::with_capacity(3);
        append_n(&buf, 4);

        let (_, cursor) = buf.read_all();
        let (frames, next) = buf.read_since(cursor);
        assert!(frames.is_empty());
        assert_eq!(next, cursor);
    }

    #[test]
    fn payloads_are_shared_not_copied() {
        let buf = FrameBuffer::new();
        let payload = Bytes::from(vec![0xFFu8; 1024]);
        buf.append(payload.clone(), Instant::now());

        let (a, _) = buf.read_all();
        let (b, _) = buf.read_all();
        // Same Arc<Frame>, same underlying payload allocation.
        assert!(Arc::ptr_eq(&a[0], &b[0]));
    }

    #[test]
    fn concurrent_writer_and_readers_observe_no_regressions() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;
        use std::time::Duration;

        let buf = Arc::new(FrameBuffer::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let buf = Arc::clone(&buf);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..120u64 {
                    buf.append(Bytes::from(format!("f{i}")), Instant::now());
                    thread::sleep(Duration::from_millis(2));
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..10u64)
            .map(|id| {
                let buf = Arc::clone(&buf);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut cursor = 0u64;
                    let mut last_seen: Option<u64> = None;
                    while !done.load(Ordering::SeqCst) {
                        let (frames, next) = buf.read_since(cursor);
                        assert!(next >= cursor, "cursor regressed");
                        let mut prev = last_seen;
                        for f in &frames {
                            if let Some(p) = prev {
                                // Strictly ascending, no duplicates.
                                assert!(f.sequence > p, "sequence regression");
                            }
                            assert!(f.sequence >= cursor);
                            prev = Some(f.sequence);
                        }
                        if let Some(p) = prev {
                            last_seen = Some(p);
                        }
                        cursor = next;
                        // Jittered polling per reader.
                        thread::sleep(Duration::from_micros(300 + id * 170));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
