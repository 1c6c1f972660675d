//! MJPEG stream server.
//!
//! Accepts HTTP connections on a loopback port and drives each as an
//! independent streaming session: parse the request line only, answer
//! CORS preflights, then send a catch-up burst of every retained frame
//! followed by a live tail of new frames as they are appended.
//!
//! Concurrency model: the accept loop never blocks on client I/O; each
//! connection runs in its own task. The frame buffer is the only shared state and
//! its lock is never held across a socket write. There is no per-client
//! queueing beyond the buffer: a slow client surfaces backpressure as a
//! write error and its session ends, leaving everyone else untouched.
//!
//! The ~1 ms poll in the live tail is a deliberate trade-off over a
//! notify scheme: it cannot miss a wakeup and costs at most a
//! millisecond of added latency.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::buffer::FrameBuffer;
use crate::error::PlasmaError;
use crate::frame::Frame;

/// Fixed multipart boundary token, matched by the viewer.
pub const BOUNDARY: &str = "--mjpegstream";

/// Poll interval while the live tail waits for a new frame.
const TAIL_POLL: Duration = Duration::from_millis(1);

/// Request lines longer than this are treated as malformed.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Streaming response header sent once, before the first part.
pub fn stream_response_header() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\
         Access-Control-Allow-Origin: *\r\n\
         \r\n"
    )
}

/// CORS preflight response (no body).
pub const PREFLIGHT_RESPONSE: &str = "HTTP/1.1 204 No Content\r\n\
    Access-Control-Allow-Origin: *\r\n\
    Access-Control-Allow-Methods: GET, OPTIONS\r\n\
    Access-Control-Allow-Headers: *\r\n\
    Access-Control-Max-Age: 86400\r\n\
    \r\n";

/// Header lines for one multipart image part.
pub fn part_header(payload_len: usize) -> String {
    format!(
        "{BOUNDARY}\r\n\
         Content-Type: image/jpeg\r\n\
         Content-Length: {payload_len}\r\n\
         \r\n"
    )
}

// ── SessionStats ─────────────────────────────────────────────────

/// Per-session delivery counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
}

/// Write one frame as a multipart part.
pub async fn write_part<W>(
    sink: &mut W,
    frame: &Frame,
    stats: &mut SessionStats,
) -> Result<(), PlasmaError>
where
    W: AsyncWrite + Unpin,
{
    let header = part_header(frame.payload.len());
    sink.write_all(header.as_bytes())
        .await
        .map_err(PlasmaError::ClientWrite)?;
    sink.write_all(&frame.payload)
        .await
        .map_err(PlasmaError::ClientWrite)?;
    sink.write_all(b"\r\n")
        .await
        .map_err(PlasmaError::ClientWrite)?;
    sink.flush().await.map_err(PlasmaError::ClientWrite)?;

    stats.frames_sent += 1;
    stats.bytes_sent += (header.len() + frame.payload.len() + 2) as u64;
    Ok(())
}

/// Drive one sink through the streaming protocol: catch-up burst of all
/// retained frames, then a live tail polling for new ones. Runs until
/// a write fails (client gone). Shared by HTTP sessions and the
/// stdout-only mode.
pub async fn stream_frames<W>(
    sink: &mut W,
    buffer: &FrameBuffer,
    stats: &mut SessionStats,
) -> Result<(), PlasmaError>
where
    W: AsyncWrite + Unpin,
{
    // Catch-up burst: everything currently retained, immediately.
    let (frames, mut cursor) = buffer.read_all();
    for frame in &frames {
        write_part(sink, frame, stats).await?;
    }

    // Live tail.
    loop {
        let (frames, next) = buffer.read_since(cursor);
        if frames.is_empty() {
            tokio::time::sleep(TAIL_POLL).await;
            continue;
        }
        cursor = next;
        for frame in &frames {
            write_part(sink, frame, stats).await?;
        }
    }
}

// ── StreamServer ─────────────────────────────────────────────────

/// Minimal HTTP server distributing the frame buffer to any number of
/// concurrent viewers.
pub struct StreamServer {
    listener: TcpListener,
    buffer: Arc<FrameBuffer>,
    sessions: Arc<AtomicUsize>,
}

impl StreamServer {
    /// Bind the stream listener on the loopback interface.
    ///
    /// `port` 0 lets the OS pick; the bound address is available via
    /// [`local_addr`](Self::local_addr). Bind failure is fatal to the
    /// process at startup.
    pub async fn bind(port: u16, buffer: Arc<FrameBuffer>) -> Result<Self, PlasmaError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(PlasmaError::Bind)?;
        Ok(Self {
            listener,
            buffer,
            sessions: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, PlasmaError> {
        self.listener.local_addr().map_err(PlasmaError::Io)
    }

    /// Number of currently connected client sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Accept clients indefinitely. Each connection runs in its own
    /// task; the accept loop never waits on client I/O.
    pub async fn run(&self) -> Result<(), PlasmaError> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                // Transient accept failures (fd pressure, aborted
                // handshakes) must not take the listener down.
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            debug!("client connected: {peer}");

            let buffer = Arc::clone(&self.buffer);
            let sessions = Arc::clone(&self.sessions);
            tokio::spawn(async move {
                sessions.fetch_add(1, Ordering::SeqCst);
                handle_client(stream, buffer, peer).await;
                sessions.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }
}

// ── Per-client session ───────────────────────────────────────────

struct RequestLine {
    method: String,
    #[allow(dead_code)] // parsed but deliberately ignored
    path: String,
}

/// Read bytes until the end of the request line. Anything after it
/// (headers) is ignored; the connection is never read again.
async fn read_request_line<R>(stream: &mut R) -> Result<RequestLine, PlasmaError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.contains(&b'\n') || buf.len() > MAX_REQUEST_BYTES {
            break;
        }
    }

    let line_end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());
    let line = String::from_utf8_lossy(&buf[..line_end]);
    let mut parts = line.split_whitespace();
    Ok(RequestLine {
        method: parts.next().unwrap_or_default().to_string(),
        path: parts.next().unwrap_or("/").to_string(),
    })
}

/// Drive one accepted connection through the session protocol. All
/// failures end the session quietly: a gone client is normal, and a
/// malformed request must never take the process down.
async fn handle_client(mut stream: TcpStream, buffer: Arc<FrameBuffer>, peer: SocketAddr) {
    let request = match read_request_line(&mut stream).await {
        Ok(r) => r,
        Err(e) => {
            debug!("client {peer}: bad request: {e}");
            return;
        }
    };

    if request.method == "OPTIONS" {
        if let Err(e) = stream.write_all(PREFLIGHT_RESPONSE.as_bytes()).await {
            debug!("client {peer}: preflight write failed: {e}");
        }
        let _ = stream.shutdown().await;
        return;
    }

    // Every non-preflight request gets the stream; the path is not
    // inspected.
    let mut stats = SessionStats::default();
    let result = async {
        stream
            .write_all(stream_response_header().as_bytes())
            .await
            .map_err(PlasmaError::ClientWrite)?;
        stream_frames(&mut stream, &buffer, &mut stats).await
    }
    .await;

    // stream_frames only returns on error (client gone).
    if let Err(e) = result {
        debug!(
            "client {peer} disconnected after {} frames / {} bytes: {e}",
            stats.frames_sent, stats.bytes_sent
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────
