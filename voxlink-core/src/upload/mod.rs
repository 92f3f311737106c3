//! Real-time audio upload over an HTTP/1.1 chunked request body.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──init(token)──► Active ──append_chunk(bytes)*──► Active
//!  ▲                      │
//!  └──── finish() ────────┘  (terminator sent, response read, socket closed)
//!  └──── abort()  ────────┘  (socket closed without terminator)
//! ```
//!
//! `finish` and `abort` always leave the session `Idle`, whatever happens on
//! the wire. A failed `init` never leaves it `Active`.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::chunked;
use crate::error::{Result, VoxError};

/// Response bytes read after the terminator, at most.
pub const MAX_RESPONSE_BYTES: usize = 4096;

/// Opens the byte stream an upload session writes to.
pub trait Connector: Send + 'static {
    type Stream: Read + Write + Send + 'static;

    fn connect(&self) -> io::Result<Self::Stream>;

    /// Value for the request's `Host` header.
    fn host_header(&self) -> String;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Bounds the wait for the final response.
    pub read_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> io::Result<TcpStream> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", self.host))
            })?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn host_header(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Request line and content type for uploads.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub path: String,
    pub content_type: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            path: "/api/v1/audio/stream".into(),
            content_type: "audio/wav".into(),
        }
    }
}

/// Raw HTTP response read after finishing an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub raw: String,
}

impl UploadResponse {
    /// Status code from the `HTTP/1.x NNN` status line.
    pub fn status_code(&self) -> Option<u16> {
        let line = self.raw.lines().next()?;
        let mut parts = line.split_whitespace();
        if !parts.next()?.starts_with("HTTP/") {
            return None;
        }
        parts.next()?.parse().ok()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status_code(), Some(200..=299))
    }

    /// Everything after the header block; the whole text if there is none.
    pub fn body(&self) -> &str {
        match self.raw.find("\r\n\r\n") {
            Some(idx) => &self.raw[idx + 4..],
            None => &self.raw,
        }
    }
}

enum SessionState<S> {
    Idle,
    Active {
        stream: S,
        session_id: String,
        chunks: usize,
        bytes: usize,
    },
}

/// One chunked upload at a time over connections from `C`.
pub struct StreamingUploadSession<C: Connector> {
    connector: C,
    config: UploadConfig,
    state: SessionState<C::Stream>,
    started: u64,
}

impl<C: Connector> StreamingUploadSession<C> {
    pub fn new(connector: C, config: UploadConfig) -> Self {
        Self {
            connector,
            config,
            state: SessionState::Idle,
            started: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Active { session_id, .. } => Some(session_id),
            SessionState::Idle => None,
        }
    }

    /// Id handed to the most recent `init` attempt, successful or not.
    pub fn last_session_id(&self) -> Option<String> {
        (self.started > 0).then(|| format!("upload-{}", self.started))
    }

    /// Chunks appended so far in the active session.
    pub fn chunks_sent(&self) -> usize {
        match &self.state {
            SessionState::Active { chunks, .. } => *chunks,
            SessionState::Idle => 0,
        }
    }

    /// Connect and send the request head. Returns the new session id.
    ///
    /// Every attempt past the `SessionActive` check takes the next id, so a
    /// failed attempt can still be reported under
    /// [`last_session_id`](Self::last_session_id).
    ///
    /// # Errors
    /// - `SessionActive` if a session is already open. Nothing is sent.
    /// - `Transport` / `Io` on connect or write failure; the session stays `Idle`.
    pub fn init(&mut self, token: &str) -> Result<String> {
        if self.is_active() {
            return Err(VoxError::SessionActive);
        }
        self.started += 1;
        let session_id = format!("upload-{}", self.started);

        let mut stream = self
            .connector
            .connect()
            .map_err(|e| VoxError::Transport(format!("upload connect failed: {e}")))?;
        let head = format!(
            "POST {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Authorization: Bearer {token}\r\n\
             Content-Type: {ctype}\r\n\
             Transfer-Encoding: chunked\r\n\
             Connection: close\r\n\
             \r\n",
            path = self.config.path,
            host = self.connector.host_header(),
            ctype = self.config.content_type,
        );
        stream
            .write_all(head.as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| VoxError::Transport(format!("upload request failed: {e}")))?;

        info!(session_id = session_id.as_str(), path = self.config.path.as_str(), "upload session opened");
        self.state = SessionState::Active {
            stream,
            session_id: session_id.clone(),
            chunks: 0,
            bytes: 0,
        };
        Ok(session_id)
    }

    /// Send `data` as one chunk. An empty slice is ignored: a zero-length
    /// chunk would terminate the body.
    ///
    /// # Errors
    /// - `SessionInactive` without an open session.
    /// - `Transport` on write failure. The session stays `Active`; call
    ///   [`abort`](Self::abort).
    pub fn append_chunk(&mut self, data: &[u8]) -> Result<()> {
        let SessionState::Active {
            stream,
            chunks,
            bytes,
            ..
        } = &mut self.state
        else {
            return Err(VoxError::SessionInactive);
        };
        if data.is_empty() {
            debug!("ignoring empty upload chunk");
            return Ok(());
        }
        chunked::write_chunk(stream, data)
            .and_then(|_| stream.flush())
            .map_err(|e| VoxError::Transport(format!("upload chunk failed: {e}")))?;
        *chunks += 1;
        *bytes += data.len();
        Ok(())
    }

    /// Send the terminator, read the server's reply and close.
    ///
    /// The session is `Idle` when this returns, success or not.
    pub fn finish(&mut self) -> Result<UploadResponse> {
        let SessionState::Active {
            mut stream,
            session_id,
            chunks,
            bytes,
        } = std::mem::replace(&mut self.state, SessionState::Idle)
        else {
            return Err(VoxError::SessionInactive);
        };

        chunked::write_terminal(&mut stream)
            .and_then(|_| stream.flush())
            .map_err(|e| VoxError::Transport(format!("upload terminator failed: {e}")))?;

        let raw = read_response(&mut stream)?;
        let response = UploadResponse {
            raw: String::from_utf8_lossy(&raw).into_owned(),
        };
        info!(
            session_id = session_id.as_str(),
            chunks,
            bytes,
            status = ?response.status_code(),
            "upload session finished"
        );
        Ok(response)
    }

    /// Close the connection without a terminator. No-op when idle.
    pub fn abort(&mut self) {
        if let SessionState::Active {
            session_id, chunks, ..
        } = std::mem::replace(&mut self.state, SessionState::Idle)
        {
            warn!(session_id = session_id.as_str(), chunks, "upload session aborted");
        }
    }
}

/// Read until EOF, a complete `Content-Length` body, the size cap, or the
/// stream's read timeout.
fn read_response<S: Read>(stream: &mut S) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    while raw.len() < MAX_RESPONSE_BYTES {
        let want = buf.len().min(MAX_RESPONSE_BYTES - raw.len());
        match stream.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => {
                raw.extend_from_slice(&buf[..n]);
                if response_complete(&raw) {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
                    && !raw.is_empty() =>
            {
                break
            }
            Err(e) => {
                return Err(VoxError::Transport(format!("upload response failed: {e}")));
            }
        }
    }
    if raw.is_empty() {
        return Err(VoxError::Transport("server sent no upload response".into()));
    }
    Ok(raw)
}

fn response_complete(raw: &[u8]) -> bool {
    let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&raw[..end]);
    let content_length = head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    });
    match content_length {
        Some(len) => raw.len() - (end + 4) >= len,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct MemStream {
        wire: Arc<Mutex<Vec<u8>>>,
        reply: Cursor<Vec<u8>>,
        fail_writes: Arc<AtomicBool>,
    }

    impl Read for MemStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for MemStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.wire.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone)]
    struct MemConnector {
        wire: Arc<Mutex<Vec<u8>>>,
        reply: Vec<u8>,
        refuse: bool,
        fail_writes: Arc<AtomicBool>,
    }

    impl MemConnector {
        fn new(reply: &str) -> Self {
            Self {
                wire: Arc::new(Mutex::new(Vec::new())),
                reply: reply.as_bytes().to_vec(),
                refuse: false,
                fail_writes: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Connector for MemConnector {
        type Stream = MemStream;

        fn connect(&self) -> io::Result<MemStream> {
            if self.refuse {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            Ok(MemStream {
                wire: Arc::clone(&self.wire),
                reply: Cursor::new(self.reply.clone()),
                fail_writes: Arc::clone(&self.fail_writes),
            })
        }

        fn host_header(&self) -> String {
            "127.0.0.1:8080".into()
        }
    }

    const OK_REPLY: &str =
        "HTTP/1.1 200 OK\r\nContent-Length: 16\r\n\r\n{\"success\":true}";

    #[test]
    fn wire_format_is_head_chunks_terminator() {
        let connector = MemConnector::new(OK_REPLY);
        let wire = Arc::clone(&connector.wire);
        let mut session = StreamingUploadSession::new(connector, UploadConfig::default());

        let id = session.init("tok").unwrap();
        assert_eq!(id, "upload-1");
        session.append_chunk(b"abcd").unwrap();
        session.append_chunk(&[0u8; 26]).unwrap();
        assert_eq!(session.chunks_sent(), 2);
        let response = session.finish().unwrap();

        let mut expected = b"POST /api/v1/audio/stream HTTP/1.1\r\n\
Host: 127.0.0.1:8080\r\n\
Authorization: Bearer tok\r\n\
Content-Type: audio/wav\r\n\
Transfer-Encoding: chunked\r\n\
Connection: close\r\n\
\r\n"
            .to_vec();
        expected.extend_from_slice(b"4\r\nabcd\r\n");
        expected.extend_from_slice(b"1a\r\n");
        expected.extend_from_slice(&[0u8; 26]);
        expected.extend_from_slice(b"\r\n0\r\n\r\n");
        assert_eq!(*wire.lock(), expected);

        assert_eq!(response.status_code(), Some(200));
        assert!(response.is_success());
        assert_eq!(response.body(), "{\"success\":true}");
        assert!(!session.is_active());
    }

    #[test]
    fn init_while_active_fails_without_side_effects() {
        let connector = MemConnector::new(OK_REPLY);
        let wire = Arc::clone(&connector.wire);
        let mut session = StreamingUploadSession::new(connector, UploadConfig::default());
        session.init("tok").unwrap();
        let before = wire.lock().len();

        assert!(matches!(session.init("tok"), Err(VoxError::SessionActive)));
        assert_eq!(wire.lock().len(), before);
        assert_eq!(session.session_id(), Some("upload-1"));
    }

    #[test]
    fn operations_require_an_active_session() {
        let mut session =
            StreamingUploadSession::new(MemConnector::new(OK_REPLY), UploadConfig::default());
        assert!(matches!(
            session.append_chunk(b"x"),
            Err(VoxError::SessionInactive)
        ));
        assert!(matches!(session.finish(), Err(VoxError::SessionInactive)));
        session.abort();
    }

    #[test]
    fn failed_connect_stays_idle() {
        let mut connector = MemConnector::new(OK_REPLY);
        connector.refuse = true;
        let mut session = StreamingUploadSession::new(connector, UploadConfig::default());
        assert_eq!(session.last_session_id(), None);
        assert!(matches!(session.init("tok"), Err(VoxError::Transport(_))));
        assert!(!session.is_active());
        // The failed attempt still owns an id for reporting.
        assert_eq!(session.last_session_id().as_deref(), Some("upload-1"));
    }

    #[test]
    fn finish_returns_to_idle_even_when_the_reply_is_missing() {
        let connector = MemConnector::new("");
        let mut session = StreamingUploadSession::new(connector, UploadConfig::default());
        session.init("tok").unwrap();
        session.append_chunk(b"pcm").unwrap();
        assert!(session.finish().is_err());
        assert!(!session.is_active());

        // A fresh session can start right away with a new id.
        assert_eq!(session.init("tok").unwrap(), "upload-2");
    }

    #[test]
    fn empty_chunk_is_ignored() {
        let connector = MemConnector::new(OK_REPLY);
        let wire = Arc::clone(&connector.wire);
        let mut session = StreamingUploadSession::new(connector, UploadConfig::default());
        session.init("tok").unwrap();
        let before = wire.lock().len();
        session.append_chunk(&[]).unwrap();
        assert_eq!(wire.lock().len(), before);
        assert_eq!(session.chunks_sent(), 0);
    }

    #[test]
    fn failed_request_head_stays_idle() {
        let connector = MemConnector::new(OK_REPLY);
        connector.fail_writes.store(true, Ordering::SeqCst);
        let mut session = StreamingUploadSession::new(connector, UploadConfig::default());
        assert!(session.init("tok").is_err());
        assert!(!session.is_active());
    }

    #[test]
    fn failed_chunk_surfaces_and_abort_resets() {
        let connector = MemConnector::new(OK_REPLY);
        let fail = Arc::clone(&connector.fail_writes);
        let mut session = StreamingUploadSession::new(connector, UploadConfig::default());
        session.init("tok").unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            session.append_chunk(b"pcm"),
            Err(VoxError::Transport(_))
        ));
        assert!(session.is_active());
        session.abort();
        assert!(!session.is_active());
        assert_eq!(session.session_id(), None);
    }

    #[test]
    fn talks_to_a_real_socket() {
        use std::net::TcpListener;
        use std::thread;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 512];
            while !received.ends_with(b"0\r\n\r\n") {
                let n = sock.read(&mut buf).unwrap();
                assert!(n > 0, "client closed before terminator");
                received.extend_from_slice(&buf[..n]);
            }
            sock.write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok")
                .unwrap();
            received
        });

        let mut session =
            StreamingUploadSession::new(TcpConnector::new("127.0.0.1", port), UploadConfig::default());
        session.init("secret").unwrap();
        session.append_chunk(&[7u8; 300]).unwrap();
        let response = session.finish().unwrap();
        assert_eq!(response.status_code(), Some(201));
        assert_eq!(response.body(), "ok");

        let received = server.join().expect("server panicked");
        let text = String::from_utf8_lossy(&received);
        assert!(text.contains("Authorization: Bearer secret\r\n"));
        assert!(text.contains(&format!("Host: 127.0.0.1:{port}\r\n")));
        assert!(text.contains("\r\n12c\r\n"));
    }

    #[test]
    fn response_parsing_edge_cases() {
        let r = UploadResponse {
            raw: "garbage".into(),
        };
        assert_eq!(r.status_code(), None);
        assert_eq!(r.body(), "garbage");
        assert!(!r.is_success());
        assert!(!response_complete(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nab"));
        assert!(response_complete(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nab"));
    }
}
