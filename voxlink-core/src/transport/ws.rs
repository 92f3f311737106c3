//! WebSocket [`Transport`] over a blocking `tungstenite` socket.
//!
//! The socket's read timeout is set to the service timeout on every poll, so
//! `service` returns within that bound whether or not a frame arrived.
//! Outbound writes are always possible on a blocking socket, so a requested
//! writable notification is delivered on the next poll.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use tungstenite::{
    client::IntoClientRequest,
    http::HeaderValue,
    protocol::WebSocket,
    Message,
};

use super::{AuthHeader, Inbound, Transport, TransportEvent};
use crate::dispatch::{MessageKind, QueuedMessage};
use crate::error::{Result, VoxError};

/// Shortest read timeout handed to the socket; zero would mean "block forever".
const MIN_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct WsConfig {
    /// `ws://host:port/path`
    pub url: String,
    pub connect_timeout: Duration,
    /// Send `ping-<unix secs>` pings at this interval. `None` disables keepalive.
    pub ping_interval: Option<Duration>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".into(),
            connect_timeout: Duration::from_secs(5),
            ping_interval: None,
        }
    }
}

pub struct WsTransport {
    config: WsConfig,
    socket: Option<WebSocket<TcpStream>>,
    pending: Vec<TransportEvent>,
    writable_requested: bool,
    last_ping: Instant,
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            socket: None,
            pending: Vec::new(),
            writable_requested: false,
            last_ping: Instant::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn maybe_ping(&mut self) -> Result<()> {
        let Some(interval) = self.config.ping_interval else {
            return Ok(());
        };
        if self.last_ping.elapsed() < interval {
            return Ok(());
        }
        self.last_ping = Instant::now();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if let Some(socket) = self.socket.as_mut() {
            socket
                .send(Message::Ping(format!("ping-{ts}").into_bytes()))
                .map_err(|e| VoxError::Transport(format!("ping failed: {e}")))?;
            debug!(ts, "keepalive ping sent");
        }
        Ok(())
    }

    fn mark_closed(&mut self, events: &mut Vec<TransportEvent>) {
        self.socket = None;
        self.writable_requested = false;
        events.push(TransportEvent::Closed);
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, auth: &AuthHeader) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| VoxError::Transport(format!("invalid url {}: {e}", self.config.url)))?;
        if request.uri().scheme_str() != Some("ws") {
            return Err(VoxError::Transport(format!(
                "unsupported scheme in {} (only ws:// is supported)",
                self.config.url
            )));
        }
        if let Some(value) = auth.header_value() {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| VoxError::Transport(format!("invalid auth header: {e}")))?;
            request.headers_mut().insert("Authorization", value);
        }

        let host = request
            .uri()
            .host()
            .ok_or_else(|| VoxError::Transport("url has no host".into()))?
            .to_string();
        let port = request.uri().port_u16().unwrap_or(80);
        let addr = (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| VoxError::Transport(format!("cannot resolve {host}")))?;

        info!(%addr, path = request.uri().path(), "connecting websocket");
        let stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout)?;
        stream.set_nodelay(true)?;

        let (socket, response) = tungstenite::client(request, stream)
            .map_err(|e| VoxError::Transport(format!("handshake failed: {e}")))?;
        info!(status = response.status().as_u16(), "websocket connected");

        self.socket = Some(socket);
        self.last_ping = Instant::now();
        self.pending.push(TransportEvent::Connected);
        Ok(())
    }

    fn request_writable(&mut self) {
        self.writable_requested = true;
    }

    fn service(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>> {
        let mut events = std::mem::take(&mut self.pending);
        if self.socket.is_none() {
            return Ok(events);
        }

        if self.writable_requested {
            self.writable_requested = false;
            events.push(TransportEvent::Writable);
        }
        if let Err(e) = self.maybe_ping() {
            warn!(error = %e, "keepalive failed");
            self.mark_closed(&mut events);
            return Ok(events);
        }

        // Don't sit on the read timeout when there is already work to report.
        let wait = if events.is_empty() { timeout } else { MIN_POLL };
        let Some(socket) = self.socket.as_mut() else {
            return Ok(events);
        };
        socket.get_ref().set_read_timeout(Some(wait.max(MIN_POLL)))?;

        match socket.read() {
            Ok(Message::Text(text)) => events.push(TransportEvent::Received(Inbound::Text(text))),
            Ok(Message::Binary(data)) => {
                events.push(TransportEvent::Received(Inbound::Binary(data)))
            }
            Ok(Message::Close(frame)) => {
                info!(?frame, "server closed websocket");
                self.mark_closed(&mut events);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                info!("websocket connection closed");
                self.mark_closed(&mut events);
            }
            Err(e) => {
                self.socket = None;
                return Err(VoxError::Transport(e.to_string()));
            }
        }
        Ok(events)
    }

    fn send(&mut self, msg: QueuedMessage) -> Result<()> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| VoxError::Transport("websocket is not connected".into()))?;
        let frame = match msg.kind() {
            MessageKind::Text => Message::Text(
                String::from_utf8(msg.into_bytes())
                    .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
            ),
            MessageKind::Binary => Message::Binary(msg.into_bytes()),
        };
        socket
            .send(frame)
            .map_err(|e| VoxError::Transport(format!("send failed: {e}")))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).and_then(|_| socket.flush()) {
                debug!(error = %e, "websocket close was not clean");
            }
        }
        self.pending.clear();
        self.writable_requested = false;
        Ok(())
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use tungstenite::handshake::server::{Request, Response};

    fn poll_until<F>(ws: &mut WsTransport, mut done: F) -> Vec<TransportEvent>
    where
        F: FnMut(&[TransportEvent]) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            seen.extend(ws.service(Duration::from_millis(20)).unwrap());
            if done(&seen) {
                return seen;
            }
        }
        panic!("timed out; events so far: {seen:?}");
    }

    #[test]
    fn handshake_carries_auth_and_messages_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut auth_seen = None;
            let mut ws = tungstenite::accept_hdr(stream, |req: &Request, resp: Response| {
                auth_seen = req
                    .headers()
                    .get("Authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            })
            .unwrap();

            let got = ws.read().unwrap();
            ws.send(Message::Text("welcome".into())).unwrap();
            ws.send(Message::Binary(vec![1, 2, 3, 4])).unwrap();
            ws.close(None).unwrap();
            // Drive the close handshake to completion.
            while ws.read().is_ok() {}
            (auth_seen, got)
        });

        let mut ws = WsTransport::new(WsConfig {
            url: format!("ws://127.0.0.1:{port}/ws"),
            ..WsConfig::default()
        });
        ws.connect(&AuthHeader::Bearer("abc".into())).unwrap();

        let events = poll_until(&mut ws, |e| e.contains(&TransportEvent::Connected));
        assert_eq!(events[0], TransportEvent::Connected);

        ws.request_writable();
        let events = poll_until(&mut ws, |e| e.contains(&TransportEvent::Writable));
        assert!(events.contains(&TransportEvent::Writable));
        ws.send(QueuedMessage::text("hello")).unwrap();

        let events = poll_until(&mut ws, |e| e.contains(&TransportEvent::Closed));
        assert!(events.contains(&TransportEvent::Received(Inbound::Text("welcome".into()))));
        assert!(events.contains(&TransportEvent::Received(Inbound::Binary(vec![1, 2, 3, 4]))));
        assert!(!ws.is_connected());

        let (auth_seen, got) = server.join().expect("server panicked");
        assert_eq!(auth_seen.as_deref(), Some("Bearer abc"));
        assert_eq!(got, Message::Text("hello".into()));
    }

    #[test]
    fn keepalive_pings_reach_the_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (ping_tx, ping_rx) = crossbeam_channel::bounded(1);

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            loop {
                match ws.read() {
                    Ok(Message::Ping(payload)) => {
                        ping_tx.send(payload).unwrap();
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => panic!("server read failed before a ping: {e}"),
                }
            }
            ws.close(None).unwrap();
            while ws.read().is_ok() {}
        });

        let mut ws = WsTransport::new(WsConfig {
            url: format!("ws://127.0.0.1:{port}/ws"),
            ping_interval: Some(Duration::from_millis(10)),
            ..WsConfig::default()
        });
        ws.connect(&AuthHeader::None).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let payload = loop {
            ws.service(Duration::from_millis(20)).unwrap();
            if let Ok(payload) = ping_rx.try_recv() {
                break payload;
            }
            assert!(Instant::now() < deadline, "no ping reached the server");
        };
        assert!(payload.starts_with(b"ping-"));
        let ts: u64 = std::str::from_utf8(&payload[5..]).unwrap().parse().unwrap();
        assert!(ts > 0);

        if ws.is_connected() {
            poll_until(&mut ws, |e| e.contains(&TransportEvent::Closed));
        }
        assert!(!ws.is_connected());
        server.join().expect("server panicked");
    }

    #[test]
    fn rejects_secure_scheme_without_tls() {
        let mut ws = WsTransport::new(WsConfig {
            url: "wss://example.invalid/ws".into(),
            ..WsConfig::default()
        });
        let err = ws.connect(&AuthHeader::None).unwrap_err();
        assert!(err.to_string().contains("only ws://"));
    }
}
