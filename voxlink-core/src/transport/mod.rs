//! Connection seam between the service loop and the network.
//!
//! The service loop drives a [`Transport`] cooperatively: it asks for a
//! writable notification when it has something to send, then polls
//! [`Transport::service`] with a bounded timeout and reacts to the returned
//! [`TransportEvent`]s. Nothing in the pipeline blocks on the network for
//! longer than that timeout.

#[cfg(feature = "transport-ws")]
pub mod ws;

#[cfg(feature = "transport-ws")]
pub use ws::{WsConfig, WsTransport};

use std::time::Duration;

use crate::codec::base64;
use crate::dispatch::QueuedMessage;
use crate::error::Result;

/// A message received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Audio payload: raw PCM or a WAV container.
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// The connection can take one more message.
    Writable,
    Received(Inbound),
    /// The peer closed the connection or it failed. No further events follow.
    Closed,
}

/// Credentials attached to the connection handshake.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthHeader {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl AuthHeader {
    /// Value for the `Authorization` header, if any.
    pub fn header_value(&self) -> Option<String> {
        match self {
            AuthHeader::None => None,
            AuthHeader::Bearer(token) => Some(format!("Bearer {token}")),
            AuthHeader::Basic { username, password } => Some(format!(
                "Basic {}",
                base64::encode(format!("{username}:{password}").as_bytes())
            )),
        }
    }
}

impl std::fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log secrets.
        match self {
            AuthHeader::None => f.write_str("None"),
            AuthHeader::Bearer(_) => f.write_str("Bearer(***)"),
            AuthHeader::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).finish_non_exhaustive()
            }
        }
    }
}

/// Contract for the duplex message connection.
///
/// No `Send` bound: implementations are created and driven on the service thread.
pub trait Transport {
    /// Open the connection, sending `auth` with the handshake.
    fn connect(&mut self, auth: &AuthHeader) -> Result<()>;

    /// Ask for a [`TransportEvent::Writable`] on a coming `service` call.
    fn request_writable(&mut self);

    /// Wait at most `timeout` for network activity and report what happened.
    ///
    /// # Errors
    /// A connection-level failure. The caller treats the connection as closed.
    fn service(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>>;

    /// Write one message, taking ownership of its payload. Call only in
    /// response to `Writable`.
    fn send(&mut self, msg: QueuedMessage) -> Result<()>;

    /// Close the connection. Idempotent.
    fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_matches_device_default_credentials() {
        let auth = AuthHeader::Basic {
            username: "John".into(),
            password: "Doe".into(),
        };
        assert_eq!(auth.header_value().as_deref(), Some("Basic Sm9objpEb2U="));
    }

    #[test]
    fn bearer_and_none() {
        assert_eq!(
            AuthHeader::Bearer("tok".into()).header_value().as_deref(),
            Some("Bearer tok")
        );
        assert_eq!(AuthHeader::None.header_value(), None);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", AuthHeader::Bearer("s3cret".into()));
        assert!(!rendered.contains("s3cret"));
        let rendered = format!(
            "{:?}",
            AuthHeader::Basic {
                username: "John".into(),
                password: "hunter2".into()
            }
        );
        assert!(rendered.contains("John"));
        assert!(!rendered.contains("hunter2"));
    }
}
