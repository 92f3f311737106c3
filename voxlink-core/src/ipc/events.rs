//! Event types broadcast from the client to its host application.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `ServerMessageEvent` | `VoiceClient::subscribe_messages` |
//! | `ClientStatusEvent` | `VoiceClient::subscribe_status` |
//! | `UploadEvent` | `VoiceClient::subscribe_uploads` |
//! | `ActivityEvent` | `VoiceClient::subscribe_activity` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Server messages
// ---------------------------------------------------------------------------

/// A text message received from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessageEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Upload results
// ---------------------------------------------------------------------------

/// Emitted once per streaming or batch upload attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEvent {
    pub seq: u64,
    pub session_id: String,
    pub outcome: UploadOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum UploadOutcome {
    Completed {
        /// HTTP status from the response line, if one was received.
        status: Option<u16>,
        body: String,
        chunks: usize,
    },
    Failed {
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Playback activity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub seq: u64,
    pub kind: ActivityKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActivityKind {
    PlaybackStarted,
    /// `bytes` reached the device; `underflows` periods were padded with silence.
    #[serde(rename_all = "camelCase")]
    PlaybackStopped { bytes: u64, underflows: u64 },
    CaptureStarted,
    #[serde(rename_all = "camelCase")]
    CaptureStopped { bytes: u64, dropped_bytes: u64 },
}

// ---------------------------------------------------------------------------
// Client status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatusEvent {
    pub status: ClientStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the voice client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// Created, service loop not yet running.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Connected, no capture running.
    Connected,
    /// Connected and capturing microphone audio.
    Capturing,
    /// Connection closed; the service loop has exited.
    Closed,
    /// Unrecoverable error; a new client is required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_event_serializes_with_tagged_outcome() {
        let event = UploadEvent {
            seq: 4,
            session_id: "upload-1".into(),
            outcome: UploadOutcome::Completed {
                status: Some(200),
                body: "{\"success\":true}".into(),
                chunks: 12,
            },
        };

        let json = serde_json::to_value(&event).expect("serialize upload event");
        assert_eq!(json["sessionId"], "upload-1");
        assert_eq!(json["outcome"]["result"], "completed");
        assert_eq!(json["outcome"]["status"], 200);
        assert_eq!(json["outcome"]["chunks"], 12);

        let round_trip: UploadEvent =
            serde_json::from_value(json).expect("deserialize upload event");
        assert_eq!(round_trip.outcome, event.outcome);
    }

    #[test]
    fn client_status_event_serializes_with_lowercase_status() {
        let event = ClientStatusEvent {
            status: ClientStatus::Capturing,
            detail: Some("stream".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "capturing");
        assert_eq!(json["detail"], "stream");
    }

    #[test]
    fn client_status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<ClientStatus>(r#""Connected""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn activity_kind_uses_camel_case_fields() {
        let event = ActivityEvent {
            seq: 9,
            kind: ActivityKind::CaptureStopped {
                bytes: 64_000,
                dropped_bytes: 1_024,
            },
        };
        let json = serde_json::to_value(&event).expect("serialize activity event");
        assert_eq!(json["kind"]["type"], "captureStopped");
        assert_eq!(json["kind"]["droppedBytes"], 1_024);
    }
}
