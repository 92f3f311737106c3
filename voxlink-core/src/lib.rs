//! # voxlink-core
//!
//! Edge voice client SDK: a bidirectional voice/text session with a server.
//!
//! ## Architecture
//!
//! ```text
//! send_text / relay capture ─► OutboundQueue ─► (Writable) ─► Transport
//!                                                                 │
//!                         Service loop (spawn_blocking) ◄─────────┘
//!                             │            │             │
//!                      text  ▼     binary ▼      Stream ▼
//!        broadcast::Sender<ServerMessageEvent>  RingBuffer   StreamingUploadSession
//!                                              │              (chunked HTTP POST)
//!                                     pull callback ─► speaker
//! ```
//!
//! Device callbacks never allocate on the playback path and never block.
//! Every bounded structure either rejects (queue), drops (capture buffer) or
//! waits with a deadline (playback ring) when full.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod transport;
pub mod upload;

// Convenience re-exports for downstream crates
pub use audio::{AudioDevice, AudioFormat, PlaybackSource, SampleEncoding};
pub use buffering::{CaptureBuffer, RingBuffer};
pub use dispatch::{MessageKind, OutboundQueue, QueuedMessage};
pub use engine::pipeline::DiagnosticsSnapshot;
pub use engine::{CaptureMode, ClientConfig, PlaybackMode, Recording, VoiceClient};
pub use error::{ErrorCategory, Result, VoxError};
pub use ipc::events::{
    ActivityEvent, ActivityKind, ClientStatus, ClientStatusEvent, ServerMessageEvent, UploadEvent,
    UploadOutcome,
};
pub use transport::{AuthHeader, Inbound, Transport, TransportEvent};
pub use upload::{Connector, StreamingUploadSession, TcpConnector, UploadConfig, UploadResponse};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalDevice;

#[cfg(feature = "transport-ws")]
pub use transport::ws::{WsConfig, WsTransport};
