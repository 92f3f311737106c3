use thiserror::Error;

/// All errors produced by voxlink-core.
#[derive(Debug, Error)]
pub enum VoxError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("outbound queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },

    #[error("outbound queue is shut down")]
    QueueClosed,

    #[error("ring buffer is shut down")]
    RingBufferClosed,

    #[error("chunk of {len} bytes exceeds buffer capacity {capacity}")]
    ChunkTooLarge { len: usize, capacity: usize },

    #[error("upload session is already active")]
    SessionActive,

    #[error("no active upload session")]
    SessionInactive,

    #[error("capture is already running")]
    CaptureActive,

    #[error("capture is not running")]
    CaptureInactive,

    #[error("client is already running")]
    AlreadyRunning,

    #[error("client is not running")]
    NotRunning,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by orchestration to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A bounded structure refused data. Recover locally (drop, count, retry later).
    Capacity,
    /// Malformed input. Fall back to a safe default and log.
    Format,
    /// Connection-level failure. Abort the current session, keep the process.
    Transport,
    /// The target was shut down; the operation raced teardown.
    Shutdown,
    /// Audio hardware unavailable or misbehaving.
    Device,
    /// Operation issued in the wrong lifecycle state.
    State,
    Other,
}

impl VoxError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            VoxError::QueueFull { .. } | VoxError::ChunkTooLarge { .. } => ErrorCategory::Capacity,
            VoxError::Format(_) => ErrorCategory::Format,
            VoxError::Transport(_) | VoxError::Io(_) => ErrorCategory::Transport,
            VoxError::QueueClosed | VoxError::RingBufferClosed => ErrorCategory::Shutdown,
            VoxError::AudioDevice(_)
            | VoxError::AudioStream(_)
            | VoxError::NoDefaultInputDevice
            | VoxError::NoDefaultOutputDevice => ErrorCategory::Device,
            VoxError::SessionActive
            | VoxError::SessionInactive
            | VoxError::CaptureActive
            | VoxError::CaptureInactive
            | VoxError::AlreadyRunning
            | VoxError::NotRunning => ErrorCategory::State,
            VoxError::Other(_) => ErrorCategory::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, VoxError>;
