//! Messages held by the outbound queue.

/// Payloads up to this many bytes are stored in the queue slot itself.
pub const INLINE_PAYLOAD_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

// Inline payloads occupy the queue slot itself.
#[allow(clippy::large_enum_variant)]
#[derive(Clone)]
pub(crate) enum Payload {
    Inline {
        bytes: [u8; INLINE_PAYLOAD_CAPACITY],
        len: usize,
    },
    External(Vec<u8>),
}

impl Payload {
    pub(crate) fn from_slice(data: &[u8]) -> Self {
        if data.len() <= INLINE_PAYLOAD_CAPACITY {
            let mut bytes = [0u8; INLINE_PAYLOAD_CAPACITY];
            bytes[..data.len()].copy_from_slice(data);
            Payload::Inline {
                bytes,
                len: data.len(),
            }
        } else {
            Payload::External(data.to_vec())
        }
    }

    /// Like [`from_slice`](Self::from_slice), but a large buffer is moved in as-is.
    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        if data.len() <= INLINE_PAYLOAD_CAPACITY {
            Self::from_slice(&data)
        } else {
            Payload::External(data)
        }
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Inline { bytes, len } => &bytes[..*len],
            Payload::External(v) => v,
        }
    }
}

/// One outbound message. Ownership moves to the consumer on dequeue.
#[derive(Clone)]
pub struct QueuedMessage {
    kind: MessageKind,
    payload: Payload,
}

impl QueuedMessage {
    pub fn text(text: &str) -> Self {
        Self {
            kind: MessageKind::Text,
            payload: Payload::from_slice(text.as_bytes()),
        }
    }

    pub fn binary(data: &[u8]) -> Self {
        Self {
            kind: MessageKind::Binary,
            payload: Payload::from_slice(data),
        }
    }

    /// Binary message from an owned buffer. Payloads above
    /// [`INLINE_PAYLOAD_CAPACITY`] keep their allocation.
    pub fn binary_owned(data: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Binary,
            payload: Payload::from_vec(data),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the payload lives in the queue slot rather than on the heap.
    pub fn is_inline(&self) -> bool {
        matches!(self.payload, Payload::Inline { .. })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    /// The payload as UTF-8 for text messages; `None` for binary ones.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Text => std::str::from_utf8(self.as_bytes()).ok(),
            MessageKind::Binary => None,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self.payload {
            Payload::Inline { bytes, len } => bytes[..len].to_vec(),
            Payload::External(v) => v,
        }
    }
}

impl std::fmt::Debug for QueuedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedMessage")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .field("inline", &self.is_inline())
            .finish()
    }
}
