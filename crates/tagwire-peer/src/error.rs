use tagwire_codec::{CodecError, Tag};

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] tagwire_transport::TransportError),

    /// Frame-level error on a live socket.
    #[error("frame error: {0}")]
    Frame(#[from] tagwire_frame::FrameError),

    /// A received payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    /// An outgoing payload exceeds the configured maximum. Nothing was sent.
    #[error("payload of {size} bytes exceeds max payload size {max}")]
    PayloadTooLarge { size: u64, max: usize },

    /// The connection is not (or no longer) connected.
    #[error("connection is not connected")]
    NotConnected,

    /// `connect` or `attach` on a connection that already has a socket.
    #[error("connection is already connected")]
    AlreadyConnected,

    /// The connection was closed locally.
    #[error("connection closed")]
    Closed,

    /// Synchronous read attempted while the background reader owns the socket.
    #[error("connection is reading asynchronously")]
    AsyncReadActive,

    /// The heartbeat service is already running.
    #[error("heartbeat service is already running")]
    HeartbeatRunning,

    /// The server is already running.
    #[error("server is already running")]
    ServerRunning,

    /// The initial heartbeat after connecting could not be sent.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer disconnected or the connection was torn down for a stated reason.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The payload has no request id to stamp or read.
    #[error("payload with tag {0} does not carry a request id")]
    NotTrackable(Tag),

    /// Too many consecutive undecodable frames.
    #[error("{0} consecutive payloads failed to decode")]
    TooManyDecodeFailures(u32),

    /// A worker thread could not be started.
    #[error("failed to spawn thread: {0}")]
    Spawn(std::io::Error),
}

/// How a failure affects the connection it happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The connection has been torn down.
    TransportFatal,
    /// Only the call failed; the connection is unchanged.
    TransportLocal,
    /// One frame was dropped; the connection stays open.
    DecodeRecoverable,
    /// Misconfigured type registration or decode target.
    Registry,
    /// API used out of order.
    Misuse,
}

impl PeerError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transport(_)
            | Self::Frame(_)
            | Self::HandshakeFailed(_)
            | Self::Disconnected(_)
            | Self::TooManyDecodeFailures(_) => FailureClass::TransportFatal,
            Self::PayloadTooLarge { .. } | Self::NotConnected | Self::Closed | Self::Spawn(_) => {
                FailureClass::TransportLocal
            }
            Self::Decode(
                CodecError::DuplicateTag(_)
                | CodecError::NotAssignable { .. }
                | CodecError::AlreadyInstalled,
            )
            | Self::NotTrackable(_) => FailureClass::Registry,
            Self::Decode(_) => FailureClass::DecodeRecoverable,
            Self::AlreadyConnected
            | Self::AsyncReadActive
            | Self::HeartbeatRunning
            | Self::ServerRunning => FailureClass::Misuse,
        }
    }

    /// Whether the connection this error came from has been torn down.
    pub fn is_fatal(&self) -> bool {
        self.class() == FailureClass::TransportFatal
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
