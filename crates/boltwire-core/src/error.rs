//! Shared error type across boltwire crates.

use thiserror::Error;

use crate::protocol::status::ResponseStatus;

/// Stable error classification (used in logs, metrics labels and test vectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or corrupted frame. Fatal to the connection.
    Codec,
    /// Payload could not be turned into bytes.
    Serialization,
    /// Bytes could not be turned back into a payload.
    Deserialization,
    /// No response within the caller's deadline.
    Timeout,
    /// The request never left this process.
    SendFailed,
    /// The connection went away with the call outstanding.
    ConnectionClosed,
    /// Peer worker pool refused the request.
    ServerBusy,
    /// Peer handler failed.
    ServerError,
    /// No processor for the command code or request class.
    NoProcessor,
    /// Could not establish a connection.
    ConnectFailed,
    /// Invalid configuration.
    Config,
    /// Internal error.
    Internal,
}

impl ErrorKind {
    /// String representation used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Codec => "CODEC",
            ErrorKind::Serialization => "SERIALIZATION",
            ErrorKind::Deserialization => "DESERIALIZATION",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::SendFailed => "SEND_FAILED",
            ErrorKind::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorKind::ServerBusy => "SERVER_BUSY",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::NoProcessor => "NO_PROCESSOR",
            ErrorKind::ConnectFailed => "CONNECT_FAILED",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RemotingError>;

/// Unified error type used by core and remoting.
#[derive(Debug, Clone, Error)]
pub enum RemotingError {
    #[error("unsupported protocol code: {0}")]
    UnsupportedProtocol(u8),
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("codec: {0}")]
    Codec(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    #[error("invoke timed out after {timeout_ms}ms (id={id})")]
    Timeout { id: u32, timeout_ms: u64 },
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error("server thread pool busy: {0}")]
    ServerBusy(String),
    #[error("server error ({status}): {msg}")]
    ServerError { status: ResponseStatus, msg: String },
    #[error("no processor: {0}")]
    NoProcessor(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RemotingError {
    /// Map to a stable error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemotingError::UnsupportedProtocol(_)
            | RemotingError::ChecksumMismatch { .. }
            | RemotingError::FrameTooLarge { .. }
            | RemotingError::Codec(_) => ErrorKind::Codec,
            RemotingError::Serialization(_) => ErrorKind::Serialization,
            RemotingError::Deserialization(_) => ErrorKind::Deserialization,
            RemotingError::Timeout { .. } => ErrorKind::Timeout,
            RemotingError::SendFailed(_) => ErrorKind::SendFailed,
            RemotingError::ConnectionClosed(_) => ErrorKind::ConnectionClosed,
            RemotingError::ServerBusy(_) => ErrorKind::ServerBusy,
            RemotingError::ServerError { .. } => ErrorKind::ServerError,
            RemotingError::NoProcessor(_) => ErrorKind::NoProcessor,
            RemotingError::ConnectFailed(_) => ErrorKind::ConnectFailed,
            RemotingError::Config(_) => ErrorKind::Config,
            RemotingError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Framing errors leave the byte stream in an unknown state; the
    /// connection must be closed.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Codec
    }
}
