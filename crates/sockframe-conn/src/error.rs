use std::sync::Arc;

use sockframe_frame::FrameError;
use sockframe_transport::TransportError;

/// Errors surfaced by connection operations.
///
/// Cheap to clone: a single asynchronous write batch hands the same result
/// to every callback in the batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    /// Platform I/O failure on the socket.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// A frame arrived with the wrong protocol cookie.
    #[error("cookie mismatch for received message, received cookie: {received}")]
    CookieMismatch { received: i64 },

    /// A blocking read received a different message type than requested.
    #[error("connection corrupted, expected message type: {expected}, received message type: {received}")]
    TypeMismatch { expected: i64, received: i64 },

    /// A frame header declared an unusable body length.
    #[error("invalid frame length {0}")]
    InvalidLength(i64),

    /// The peer stopped reading; latched for the rest of the connection.
    #[error("broken pipe")]
    BrokenPipe,

    /// The local connection was torn down before the operation could run.
    /// Peer hang-ups surface as `Io` with `UnexpectedEof` instead.
    #[error("connection closed")]
    Closed,

    /// `connect_retry` was asked for zero attempts.
    #[error("connect retry count must not be zero")]
    InvalidRetryCount,
}

impl ConnectionError {
    /// Whether this is the latched broken-pipe condition.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, ConnectionError::BrokenPipe)
    }

    /// The I/O error kind, if this error came from the transport.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            ConnectionError::Io(err) => Some(err.kind()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe => ConnectionError::BrokenPipe,
            _ => ConnectionError::Io(Arc::new(err)),
        }
    }
}

impl From<FrameError> for ConnectionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::CookieMismatch { received, .. } => {
                ConnectionError::CookieMismatch { received }
            }
            FrameError::TypeMismatch { expected, received } => {
                ConnectionError::TypeMismatch { expected, received }
            }
            FrameError::NegativeLength(length) => ConnectionError::InvalidLength(length),
            FrameError::Io(io) => io.into(),
            FrameError::ConnectionClosed => ConnectionError::Io(Arc::new(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ))),
            other @ FrameError::PayloadTooLarge { .. } => ConnectionError::Io(Arc::new(
                std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
            )),
        }
    }
}

impl From<TransportError> for ConnectionError {
    fn from(err: TransportError) -> Self {
        err.into_io().into()
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
