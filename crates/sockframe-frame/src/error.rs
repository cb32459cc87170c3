/// Errors that can occur while encoding, decoding or transferring frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame cookie does not match the configured protocol cookie.
    #[error("cookie mismatch for received message, received cookie: {received} (expected {expected})")]
    CookieMismatch { received: i64, expected: i64 },

    /// The frame carries a different message type than the caller expects.
    #[error("connection corrupted, expected message type: {expected}, received message type: {received}")]
    TypeMismatch { expected: i64, received: i64 },

    /// The frame header declares a negative body length.
    #[error("invalid frame length {0}")]
    NegativeLength(i64),

    /// The body exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was transferred.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
