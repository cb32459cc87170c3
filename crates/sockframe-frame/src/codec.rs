use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Size of one header field.
pub const FIELD_SIZE: usize = std::mem::size_of::<i64>();

/// Frame header: cookie (8) + type (8) + length (8) = 24 bytes.
pub const HEADER_SIZE: usize = 3 * FIELD_SIZE;

/// Default protocol cookie: the ASCII bytes "SOCKFRM1".
pub const DEFAULT_COOKIE: i64 = i64::from_be_bytes(*b"SOCKFRM1");

/// The fixed-size prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol cookie; must equal the configured cookie.
    pub cookie: i64,
    /// Application-defined message type.
    pub msg_type: i64,
    /// Exact byte length of the body that follows.
    pub length: i64,
}

impl FrameHeader {
    /// Header for a body of `length` bytes.
    pub fn new(cookie: i64, msg_type: i64, length: usize) -> Self {
        Self {
            cookie,
            msg_type,
            length: length as i64,
        }
    }

    /// Native-endian wire bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..FIELD_SIZE].copy_from_slice(&self.cookie.to_ne_bytes());
        out[FIELD_SIZE..2 * FIELD_SIZE].copy_from_slice(&self.msg_type.to_ne_bytes());
        out[2 * FIELD_SIZE..].copy_from_slice(&self.length.to_ne_bytes());
        out
    }

    /// Parse native-endian wire bytes. Performs no validation.
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Self {
        let field = |i: usize| {
            let mut bytes = [0u8; FIELD_SIZE];
            bytes.copy_from_slice(&raw[i * FIELD_SIZE..(i + 1) * FIELD_SIZE]);
            i64::from_ne_bytes(bytes)
        };
        Self {
            cookie: field(0),
            msg_type: field(1),
            length: field(2),
        }
    }

    /// Check the cookie and length against `config`, returning the body
    /// length as a `usize`.
    pub fn validate(&self, config: &FrameConfig) -> Result<usize> {
        if self.cookie != config.cookie {
            return Err(FrameError::CookieMismatch {
                received: self.cookie,
                expected: config.cookie,
            });
        }
        if self.length < 0 {
            return Err(FrameError::NegativeLength(self.length));
        }
        let length = usize::try_from(self.length).map_err(|_| FrameError::PayloadTooLarge {
            size: usize::MAX,
            max: config.max_payload_size.unwrap_or(usize::MAX),
        })?;
        if let Some(max) = config.max_payload_size {
            if length > max {
                return Err(FrameError::PayloadTooLarge { size: length, max });
            }
        }
        Ok(length)
    }
}

/// A complete message: type tag plus opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Application-defined message type.
    pub msg_type: i64,
    /// The message body.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(msg_type: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Protocol parameters shared by readers, writers and codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Cookie written into, and required on, every frame.
    pub cookie: i64,
    /// Optional cap on body size. `None` accepts any declared length.
    pub max_payload_size: Option<usize>,
}

impl FrameConfig {
    /// Configuration with the given cookie and no size cap.
    pub fn with_cookie(cookie: i64) -> Self {
        Self {
            cookie,
            max_payload_size: None,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::with_cookie(DEFAULT_COOKIE)
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (native byte order, no padding):
/// ```text
/// ┌──────────────┬──────────────┬──────────────┬─────────────────┐
/// │ Cookie (8B)  │ Type (8B)    │ Length (8B)  │ Body            │
/// │ i64          │ i64          │ i64          │ (Length bytes)  │
/// └──────────────┴──────────────┴──────────────┴─────────────────┘
/// ```
pub fn encode_frame(cookie: i64, msg_type: i64, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&FrameHeader::new(cookie, msg_type, payload.len()).encode());
    dst.put_slice(payload);
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&src[..HEADER_SIZE]);
    let header = FrameHeader::decode(&raw);
    let length = header.validate(config)?;

    if src.len() - HEADER_SIZE < length {
        src.reserve(HEADER_SIZE + length - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(length).freeze();

    Ok(Some(Frame {
        msg_type: header.msg_type,
        payload,
    }))
}
