//! Length-prefixed message framing for sockframe.
//!
//! Every message travels as one frame:
//! - an 8-byte protocol cookie shared by both ends
//! - an 8-byte application message type
//! - an 8-byte body length
//! - the body itself
//!
//! All integers are native-endian `i64` with no padding. Readers never
//! consume past the end of the frame they are reading, so blocking and
//! asynchronous consumers can take turns on one socket.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, FrameHeader, DEFAULT_COOKIE, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::FrameCodec;
