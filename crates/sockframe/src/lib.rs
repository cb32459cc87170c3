//! Length-prefixed message framing over local stream sockets.
//!
//! sockframe moves opaque, typed messages between a long-lived server and
//! its local clients. Every frame is `[cookie:i64][type:i64][length:i64][body]`
//! in native byte order.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain socket binding, readiness I/O, hang-up probing
//! - [`frame`]: wire codec plus blocking readers and writers
//! - [`conn`]: retrying connect, queued async writes, the read loop (behind `conn` feature)

/// Re-export transport types.
pub mod transport {
    pub use sockframe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use sockframe_frame::*;
}

/// Re-export connection types (requires `conn` feature).
#[cfg(feature = "conn")]
pub mod conn {
    pub use sockframe_conn::*;
}
