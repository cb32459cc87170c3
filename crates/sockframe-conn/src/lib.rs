//! Framed connections over local stream sockets.
//!
//! This is the layer servers and clients actually hold. It provides:
//! - [`connect_retry`]: fixed-interval connection establishment
//! - [`OutboundConnection`]: blocking framed reads/writes plus a queued,
//!   strictly ordered asynchronous write path with a broken-pipe latch
//! - [`InboundConnection`]: an asynchronous read loop that decodes one
//!   frame at a time and dispatches it to the owner's handler
//! - [`check_disconnects`]: hang-up detection across many connections in
//!   one syscall
//!
//! Every connection is shared as an `Arc`; each in-flight operation holds
//! its own strong reference, so a connection always outlives the I/O it
//! has scheduled.

pub mod config;
pub mod connect;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod probe;
pub mod stats;

pub use config::{ConfigError, ConnectionConfig, ConnectionContext};
pub use connect::{connect_retry, connect_retry_async, RetryPolicy};
pub use error::{ConnectionError, Result};
pub use inbound::{
    ConnectionErrorHandler, InboundConnection, InboundConnectionBuilder, MessageHandler, ReadState,
};
pub use outbound::{ConnectionCounters, OutboundConnection, WriteCallback};
pub use probe::check_disconnects;
pub use stats::{EventStats, OperationStats};
