//! Local stream socket transport for sockframe.
//!
//! This is the lowest layer: it binds, accepts and connects Unix domain
//! sockets, marks every descriptor close-on-exec, and offers the small set
//! of descriptor-level operations the connection layer builds on:
//! - blocking I/O over a nonblocking socket ([`BlockingStream`], `async` feature)
//! - readiness-driven exact reads and vectored writes ([`io`], `async` feature)
//! - a single-syscall hang-up probe across many sockets ([`probe`])

pub mod error;
#[cfg(unix)]
pub mod fd;
#[cfg(all(unix, feature = "async"))]
pub mod io;
pub mod probe;
#[cfg(all(unix, feature = "async"))]
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use probe::poll_hangups;

#[cfg(all(unix, feature = "async"))]
pub use stream::BlockingStream;
#[cfg(all(unix, feature = "async"))]
pub use uds::AsyncUnixListener;
#[cfg(unix)]
pub use uds::UnixDomainSocket;
