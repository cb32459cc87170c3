use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use sockframe_transport::poll_hangups;

/// Report, per connection, whether the peer has hung up.
///
/// All descriptors are checked with one non-blocking readiness poll. A
/// failed poll is logged and reports no disconnects.
pub fn check_disconnects<C: AsRawFd>(connections: &[Arc<C>]) -> Vec<bool> {
    let fds: Vec<RawFd> = connections.iter().map(|conn| conn.as_raw_fd()).collect();
    poll_hangups(&fds)
}
