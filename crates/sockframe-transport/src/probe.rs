//! Bulk hang-up detection across many sockets in one syscall.

#[cfg(unix)]
pub use std::os::fd::RawFd;
/// Descriptor type accepted by [`poll_hangups`] on targets without `poll(2)`.
#[cfg(not(unix))]
pub type RawFd = i32;

/// The answer for descriptors that could not be checked.
fn no_hangups(count: usize) -> Vec<bool> {
    vec![false; count]
}

/// Report, for each descriptor, whether its peer has hung up.
///
/// Issues a single zero-timeout `poll(2)` with no requested events;
/// `POLLHUP` is always reported in `revents` when present. A failing
/// `poll` is logged and treated as "no hang-ups" so callers never act on
/// a false positive.
#[cfg(unix)]
pub fn poll_hangups(fds: &[RawFd]) -> Vec<bool> {
    let mut result = no_hangups(fds.len());
    if fds.is_empty() {
        return result;
    }

    let mut poll_fds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: 0,
            revents: 0,
        })
        .collect();

    // SAFETY: `poll_fds` is a valid, initialized array of `poll_fds.len()`
    // entries that outlives the call.
    let ret = unsafe {
        libc::poll(
            poll_fds.as_mut_ptr(),
            poll_fds.len() as libc::nfds_t,
            0,
        )
    };

    if ret > 0 {
        for (slot, pfd) in result.iter_mut().zip(&poll_fds) {
            *slot = pfd.revents & libc::POLLHUP != 0;
        }
    } else if ret < 0 {
        let err = std::io::Error::last_os_error();
        tracing::warn!(error = %err, count = fds.len(), "failed to poll connection descriptors");
    }

    result
}

/// Without descriptor multiplexing nothing is ever reported as hung up.
#[cfg(not(unix))]
pub fn poll_hangups(fds: &[RawFd]) -> Vec<bool> {
    no_hangups(fds.len())
}
