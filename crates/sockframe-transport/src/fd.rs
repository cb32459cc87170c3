//! Descriptor-level helpers shared by listeners, streams and probes.

use std::io;
use std::os::fd::RawFd;

/// Flags for every socket send: a dead peer must surface as `EPIPE`, never
/// as `SIGPIPE`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) const SEND_FLAGS: libc::c_int = 0;

/// Mark a descriptor close-on-exec so child processes never inherit it.
pub fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFD/F_SETFD only touch the descriptor flags of `fd`; an
    // invalid descriptor is reported through the return value.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::FD_CLOEXEC != 0 {
        return Ok(());
    }
    // SAFETY: see above.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Shut down both directions of a connected socket.
///
/// The descriptor stays open; pending and future reads observe EOF and
/// writes fail with `EPIPE`.
pub fn shutdown(fd: RawFd) -> io::Result<()> {
    // SAFETY: shutdown(2) does not touch memory; errors come back as -1.
    let rc = unsafe { libc::shutdown(fd, libc::SHUT_RDWR) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        // Already disconnected is not an error for a close request.
        if err.raw_os_error() == Some(libc::ENOTCONN) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

/// Block the calling thread until `fd` reports one of `events`.
///
/// Hang-up and error conditions also wake the caller; the following
/// read or write surfaces the actual error. `EINTR` restarts the wait.
pub fn wait_ready(fd: RawFd, events: libc::c_short) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    loop {
        // SAFETY: `pfd` is a valid pollfd and the count passed is 1.
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}
