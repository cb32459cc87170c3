//! Readiness-driven whole-buffer I/O over a shared tokio [`UnixStream`].
//!
//! Both helpers take `&UnixStream`, so one connection can keep a read and
//! a write outstanding at the same time without splitting the socket.
//! Partial transfers, `WouldBlock` and `Interrupted` are absorbed here;
//! callers only ever see a complete transfer or a hard error.

use std::io::{self, ErrorKind, IoSlice};
use std::os::fd::AsRawFd;

use bytes::{Buf, Bytes};
use tokio::io::Interest;
use tokio::net::UnixStream;

use crate::fd::SEND_FLAGS;

/// Upper bound on iovecs handed to a single `writev(2)`.
const MAX_IOVECS: usize = 64;

/// Fill `buf` completely from `stream`.
///
/// EOF before the buffer is full is reported as `UnexpectedEof`.
pub async fn read_exact_ready(stream: &UnixStream, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0usize;
    while filled < buf.len() {
        stream.readable().await?;
        match stream.try_read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ))
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Write every segment, in order, with as few `writev(2)` calls as the
/// socket allows.
///
/// Segments are consumed as they are written. Returns the number of bytes
/// transferred. Writes go through `sendmsg(2)` with `MSG_NOSIGNAL` where the
/// platform has it, so a closed peer yields `BrokenPipe` even when the
/// process has not ignored `SIGPIPE`.
pub async fn write_all_ready(stream: &UnixStream, segments: &mut [Bytes]) -> io::Result<usize> {
    let mut total = 0usize;
    let mut first = 0usize;
    loop {
        while first < segments.len() && segments[first].is_empty() {
            first += 1;
        }
        if first == segments.len() {
            return Ok(total);
        }

        stream.writable().await?;
        let written = {
            let slices: Vec<IoSlice<'_>> = segments[first..]
                .iter()
                .filter(|segment| !segment.is_empty())
                .take(MAX_IOVECS)
                .map(|segment| IoSlice::new(segment))
                .collect();
            match send_vectored(stream, &slices) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ))
                }
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        };

        total += written;
        advance_segments(&mut segments[first..], written);
    }
}

fn send_vectored(stream: &UnixStream, slices: &[IoSlice<'_>]) -> io::Result<usize> {
    stream.try_io(Interest::WRITABLE, || {
        // SAFETY: an all-zero `msghdr` is a valid empty message header.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        // `IoSlice` is ABI compatible with `iovec`; sendmsg only reads it.
        msg.msg_iov = slices.as_ptr() as *mut libc::iovec;
        msg.msg_iovlen = slices.len() as _;
        // SAFETY: `msg` points at `slices`, which outlives the call, and the
        // descriptor is kept open by the borrowed stream.
        let rc = unsafe { libc::sendmsg(stream.as_raw_fd(), &msg, SEND_FLAGS) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    })
}

fn advance_segments(segments: &mut [Bytes], mut n: usize) {
    for segment in segments {
        if n == 0 {
            return;
        }
        let step = n.min(segment.len());
        segment.advance(step);
        n -= step;
    }
}
