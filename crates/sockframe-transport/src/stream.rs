use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsRawFd;

use tokio::net::UnixStream;

use crate::fd::{wait_ready, SEND_FLAGS};

/// Blocking `Read`/`Write` view of a runtime-registered socket.
///
/// The socket stays nonblocking; when the kernel reports `WouldBlock` the
/// calling thread parks in `poll(2)` until the descriptor is ready again.
/// The syscalls go straight to the descriptor, so the runtime's readiness
/// cache never gates a blocking transfer.
/// Intended for synchronous request/response exchanges on a thread that
/// is not driving the runtime.
pub struct BlockingStream<'a> {
    stream: &'a UnixStream,
}

impl<'a> BlockingStream<'a> {
    /// Wrap a borrowed stream.
    pub fn new(stream: &'a UnixStream) -> Self {
        Self { stream }
    }
}

impl Read for BlockingStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.stream.as_raw_fd();
        loop {
            // SAFETY: `buf` is valid for `buf.len()` writable bytes and `fd`
            // is kept open by the borrowed stream.
            let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if rc >= 0 {
                return Ok(rc as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != ErrorKind::WouldBlock {
                return Err(err);
            }
            wait_ready(fd, libc::POLLIN)?;
        }
    }
}

impl Write for BlockingStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let fd = self.stream.as_raw_fd();
        loop {
            // SAFETY: `buf` is valid for `buf.len()` readable bytes and `fd`
            // is kept open by the borrowed stream.
            let rc = unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), SEND_FLAGS) };
            if rc >= 0 {
                return Ok(rc as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != ErrorKind::WouldBlock {
                return Err(err);
            }
            wait_ready(fd, libc::POLLOUT)?;
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for BlockingStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingStream")
            .field("fd", &self.stream.as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (UnixStream, UnixStream) {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();
        right.set_nonblocking(true).unwrap();
        (
            UnixStream::from_std(left).unwrap(),
            UnixStream::from_std(right).unwrap(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_read_waits_for_data() {
        let (left, right) = pair();

        let reader = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 5];
            BlockingStream::new(&right).read_exact(&mut buf).unwrap();
            buf
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        BlockingStream::new(&left).write_all(b"later").unwrap();

        assert_eq!(&reader.await.unwrap(), b"later");
    }

    #[tokio::test]
    async fn read_after_peer_close_is_eof() {
        let (left, right) = pair();
        drop(left);

        let mut buf = [0u8; 1];
        assert_eq!(BlockingStream::new(&right).read(&mut buf).unwrap(), 0);
    }
}
