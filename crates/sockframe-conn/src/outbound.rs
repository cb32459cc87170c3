use std::collections::VecDeque;
use std::fmt::Write as _;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use sockframe_frame::{FrameReader, FrameWriter};
use sockframe_transport::fd::{set_cloexec, shutdown};
use sockframe_transport::io::write_all_ready;
use sockframe_transport::BlockingStream;
use tokio::net::UnixStream;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::config::ConnectionContext;
use crate::error::{ConnectionError, Result};

/// Completion callback for one asynchronous write. Invoked exactly once.
pub type WriteCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

const WRITE_ASYNC_OPERATION: &str = "OutboundConnection.write_async";

/// One queued asynchronous write.
struct PendingWrite {
    msg_type: i64,
    body: Bytes,
    callback: WriteCallback,
}

#[derive(Default)]
struct WriteQueue {
    pending: VecDeque<PendingWrite>,
    in_flight: bool,
    broken_pipe: bool,
}

/// Traffic counters for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionCounters {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub async_writes: u64,
    pub sync_writes: u64,
    pub writing: bool,
    pub pending_async_bytes: u64,
}

/// Owner of one connected socket, with blocking and queued asynchronous
/// framed writes.
///
/// Asynchronous writes complete in submission order and at most one
/// transport write is outstanding at a time. After a broken pipe every
/// later batch fails with [`ConnectionError::BrokenPipe`] without
/// touching the socket. Dropping the connection fails anything still
/// queued with [`ConnectionError::Closed`].
pub struct OutboundConnection {
    stream: UnixStream,
    context: Arc<ConnectionContext>,
    runtime: Handle,
    queue: Mutex<WriteQueue>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    async_writes: AtomicU64,
    sync_writes: AtomicU64,
    closed: AtomicBool,
}

impl OutboundConnection {
    /// Wrap a connected runtime stream. Must be called within a tokio runtime.
    pub fn new(context: Arc<ConnectionContext>, stream: UnixStream) -> Result<Arc<Self>> {
        Self::build(context, stream).map(Arc::new)
    }

    /// Wrap a connected std stream, registering it with the current runtime.
    pub fn from_std(
        context: Arc<ConnectionContext>,
        stream: std::os::unix::net::UnixStream,
    ) -> Result<Arc<Self>> {
        stream.set_nonblocking(true)?;
        Self::new(context, UnixStream::from_std(stream)?)
    }

    pub(crate) fn build(context: Arc<ConnectionContext>, stream: UnixStream) -> Result<Self> {
        set_cloexec(stream.as_raw_fd())?;
        Ok(Self {
            stream,
            context,
            runtime: Handle::try_current().map_err(|err| {
                ConnectionError::from(std::io::Error::other(err.to_string()))
            })?,
            queue: Mutex::new(WriteQueue::default()),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            async_writes: AtomicU64::new(0),
            sync_writes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Write one frame, blocking the calling thread until it is sent.
    ///
    /// Do not call from a runtime worker while asynchronous writes are
    /// pending on the same connection.
    pub fn write_frame_sync(&self, msg_type: i64, body: &[u8]) -> Result<()> {
        self.sync_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(body.len() as u64, Ordering::Relaxed);

        let mut writer = FrameWriter::with_config(
            BlockingStream::new(&self.stream),
            self.context.config().frame_config(),
        );
        writer.write_message(msg_type, body)?;
        Ok(())
    }

    /// Read one frame of `expected_type`, blocking the calling thread.
    pub fn read_frame_sync(&self, expected_type: i64) -> Result<Bytes> {
        let mut reader = FrameReader::with_config(
            BlockingStream::new(&self.stream),
            self.context.config().frame_config(),
        );
        Ok(reader.read_message(expected_type)?)
    }

    /// Queue one frame for writing and return immediately.
    ///
    /// `body` is copied. `callback` runs once the frame has been written
    /// or has failed.
    pub fn write_frame_async(
        self: &Arc<Self>,
        msg_type: i64,
        body: &[u8],
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.async_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(body.len() as u64, Ordering::Relaxed);

        let request = PendingWrite {
            msg_type,
            body: Bytes::copy_from_slice(body),
            callback: Box::new(callback),
        };

        let start_flush = {
            let mut queue = self.lock_queue();
            let depth = queue.pending.len();
            if depth > self.context.config().queue_warning_threshold && depth.is_power_of_two() {
                warn!("connection has {depth} buffered async writes");
            }
            queue.pending.push_back(request);
            !std::mem::replace(&mut queue.in_flight, true)
        };

        if start_flush {
            let this = Arc::clone(self);
            self.runtime.spawn(async move { this.flush_queue().await });
        }
    }

    /// Drain the queue one batch at a time. Runs with `in_flight` set.
    async fn flush_queue(self: Arc<Self>) {
        let max_messages = self.context.config().async_write_max_messages.max(1);
        let cookie = self.context.config().cookie;

        loop {
            let (mut segments, batch_len, broken_pipe) = {
                let queue = self.lock_queue();
                let mut segments = Vec::new();
                let mut batch_len = 0usize;
                for request in queue.pending.iter().take(max_messages) {
                    segments.push(Bytes::copy_from_slice(&cookie.to_ne_bytes()));
                    segments.push(Bytes::copy_from_slice(&request.msg_type.to_ne_bytes()));
                    segments.push(Bytes::copy_from_slice(
                        &(request.body.len() as i64).to_ne_bytes(),
                    ));
                    segments.push(request.body.clone());
                    batch_len += 1;
                }
                (segments, batch_len, queue.broken_pipe)
            };

            let result = if broken_pipe {
                Err(ConnectionError::BrokenPipe)
            } else {
                match write_all_ready(&self.stream, &mut segments).await {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        let err = ConnectionError::from(err);
                        if err.is_broken_pipe() {
                            error!("broken pipe while flushing async writes");
                            self.lock_queue().broken_pipe = true;
                        } else {
                            error!(error = %err, "error while flushing async writes");
                        }
                        Err(err)
                    }
                }
            };

            let batch: Vec<PendingWrite> = {
                let mut queue = self.lock_queue();
                let n = batch_len.min(queue.pending.len());
                queue.pending.drain(..n).collect()
            };
            self.context.stats().record_execution(WRITE_ASYNC_OPERATION, || {
                for request in batch {
                    (request.callback)(result.clone());
                }
            });

            let mut queue = self.lock_queue();
            if queue.pending.is_empty() {
                queue.in_flight = false;
                return;
            }
        }
    }

    /// Shut the socket down in both directions.
    ///
    /// Pending reads see EOF and later writes fail; queued callbacks are
    /// still delivered.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = shutdown(self.stream.as_raw_fd()) {
            debug!(error = %err, "shutdown failed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the broken-pipe latch is set.
    pub fn is_broken_pipe(&self) -> bool {
        self.lock_queue().broken_pipe
    }

    /// Snapshot of the traffic counters and queue state.
    pub fn counters(&self) -> ConnectionCounters {
        let queue = self.lock_queue();
        ConnectionCounters {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            async_writes: self.async_writes.load(Ordering::Relaxed),
            sync_writes: self.sync_writes.load(Ordering::Relaxed),
            writing: queue.in_flight,
            pending_async_bytes: queue
                .pending
                .iter()
                .map(|request| request.body.len() as u64)
                .sum(),
        }
    }

    /// Multi-line counter dump for operational logs.
    pub fn debug_string(&self) -> String {
        let counters = self.counters();
        let mut out = String::new();
        let _ = write!(out, "\n- bytes read: {}", counters.bytes_read);
        let _ = write!(out, "\n- bytes written: {}", counters.bytes_written);
        let _ = write!(out, "\n- num async writes: {}", counters.async_writes);
        let _ = write!(out, "\n- num sync writes: {}", counters.sync_writes);
        let _ = write!(out, "\n- writing: {}", counters.writing);
        let _ = write!(out, "\n- pending async bytes: {}", counters.pending_async_bytes);
        out
    }

    /// The shared context this connection was created with.
    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }

    pub(crate) fn stream(&self) -> &UnixStream {
        &self.stream
    }

    pub(crate) fn add_bytes_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    fn lock_queue(&self) -> MutexGuard<'_, WriteQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AsRawFd for OutboundConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Drop for OutboundConnection {
    fn drop(&mut self) {
        let queue = self.queue.get_mut().unwrap_or_else(PoisonError::into_inner);
        let pending = std::mem::take(&mut queue.pending);
        if !pending.is_empty() {
            debug!(count = pending.len(), "failing queued writes on drop");
        }
        for request in pending {
            (request.callback)(Err(ConnectionError::Closed));
        }
    }
}

impl std::fmt::Debug for OutboundConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundConnection")
            .field("fd", &self.stream.as_raw_fd())
            .field("counters", &self.counters())
            .finish()
    }
}
