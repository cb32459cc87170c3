use std::borrow::Cow;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use sockframe_frame::{FrameHeader, HEADER_SIZE};
use sockframe_transport::io::read_exact_ready;
use tokio::net::UnixStream;
use tracing::{debug, error, warn};

use crate::config::ConnectionContext;
use crate::error::{ConnectionError, Result};
use crate::outbound::{ConnectionCounters, OutboundConnection};

/// Receives every successfully read frame: `(connection, type, body)`.
pub type MessageHandler = Arc<dyn Fn(Arc<InboundConnection>, i64, Bytes) + Send + Sync>;

/// Receives the error that ended the read loop.
pub type ConnectionErrorHandler = Arc<dyn Fn(Arc<InboundConnection>, ConnectionError) + Send + Sync>;

const READ_HEADER_OPERATION: &str = "InboundConnection.read_header";
const READ_BODY_OPERATION: &str = "InboundConnection.read_body";

/// Position of a connection's read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// No read outstanding; waiting for `process_messages`.
    Idle,
    /// Reading the fixed-size header.
    AwaitingHeader,
    /// Reading the body declared by the last header.
    AwaitingBody,
    /// A handler is running.
    Dispatching,
    /// The loop has ended for good.
    Closed,
}

/// Outcome of header processing.
enum HeaderStep {
    ReadBody(FrameHeader, usize),
    Dispatch(ConnectionError),
    Stop,
}

/// A connection whose incoming frames are read asynchronously and handed
/// to a message handler one at a time.
///
/// The loop reads one frame per [`process_messages`](Self::process_messages)
/// call. The message handler re-arms it by calling `process_messages`
/// again; a read error ends it and is passed to the error handler.
pub struct InboundConnection {
    outbound: Arc<OutboundConnection>,
    registered: AtomicBool,
    message_handler: MessageHandler,
    error_handler: ConnectionErrorHandler,
    debug_label: String,
    message_type_names: Vec<String>,
    state: Mutex<ReadState>,
}

/// Builder for [`InboundConnection`].
pub struct InboundConnectionBuilder {
    context: Arc<ConnectionContext>,
    debug_label: String,
    message_type_names: Vec<String>,
}

impl InboundConnectionBuilder {
    /// Start a builder sharing `context`.
    pub fn new(context: Arc<ConnectionContext>) -> Self {
        Self {
            context,
            debug_label: String::new(),
            message_type_names: Vec::new(),
        }
    }

    /// Label used in diagnostics for this connection.
    pub fn debug_label(mut self, label: impl Into<String>) -> Self {
        self.debug_label = label.into();
        self
    }

    /// Human-readable names indexed by message type.
    pub fn message_type_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.message_type_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Wrap a connected runtime stream. The read loop is not started.
    pub fn build<M, E>(
        self,
        stream: UnixStream,
        on_message: M,
        on_error: E,
    ) -> Result<Arc<InboundConnection>>
    where
        M: Fn(Arc<InboundConnection>, i64, Bytes) + Send + Sync + 'static,
        E: Fn(Arc<InboundConnection>, ConnectionError) + Send + Sync + 'static,
    {
        let outbound = OutboundConnection::new(self.context, stream)?;
        Ok(Arc::new(InboundConnection {
            outbound,
            registered: AtomicBool::new(false),
            message_handler: Arc::new(on_message),
            error_handler: Arc::new(on_error),
            debug_label: self.debug_label,
            message_type_names: self.message_type_names,
            state: Mutex::new(ReadState::Idle),
        }))
    }

    /// Wrap a connected std stream, registering it with the current runtime.
    pub fn build_std<M, E>(
        self,
        stream: std::os::unix::net::UnixStream,
        on_message: M,
        on_error: E,
    ) -> Result<Arc<InboundConnection>>
    where
        M: Fn(Arc<InboundConnection>, i64, Bytes) + Send + Sync + 'static,
        E: Fn(Arc<InboundConnection>, ConnectionError) + Send + Sync + 'static,
    {
        stream.set_nonblocking(true)?;
        self.build(UnixStream::from_std(stream)?, on_message, on_error)
    }
}

impl InboundConnection {
    /// Start a builder sharing `context`.
    pub fn builder(context: Arc<ConnectionContext>) -> InboundConnectionBuilder {
        InboundConnectionBuilder::new(context)
    }

    /// Mark the peer as known. Cookie mismatches from a registered peer
    /// abort the process.
    ///
    /// # Panics
    ///
    /// Panics if the connection is already registered.
    pub fn register(&self) {
        let already = self.registered.swap(true, Ordering::AcqRel);
        assert!(!already, "[{}] connection registered twice", self.debug_label);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn debug_label(&self) -> &str {
        &self.debug_label
    }

    pub fn read_state(&self) -> ReadState {
        *self.lock_state()
    }

    /// Read and dispatch the next frame.
    ///
    /// Ignored while a read is already outstanding or after the loop has
    /// ended.
    pub fn process_messages(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            match *state {
                ReadState::Idle | ReadState::Dispatching => *state = ReadState::AwaitingHeader,
                other => {
                    debug!(label = %self.debug_label, state = ?other, "read loop not re-armed");
                    return;
                }
            }
        }
        let this = Arc::clone(self);
        self.outbound
            .spawn(async move { this.read_next_frame().await });
    }

    async fn read_next_frame(self: Arc<Self>) {
        let stats = self.outbound.context().stats();

        let mut raw = [0u8; HEADER_SIZE];
        let header = read_exact_ready(self.outbound.stream(), &mut raw)
            .await
            .map(|()| FrameHeader::decode(&raw));
        let step = stats.record_execution(READ_HEADER_OPERATION, || self.process_header(header));

        let (header, body) = match step {
            HeaderStep::Stop => return,
            HeaderStep::Dispatch(err) => {
                stats.record_execution(READ_BODY_OPERATION, || self.dispatch_error(err));
                return;
            }
            HeaderStep::ReadBody(header, length) => {
                let mut body = vec![0u8; length];
                let result = read_exact_ready(self.outbound.stream(), &mut body).await;
                (header, result.map(|()| Bytes::from(body)))
            }
        };

        stats.record_execution(READ_BODY_OPERATION, || match body {
            Ok(body) => self.dispatch_message(header.msg_type, body),
            Err(err) => self.dispatch_error(err.into()),
        });
    }

    fn process_header(&self, header: std::io::Result<FrameHeader>) -> HeaderStep {
        let header = match header {
            Ok(header) => header,
            Err(err) => return HeaderStep::Dispatch(err.into()),
        };

        if header.cookie != self.outbound.context().config().cookie {
            self.reject_cookie(header.cookie);
            return HeaderStep::Stop;
        }

        let Ok(length) = usize::try_from(header.length) else {
            return HeaderStep::Dispatch(ConnectionError::InvalidLength(header.length));
        };
        self.outbound.add_bytes_read(length as u64);
        self.set_state(ReadState::AwaitingBody);
        HeaderStep::ReadBody(header, length)
    }

    fn reject_cookie(&self, received: i64) {
        let mut message = format!(
            "cookie mismatch for received message, received cookie: {received}, debug label: {}",
            self.debug_label
        );
        let remote = self.remote_endpoint_info();
        if !remote.is_empty() {
            message.push_str(", remote endpoint info: ");
            message.push_str(&remote);
        }

        if self.is_registered() {
            error!("{message}");
            std::process::abort();
        }
        warn!("{message}");
        self.set_state(ReadState::Closed);
        self.outbound.close();
    }

    fn dispatch_error(self: &Arc<Self>, err: ConnectionError) {
        self.set_state(ReadState::Closed);
        debug!(label = %self.debug_label, error = %err, "read loop ended");
        (self.error_handler)(Arc::clone(self), err);
    }

    fn dispatch_message(self: &Arc<Self>, msg_type: i64, body: Bytes) {
        self.set_state(ReadState::Dispatching);

        let start = Instant::now();
        (self.message_handler)(Arc::clone(self), msg_type, body);
        let elapsed_ms = start.elapsed().as_millis();

        let threshold_ms = self
            .outbound
            .context()
            .config()
            .handler_warning_timeout_ms
            .max(0) as u128;
        if elapsed_ms > threshold_ms {
            warn!(
                "[{}] processing message of type {} took {} ms",
                self.debug_label,
                self.message_type_name(msg_type),
                elapsed_ms
            );
        }

        let mut state = self.lock_state();
        if *state == ReadState::Dispatching {
            *state = ReadState::Idle;
        }
    }

    /// Name for `msg_type` from the configured table, or the number itself.
    pub fn message_type_name(&self, msg_type: i64) -> Cow<'_, str> {
        usize::try_from(msg_type)
            .ok()
            .and_then(|index| self.message_type_names.get(index))
            .map(|name| Cow::Borrowed(name.as_str()))
            .unwrap_or_else(|| Cow::Owned(msg_type.to_string()))
    }

    /// Peer path and credentials, or an empty string if unavailable.
    pub fn remote_endpoint_info(&self) -> String {
        let stream = self.outbound.stream();
        let mut parts = Vec::new();
        if let Ok(addr) = stream.peer_addr() {
            if let Some(path) = addr.as_pathname() {
                parts.push(format!("path={}", path.display()));
            }
        }
        if let Ok(cred) = stream.peer_cred() {
            parts.push(format!("uid={}", cred.uid()));
            parts.push(format!("gid={}", cred.gid()));
            if let Some(pid) = cred.pid() {
                parts.push(format!("pid={pid}"));
            }
        }
        parts.join(", ")
    }

    /// The write half shared with this connection.
    pub fn outbound(&self) -> &Arc<OutboundConnection> {
        &self.outbound
    }

    /// See [`OutboundConnection::write_frame_async`].
    pub fn write_frame_async(
        &self,
        msg_type: i64,
        body: &[u8],
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.outbound.write_frame_async(msg_type, body, callback);
    }

    /// See [`OutboundConnection::write_frame_sync`].
    pub fn write_frame_sync(&self, msg_type: i64, body: &[u8]) -> Result<()> {
        self.outbound.write_frame_sync(msg_type, body)
    }

    /// See [`OutboundConnection::read_frame_sync`].
    pub fn read_frame_sync(&self, expected_type: i64) -> Result<Bytes> {
        self.outbound.read_frame_sync(expected_type)
    }

    pub fn counters(&self) -> ConnectionCounters {
        self.outbound.counters()
    }

    pub fn debug_string(&self) -> String {
        self.outbound.debug_string()
    }

    /// Shut the socket down; an outstanding read ends with an error.
    pub fn close(&self) {
        self.outbound.close();
    }

    fn set_state(&self, next: ReadState) {
        *self.lock_state() = next;
    }

    fn lock_state(&self) -> MutexGuard<'_, ReadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AsRawFd for InboundConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.outbound.as_raw_fd()
    }
}

impl std::fmt::Debug for InboundConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundConnection")
            .field("label", &self.debug_label)
            .field("registered", &self.is_registered())
            .field("state", &self.read_state())
            .finish()
    }
}
