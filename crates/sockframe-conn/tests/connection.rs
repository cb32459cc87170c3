use std::io::{Read, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sockframe_conn::{
    check_disconnects, connect_retry, connect_retry_async, ConnectionConfig, ConnectionContext,
    ConnectionError, InboundConnection, OutboundConnection, ReadState,
};
use sockframe_frame::{FrameConfig, FrameHeader, FrameWriter, DEFAULT_COOKIE};
use sockframe_transport::UnixDomainSocket;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;

fn context(config: ConnectionConfig) -> Arc<ConnectionContext> {
    ConnectionContext::new(config)
}

fn pair() -> (StdUnixStream, StdUnixStream) {
    StdUnixStream::pair().expect("socket pair")
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Inbound connection that forwards frames to a channel and re-arms itself.
fn forwarding_inbound(
    ctx: Arc<ConnectionContext>,
    stream: StdUnixStream,
    names: &[&str],
) -> (
    Arc<InboundConnection>,
    mpsc::UnboundedReceiver<(i64, Bytes)>,
    mpsc::UnboundedReceiver<ConnectionError>,
) {
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let (err_tx, err_rx) = mpsc::unbounded_channel();
    let conn = InboundConnection::builder(ctx)
        .debug_label("worker")
        .message_type_names(names.iter().copied())
        .build_std(
            stream,
            move |conn: Arc<InboundConnection>, msg_type, body| {
                let _ = msg_tx.send((msg_type, body));
                conn.process_messages();
            },
            move |_conn, err| {
                let _ = err_tx.send(err);
            },
        )
        .expect("inbound connection");
    (conn, msg_rx, err_rx)
}

#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_logs(level: tracing::Level) -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(level)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

fn capture_warnings() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    capture_logs(tracing::Level::WARN)
}

#[tokio::test]
async fn async_writes_arrive_and_complete_in_submission_order() {
    let ctx = context(ConnectionConfig {
        async_write_max_messages: 8,
        ..ConnectionConfig::default()
    });
    let (left, right) = pair();
    let writer = OutboundConnection::from_std(Arc::clone(&ctx), left).expect("outbound");
    let (reader, mut messages, _errors) = forwarding_inbound(ctx, right, &[]);
    reader.process_messages();

    let completions = Arc::new(Mutex::new(Vec::new()));
    for i in 0..100i64 {
        let completions = Arc::clone(&completions);
        let body = format!("message-{i}");
        writer.write_frame_async(i, body.as_bytes(), move |result| {
            completions.lock().expect("completions").push((i, result.is_ok()));
        });
    }

    for i in 0..100i64 {
        let (msg_type, body) = messages.recv().await.expect("message");
        assert_eq!(msg_type, i);
        assert_eq!(body.as_ref(), format!("message-{i}").as_bytes());
    }

    wait_until("all completions", || {
        completions.lock().expect("completions").len() == 100
    })
    .await;
    let completions = completions.lock().expect("completions").clone();
    assert_eq!(completions, (0..100).map(|i| (i, true)).collect::<Vec<_>>());

    let counters = writer.counters();
    assert_eq!(counters.async_writes, 100);
    assert!(!counters.writing);
    assert_eq!(counters.pending_async_bytes, 0);
    assert_eq!(reader.counters().bytes_read, counters.bytes_written);
}

#[tokio::test]
async fn broken_pipe_is_latched_for_queued_and_later_writes() {
    let (left, right) = pair();
    let conn =
        OutboundConnection::from_std(context(ConnectionConfig::default()), left).expect("outbound");
    drop(right);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let first = tx.clone();
    conn.write_frame_async(1, b"lost", move |result| {
        let _ = first.send((0, result));
    });
    let (_, result) = rx.recv().await.expect("first completion");
    assert!(matches!(result, Err(ConnectionError::BrokenPipe)));
    assert!(conn.is_broken_pipe());

    for i in 1..=5 {
        let tx = tx.clone();
        conn.write_frame_async(1, b"after", move |result| {
            let _ = tx.send((i, result));
        });
    }
    drop(tx);

    let mut order = Vec::new();
    while let Some((i, result)) = rx.recv().await {
        assert!(matches!(result, Err(ConnectionError::BrokenPipe)));
        order.push(i);
    }
    assert_eq!(order, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn unregistered_cookie_mismatch_closes_without_dispatch() {
    let (capture, _guard) = capture_warnings();
    let (left, right) = pair();
    let (conn, mut messages, mut errors) =
        forwarding_inbound(context(ConnectionConfig::default()), left, &[]);
    conn.process_messages();

    let peer = tokio::task::spawn_blocking(move || {
        let mut writer = FrameWriter::with_config(right, FrameConfig::with_cookie(DEFAULT_COOKIE ^ 1));
        writer.write_message(1, b"garbage").expect("peer write");
        let mut stream = writer.into_inner();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).expect("peer read");
        rest
    });

    let leftover = peer.await.expect("peer task");
    assert!(leftover.is_empty(), "peer should only see EOF");
    assert_eq!(conn.read_state(), ReadState::Closed);
    assert!(messages.try_recv().is_err());
    assert!(errors.try_recv().is_err());

    let logs = capture.text();
    assert!(logs.contains("WARN"));
    assert!(logs.contains(&format!("received cookie: {}", DEFAULT_COOKIE ^ 1)));
    assert!(logs.contains("debug label: worker"));
}

const ABORT_CHILD_ENV: &str = "SOCKFRAME_COOKIE_ABORT_CHILD";

/// Runs in a child process: a registered connection receiving a foreign
/// cookie must take the whole process down.
fn registered_cookie_mismatch_child() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let (left, right) = pair();
    let conn = runtime.block_on(async {
        let (conn, _messages, _errors) =
            forwarding_inbound(context(ConnectionConfig::default()), left, &[]);
        conn.register();
        conn.process_messages();
        conn
    });

    let mut writer = FrameWriter::with_config(right, FrameConfig::with_cookie(DEFAULT_COOKIE ^ 1));
    writer.write_message(1, b"garbage").expect("peer write");
    std::thread::sleep(Duration::from_secs(5));
    drop(conn);
}

#[test]
fn registered_cookie_mismatch_aborts_process() {
    use std::os::unix::process::ExitStatusExt;

    if std::env::var_os(ABORT_CHILD_ENV).is_some() {
        registered_cookie_mismatch_child();
        return;
    }

    let output = std::process::Command::new(std::env::current_exe().expect("test binary"))
        .args([
            "--exact",
            "registered_cookie_mismatch_aborts_process",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(ABORT_CHILD_ENV, "1")
        .output()
        .expect("spawn child");

    assert_eq!(
        output.status.signal(),
        Some(libc::SIGABRT),
        "child status: {:?}, stderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn queue_depth_warning_fires_at_powers_of_two_above_threshold() {
    let (capture, _guard) = capture_warnings();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let ctx = context(ConnectionConfig {
        queue_warning_threshold: 2,
        ..ConnectionConfig::default()
    });

    let (left, _right) = pair();
    runtime.block_on(async {
        let conn = OutboundConnection::from_std(ctx, left).expect("outbound");
        for i in 0..9i64 {
            conn.write_frame_async(i, b"queued", |_| {});
        }
        assert_eq!(conn.counters().async_writes, 9);
    });
    drop(runtime);

    let logs = capture.text();
    let warnings: Vec<&str> = logs
        .lines()
        .filter(|line| line.contains("buffered async writes"))
        .collect();
    assert_eq!(warnings.len(), 2, "{logs}");
    assert!(warnings[0].contains("connection has 4 buffered async writes"));
    assert!(warnings[1].contains("connection has 8 buffered async writes"));
}

#[tokio::test]
async fn peer_disconnect_reaches_error_handler() {
    let (left, right) = pair();
    let (conn, mut messages, mut errors) =
        forwarding_inbound(context(ConnectionConfig::default()), left, &[]);
    conn.process_messages();

    let mut writer = FrameWriter::new(right);
    writer.write_message(4, b"last words").expect("peer write");
    drop(writer);

    let (msg_type, body) = messages.recv().await.expect("message");
    assert_eq!((msg_type, body.as_ref()), (4, b"last words".as_ref()));

    let err = errors.recv().await.expect("error");
    assert_eq!(err.io_kind(), Some(std::io::ErrorKind::UnexpectedEof));
    assert_eq!(conn.read_state(), ReadState::Closed);
}

#[tokio::test]
async fn negative_length_is_reported_as_invalid() {
    let (left, mut right) = pair();
    let (conn, mut messages, mut errors) =
        forwarding_inbound(context(ConnectionConfig::default()), left, &[]);
    conn.process_messages();

    let header = FrameHeader {
        cookie: DEFAULT_COOKIE,
        msg_type: 2,
        length: -8,
    };
    right.write_all(&header.encode()).expect("peer write");

    let err = errors.recv().await.expect("error");
    assert!(matches!(err, ConnectionError::InvalidLength(-8)));
    assert!(messages.try_recv().is_err());
}

#[tokio::test]
async fn slow_handler_logs_one_warning_with_type_name() {
    let (capture, _guard) = capture_warnings();
    let ctx = context(ConnectionConfig {
        handler_warning_timeout_ms: 10,
        ..ConnectionConfig::default()
    });
    let (left, right) = pair();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let conn = InboundConnection::builder(ctx)
        .debug_label("slow")
        .message_type_names(["Register", "Heartbeat"])
        .build_std(
            left,
            move |_conn, msg_type, body: Bytes| {
                std::thread::sleep(Duration::from_millis(40));
                let _ = done_tx.send((msg_type, body));
            },
            |_conn, _err| {},
        )
        .expect("inbound");
    conn.process_messages();

    let mut writer = FrameWriter::new(right);
    writer.write_message(1, b"beat").expect("peer write");

    let (msg_type, body) = done_rx.recv().await.expect("dispatch");
    assert_eq!((msg_type, body.as_ref()), (1, b"beat".as_ref()));
    wait_until("handler to finish", || conn.read_state() == ReadState::Idle).await;

    let logs = capture.text();
    let warnings: Vec<&str> = logs
        .lines()
        .filter(|line| line.contains("processing message of type"))
        .collect();
    assert_eq!(warnings.len(), 1, "logs: {logs}");
    assert!(warnings[0].contains("[slow] processing message of type Heartbeat took"));
    assert!(warnings[0].contains(" ms"));
}

#[tokio::test]
async fn fast_handler_logs_nothing() {
    let (capture, _guard) = capture_warnings();
    let (left, right) = pair();
    let (conn, mut messages, _errors) =
        forwarding_inbound(context(ConnectionConfig::default()), left, &[]);
    conn.process_messages();

    FrameWriter::new(right)
        .write_message(0, b"quick")
        .expect("peer write");
    messages.recv().await.expect("message");

    assert!(!capture.text().contains("processing message of type"));
}

#[tokio::test]
async fn disconnect_probe_flags_only_closed_peers() {
    let ctx = context(ConnectionConfig::default());
    let mut conns = Vec::new();
    let mut peers = Vec::new();
    for i in 0..4 {
        let (local, remote) = pair();
        let (conn, _messages, _errors) =
            forwarding_inbound(Arc::clone(&ctx), local, &[]);
        conns.push(conn);
        peers.push(if i == 1 { None } else { Some(remote) });
    }

    assert_eq!(check_disconnects(&conns), vec![false, true, false, false]);
    drop(peers);
}

fn retry_log_levels(logs: &str) -> Vec<&'static str> {
    logs.lines()
        .filter_map(|line| {
            if line.contains("connect failed, retrying") {
                Some("DEBUG")
            } else if line.contains("retrying connection") {
                Some("INFO")
            } else {
                None
            }
        })
        .collect()
}

#[test]
fn blocking_connect_retry_logs_first_failure_at_debug() {
    let (capture, _guard) = capture_logs(tracing::Level::DEBUG);
    let path = std::env::temp_dir().join(format!("sockframe-missing-{}.sock", std::process::id()));

    connect_retry(&path, 3, 1, &ConnectionConfig::default()).expect_err("no listener");

    assert_eq!(retry_log_levels(&capture.text()), vec!["DEBUG", "INFO"]);
}

#[tokio::test]
async fn async_connect_retry_logs_like_blocking_retry() {
    let (capture, _guard) = capture_logs(tracing::Level::DEBUG);
    let path =
        std::env::temp_dir().join(format!("sockframe-missing-async-{}.sock", std::process::id()));

    connect_retry_async(&path, 3, 1, &ConnectionConfig::default())
        .await
        .expect_err("no listener");

    let logs = capture.text();
    assert_eq!(retry_log_levels(&logs), vec!["DEBUG", "INFO"]);
    assert!(logs.lines().any(|line| line.contains("DEBUG") && line.contains("connect failed")));
}

#[test]
fn sync_roundtrip_over_listener() {
    let dir = std::env::temp_dir().join(format!("sockframe-conn-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("roundtrip.sock");
    let listener = UnixDomainSocket::bind(&path).expect("bind");

    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let config = ConnectionConfig::default();

    let client_path = path.clone();
    let client_config = config.clone();
    let client = std::thread::spawn(move || {
        connect_retry(&client_path, 3, 10, &client_config).expect("connect")
    });
    let server_stream = listener.accept().expect("accept");
    let client_stream = client.join().expect("client thread");

    let ctx = context(config);
    let (server, client) = runtime.block_on(async {
        (
            OutboundConnection::from_std(Arc::clone(&ctx), server_stream).expect("server"),
            OutboundConnection::from_std(Arc::clone(&ctx), client_stream).expect("client"),
        )
    });

    let large = vec![7u8; 100_000];
    let cases: [(i64, &[u8]); 3] = [(1, b""), (2, b"ping"), (3, &large)];
    for (msg_type, payload) in cases {
        let sender = Arc::clone(&client);
        let body = payload.to_vec();
        let send = std::thread::spawn(move || sender.write_frame_sync(msg_type, &body));
        let received = server.read_frame_sync(msg_type).expect("read");
        send.join().expect("sender").expect("write");
        assert_eq!(received.as_ref(), payload);
    }

    let err = {
        client.write_frame_sync(9, b"x").expect("write");
        server.read_frame_sync(8).expect_err("type mismatch")
    };
    assert!(matches!(
        err,
        ConnectionError::TypeMismatch {
            expected: 8,
            received: 9
        }
    ));
    assert_eq!(client.counters().sync_writes, 4);

    drop((server, client));
    drop(runtime);
    let _ = std::fs::remove_dir_all(&dir);
}
