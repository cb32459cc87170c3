use std::sync::Arc;

use sockframe_conn::{
    ConnectionConfig, ConnectionContext, ConnectionCounters, ConnectionError, InboundConnection,
};
use sockframe_transport::AsyncUnixListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cmd::EchoArgs;
use crate::exit::{connection_error, io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_counters, OutputFormat};

type Finished = (String, ConnectionCounters);

pub fn run(args: EchoArgs, config: ConnectionConfig, format: OutputFormat) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(serve(args, config, format))
}

async fn serve(args: EchoArgs, config: ConnectionConfig, format: OutputFormat) -> CliResult<i32> {
    let listener =
        AsyncUnixListener::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    let context = ConnectionContext::new(config);
    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel::<Finished>();
    let mut next_peer_id = 1u64;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let stream = accepted.map_err(|err| transport_error("accept failed", err))?;
                let label = format!("peer-{next_peer_id}");
                next_peer_id += 1;

                let conn = InboundConnection::builder(Arc::clone(&context))
                    .debug_label(label.clone())
                    .message_type_names(args.type_names.iter().cloned())
                    .build(stream, echo_message, on_connection_error(finished_tx.clone()))
                    .map_err(|err| connection_error("connection setup failed", err))?;
                if args.register {
                    conn.register();
                }
                info!(peer = %label, "peer connected");
                conn.process_messages();
            }
            Some((label, counters)) = finished_rx.recv() => {
                print_counters(&label, &counters, format);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    if context.stats().is_enabled() {
        info!("handler stats:{}", context.stats().summary());
    }
    Ok(SUCCESS)
}

fn echo_message(conn: Arc<InboundConnection>, msg_type: i64, body: bytes::Bytes) {
    let label = conn.debug_label().to_string();
    conn.write_frame_async(msg_type, &body, move |result| {
        if let Err(err) = result {
            warn!(peer = %label, error = %err, "echo write failed");
        }
    });
    conn.process_messages();
}

fn on_connection_error(
    finished: mpsc::UnboundedSender<Finished>,
) -> impl Fn(Arc<InboundConnection>, ConnectionError) + Send + Sync + 'static {
    move |conn, err| {
        if is_disconnect(&err) {
            info!(peer = %conn.debug_label(), "peer disconnected");
        } else {
            warn!(peer = %conn.debug_label(), error = %err, "connection failed");
        }
        info!(peer = %conn.debug_label(), "connection summary:{}", conn.debug_string());
        let _ = finished.send((conn.debug_label().to_string(), conn.counters()));
    }
}

fn is_disconnect(err: &ConnectionError) -> bool {
    matches!(err, ConnectionError::Closed | ConnectionError::BrokenPipe)
        || matches!(
            err.io_kind(),
            Some(std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset)
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_and_reset_are_disconnects() {
        assert!(is_disconnect(&ConnectionError::from(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof
        ))));
        assert!(is_disconnect(&ConnectionError::Closed));
        assert!(!is_disconnect(&ConnectionError::InvalidLength(-1)));
    }
}
