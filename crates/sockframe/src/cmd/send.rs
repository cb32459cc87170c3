use std::fs;

use sockframe_conn::{connect_retry, ConnectionConfig, ConnectionContext, OutboundConnection};
use sockframe_frame::Frame;
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{connection_error, io_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: SendArgs, config: ConnectionConfig, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;

    let stream = connect_retry(&args.path, args.retries, args.retry_delay_ms, &config)
        .map_err(|err| connection_error("connect failed", err))?;

    // Connections register with a runtime even when only the blocking path is used.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    let _enter = runtime.enter();

    let conn = OutboundConnection::from_std(ConnectionContext::new(config), stream)
        .map_err(|err| connection_error("connection setup failed", err))?;

    conn.write_frame_sync(args.msg_type, &payload)
        .map_err(|err| connection_error("send failed", err))?;

    if args.wait {
        let body = conn
            .read_frame_sync(args.msg_type)
            .map_err(|err| connection_error("receive failed", err))?;
        print_frame(
            &Frame::new(args.msg_type, body),
            &args.path.display().to_string(),
            format,
        );
    }

    debug!("connection summary:{}", conn.debug_string());
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
