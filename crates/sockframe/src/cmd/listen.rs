use futures_util::StreamExt;
use sockframe_conn::ConnectionConfig;
use sockframe_frame::{FrameCodec, FrameError};
use sockframe_transport::AsyncUnixListener;
use tokio_util::codec::FramedRead;
use tracing::{info, warn};

use crate::cmd::ListenArgs;
use crate::exit::{frame_error, io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

enum RecvErrorDisposition {
    Disconnect,
    DropPeer,
    Fatal,
}

pub fn run(args: ListenArgs, config: ConnectionConfig, format: OutputFormat) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(listen(args, config, format))
}

async fn listen(args: ListenArgs, config: ConnectionConfig, format: OutputFormat) -> CliResult<i32> {
    let listener =
        AsyncUnixListener::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    let codec = FrameCodec::new(config.frame_config());

    let mut printed = 0usize;
    let mut next_peer_id = 1u64;

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => accepted.map_err(|err| transport_error("accept failed", err))?,
            _ = tokio::signal::ctrl_c() => return Ok(SUCCESS),
        };
        let peer = format!("peer-{next_peer_id}");
        next_peer_id += 1;
        info!(%peer, "peer connected");

        let mut frames = FramedRead::new(stream, codec.clone());
        loop {
            let next = tokio::select! {
                next = frames.next() => next,
                _ = tokio::signal::ctrl_c() => return Ok(SUCCESS),
            };
            let frame = match next {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(err)) => match classify_recv_error(&err) {
                    RecvErrorDisposition::Disconnect => break,
                    RecvErrorDisposition::DropPeer => {
                        warn!(%peer, error = %err, "dropping peer");
                        break;
                    }
                    RecvErrorDisposition::Fatal => return Err(frame_error("receive failed", err)),
                },
            };

            if let Some(types) = &args.msg_types {
                if !types.contains(&frame.msg_type) {
                    continue;
                }
            }

            print_frame(&frame, &peer, format);
            printed = printed.saturating_add(1);

            if let Some(count) = args.count {
                if printed >= count {
                    return Ok(SUCCESS);
                }
            }
        }
        info!(%peer, "peer disconnected");
    }
}

fn classify_recv_error(err: &FrameError) -> RecvErrorDisposition {
    match err {
        FrameError::ConnectionClosed => RecvErrorDisposition::Disconnect,
        FrameError::Io(source)
            if matches!(
                source.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::UnexpectedEof
            ) =>
        {
            RecvErrorDisposition::Disconnect
        }
        FrameError::CookieMismatch { .. }
        | FrameError::NegativeLength(_)
        | FrameError::PayloadTooLarge { .. } => RecvErrorDisposition::DropPeer,
        _ => RecvErrorDisposition::Fatal,
    }
}
