//! Minimal echo server built on the connection layer.
//!
//! ```sh
//! cargo run -p sockframe --example echo-server -- /tmp/echo.sock
//! sockframe send /tmp/echo.sock --type 1 --data hello --wait
//! ```

use std::sync::Arc;

use sockframe::conn::{ConnectionConfig, ConnectionContext, InboundConnection};
use sockframe::transport::AsyncUnixListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_ansi(false).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/sockframe-echo.sock".to_string());
    let listener = AsyncUnixListener::bind(&path)?;
    let context = ConnectionContext::new(ConnectionConfig::default());
    println!("echo server listening on {path}");

    loop {
        let stream = listener.accept().await?;
        let conn = InboundConnection::builder(Arc::clone(&context))
            .debug_label("echo")
            .build(
                stream,
                |conn, msg_type, body| {
                    conn.write_frame_async(msg_type, &body, |_| {});
                    conn.process_messages();
                },
                |conn, err| {
                    println!("connection ended: {err}{}", conn.debug_string());
                },
            )?;
        conn.process_messages();
    }
}
