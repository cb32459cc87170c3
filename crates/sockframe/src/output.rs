use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use sockframe_conn::{ConnectionConfig, ConnectionCounters};
use sockframe_frame::Frame;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    msg_type: i64,
    payload_size: usize,
    payload: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_frame(frame: &Frame, peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                msg_type: frame.msg_type,
                payload_size: frame.payload.len(),
                payload: payload_preview(frame.payload.as_ref()),
                peer,
                timestamp: now_unix_seconds(),
            };
            print_json_line(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    frame.msg_type.to_string(),
                    frame.payload.len().to_string(),
                    peer.to_string(),
                    payload_preview(frame.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "type={} size={} peer={} payload={}",
                frame.msg_type,
                frame.payload.len(),
                peer,
                payload_preview(frame.payload.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(frame.payload.as_ref());
        }
    }
}

#[derive(Serialize)]
struct CountersOutput<'a> {
    peer: &'a str,
    #[serde(flatten)]
    counters: &'a ConnectionCounters,
}

/// Per-connection summary printed when a connection ends.
pub fn print_counters(peer: &str, counters: &ConnectionCounters, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json_line(&CountersOutput { peer, counters }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "PEER",
                    "BYTES READ",
                    "BYTES WRITTEN",
                    "ASYNC WRITES",
                    "SYNC WRITES",
                ])
                .add_row(vec![
                    peer.to_string(),
                    counters.bytes_read.to_string(),
                    counters.bytes_written.to_string(),
                    counters.async_writes.to_string(),
                    counters.sync_writes.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "peer={} bytes_read={} bytes_written={} async_writes={} sync_writes={}",
                peer,
                counters.bytes_read,
                counters.bytes_written,
                counters.async_writes,
                counters.sync_writes
            );
        }
    }
}

pub fn print_config(config: &ConnectionConfig, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let value = serde_json::to_value(config).unwrap_or_default();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SETTING", "VALUE"]);
            if let serde_json::Value::Object(fields) = value {
                for (key, value) in fields {
                    table.add_row(vec![key, value.to_string()]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{}",
                serde_json::to_string_pretty(config).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Json | OutputFormat::Raw => print_json_line(config),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json_line<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
