use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use kairos_frame::Frame;
use kairos_session::{ConnectionStatus, CONTROL_SOURCE_ID};
use serde::Serialize;

/// Longest payload text shown outside raw mode.
const PREVIEW_CHARS: usize = 120;

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
    kind: &'a str,
    stream_id: u64,
    source_id: u32,
    frame_length: usize,
    payload: String,
    timestamp_ms: u64,
}

#[derive(Serialize)]
struct StatusOutput {
    kind: &'static str,
    status: ConnectionStatus,
    timestamp_ms: u64,
}

pub fn print_frame(frame: &Frame, format: OutputFormat) {
    let kind = stream_kind(frame.source_id());
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                kind,
                stream_id: frame.stream_id(),
                source_id: frame.source_id(),
                frame_length: frame.len(),
                payload: payload_preview(frame.payload()),
                timestamp_ms: now_unix_millis(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "STREAM", "SOURCE", "LENGTH", "PAYLOAD"])
                .add_row(vec![
                    kind.to_string(),
                    frame.stream_id().to_string(),
                    format!("{:#010x}", frame.source_id()),
                    frame.len().to_string(),
                    payload_preview(frame.payload()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{kind} stream={} source={:#010x} length={} payload={}",
                frame.stream_id(),
                frame.source_id(),
                frame.len(),
                payload_preview(frame.payload())
            );
        }
        OutputFormat::Raw => {
            print_raw(frame.payload());
        }
    }
}

pub fn print_status(status: ConnectionStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = StatusOutput {
                kind: "status",
                status,
                timestamp_ms: now_unix_millis(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => println!("status: {status}"),
        // Raw output carries payload bytes only.
        OutputFormat::Raw => {}
    }
}

/// Write payload bytes unmodified, one frame after another.
pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout().lock();
    if out.write_all(data).and_then(|()| out.flush()).is_err() {
        tracing::debug!(len = data.len(), "stdout closed, dropping raw output");
    }
}

fn stream_kind(source_id: u32) -> &'static str {
    if source_id == CONTROL_SOURCE_ID {
        "control"
    } else {
        "data"
    }
}

fn payload_preview(payload: &[u8]) -> String {
    let Ok(text) = std::str::from_utf8(payload) else {
        return format!("<binary {} bytes>", payload.len());
    };
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
