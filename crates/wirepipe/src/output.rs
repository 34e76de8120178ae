use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;
use wirepipe_frame::{frame_type, Frame};
use wirepipe_peer::Pipe;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
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
struct EventOutput<'a> {
    event: &'a str,
    args: &'a [Value],
    peer: String,
    timestamp: u64,
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    frame_type: u16,
    type_name: &'a str,
    payload_size: usize,
    payload: String,
    peer: String,
    timestamp: u64,
}

pub fn print_event(event: &str, sender: &Pipe, args: &[Value], format: OutputFormat) {
    let peer = addr_of(sender);
    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                event,
                args,
                peer,
                timestamp: now_unix_seconds(),
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
                .set_header(vec!["EVENT", "ARGS", "PEER"])
                .add_row(vec![
                    event.to_string(),
                    serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string()),
                    peer,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "event={event} peer={peer} args={}",
                serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string())
            );
        }
    }
}

pub fn print_frame(sender: &Pipe, frame: &Frame, format: OutputFormat) {
    let peer = addr_of(sender);
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                frame_type: frame.frame_type,
                type_name: frame_type::type_name(frame.frame_type),
                payload_size: frame.payload.len(),
                payload: payload_preview(frame.payload.as_ref()),
                peer,
                timestamp: now_unix_seconds(),
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
                .set_header(vec!["TYPE", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    format!(
                        "{} ({})",
                        frame.frame_type,
                        frame_type::type_name(frame.frame_type)
                    ),
                    frame.payload.len().to_string(),
                    peer,
                    payload_preview(frame.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "type={} ({}) size={} peer={} payload={}",
                frame.frame_type,
                frame_type::type_name(frame.frame_type),
                frame.payload.len(),
                peer,
                payload_preview(frame.payload.as_ref())
            );
        }
    }
}

const PREVIEW_LIMIT: usize = 256;

fn payload_preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.len() <= PREVIEW_LIMIT {
        text.into_owned()
    } else {
        let mut end = PREVIEW_LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}… ({} bytes)", &text[..end], payload.len())
    }
}

fn addr_of(pipe: &Pipe) -> String {
    pipe.peer_addr()
        .map_or_else(|| "unknown".to_string(), |addr| addr.to_string())
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
