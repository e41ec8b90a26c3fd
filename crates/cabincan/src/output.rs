use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use cabincan::Frame;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

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
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    channel: &'a str,
    id: String,
    extended: bool,
    remote: bool,
    error: bool,
    dlc: u8,
    data: String,
    timestamp: String,
}

pub fn print_frame(channel: &str, frame: &Frame, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                channel,
                id: id_text(frame),
                extended: frame.is_extended(),
                remote: frame.is_remote(),
                error: frame.is_error(),
                dlc: frame.dlc(),
                data: payload_hex(frame),
                timestamp: now_unix_millis(),
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
                .set_header(vec!["CHANNEL", "ID", "DLC", "DATA", "FLAGS"])
                .add_row(vec![
                    channel.to_string(),
                    id_text(frame),
                    frame.dlc().to_string(),
                    payload_hex(frame),
                    flag_text(frame),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let data = if frame.is_remote() {
                "remote request".to_string()
            } else {
                payload_hex(frame)
            };
            println!(
                "  {channel}  {:>8}   [{}]  {data}",
                id_text(frame),
                frame.dlc()
            );
        }
        OutputFormat::Raw => {
            println!("{frame}");
        }
    }
}

/// Print one summary record: JSON object, two-column table, `key: value`
/// lines, or bare values.
pub fn print_record<T: Serialize>(record: &T, rows: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in rows {
                table.add_row(vec![key.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (key, value) in rows {
                println!("{key}: {value}");
            }
        }
        OutputFormat::Raw => {
            let values: Vec<&str> = rows.iter().map(|(_, v)| v.as_str()).collect();
            println!("{}", values.join(" "));
        }
    }
}

pub fn id_text(frame: &Frame) -> String {
    if frame.is_extended() {
        format!("{:08X}", frame.id)
    } else {
        format!("{:03X}", frame.id)
    }
}

fn payload_hex(frame: &Frame) -> String {
    if frame.is_remote() {
        return String::new();
    }
    frame
        .payload()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn flag_text(frame: &Frame) -> String {
    let mut flags = Vec::new();
    if frame.is_extended() {
        flags.push("EXT");
    }
    if frame.is_remote() {
        flags.push("RTR");
    }
    if frame.is_error() {
        flags.push("ERR");
    }
    flags.join(",")
}

fn now_unix_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_render_by_width() {
        let standard = Frame::new(0x12, &[]).unwrap();
        let extended = Frame::new_extended(0x18DA_F110, &[]).unwrap();
        assert_eq!(id_text(&standard), "012");
        assert_eq!(id_text(&extended), "18DAF110");
    }

    #[test]
    fn payload_is_space_separated_hex() {
        let frame = Frame::new(0x123, &[0xDE, 0xAD, 0x01]).unwrap();
        assert_eq!(payload_hex(&frame), "DE AD 01");
        let remote = Frame::new_remote(0x123, 4, false).unwrap();
        assert_eq!(payload_hex(&remote), "");
        assert_eq!(flag_text(&remote), "RTR");
    }
}
