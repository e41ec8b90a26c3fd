use cabincan::frame::{EFF_MASK, MAX_DLC, SFF_MASK, WIRE_SIZE};
use cabincan::transport::create_backend;
use cabincan::BackendKind;
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Debug, Serialize)]
struct BackendSupport {
    name: &'static str,
    /// Compiled into this binary; says nothing about interfaces present.
    built: bool,
}

#[derive(Debug, Serialize)]
struct VersionInfo {
    version: &'static str,
    backends: Vec<BackendSupport>,
    link_control: &'static str,
    max_dlc: u8,
    standard_id_max: String,
    extended_id_max: String,
    wire_frame_bytes: usize,
}

fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        backends: [BackendKind::Loopback, BackendKind::SocketCan]
            .into_iter()
            .map(|kind| BackendSupport {
                name: kind.as_str(),
                built: create_backend(kind).is_ok(),
            })
            .collect(),
        link_control: if cfg!(target_os = "linux") {
            "rtnetlink"
        } else {
            "none"
        },
        max_dlc: MAX_DLC,
        standard_id_max: format!("0x{SFF_MASK:03X}"),
        extended_id_max: format!("0x{EFF_MASK:08X}"),
        wire_frame_bytes: WIRE_SIZE,
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.extended {
        println!("cabincan {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let info = version_info();
    if matches!(format, OutputFormat::Json) {
        println!(
            "{}",
            serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(SUCCESS);
    }

    let built: Vec<&str> = info
        .backends
        .iter()
        .filter(|b| b.built)
        .map(|b| b.name)
        .collect();
    println!("cabincan {}", info.version);
    println!("backends: {}", built.join(", "));
    println!("link control: {}", info.link_control);
    println!(
        "frames: classic CAN, dlc <= {}, ids <= {} / {}, {}-byte wire form",
        info.max_dlc, info.standard_id_max, info.extended_id_max, info.wire_frame_bytes
    );
    Ok(SUCCESS)
}
