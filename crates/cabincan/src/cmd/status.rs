use serde::Serialize;

use crate::cmd::{open_channel, BackendArg, IfaceArgs};
use crate::exit::{can_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct StatusOutput<'a> {
    iface: &'a str,
    backend: &'a str,
    state: cabincan::BusState,
}

pub fn run(args: IfaceArgs, backend: BackendArg, format: OutputFormat) -> CliResult<i32> {
    let registry = open_channel(backend, &args.iface, &args.link)?;
    let state = registry
        .status(&args.iface)
        .map_err(|err| can_error("status failed", err))?;

    let out = StatusOutput {
        iface: &args.iface,
        backend: registry.backend_name().unwrap_or("none"),
        state,
    };
    print_record(
        &out,
        &[
            ("iface", out.iface.to_string()),
            ("backend", out.backend.to_string()),
            ("state", state.to_string()),
        ],
        format,
    );
    Ok(SUCCESS)
}
