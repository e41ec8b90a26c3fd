use cabincan::Timeout;

use crate::cmd::{open_channel, parse_duration, BackendArg, RecvArgs};
use crate::exit::{can_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: RecvArgs, backend: BackendArg, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let registry = open_channel(backend, &args.iface, &args.link)?;

    let frame = registry
        .recv(&args.iface, Timeout::After(timeout))
        .map_err(|err| can_error("receive failed", err))?;
    print_frame(&args.iface, &frame, format);
    Ok(SUCCESS)
}
