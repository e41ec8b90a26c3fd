use cabincan::{Frame, Timeout};
use tracing::debug;

use crate::cmd::{build_frame, open_channel, parse_duration, BackendArg, SendArgs};
use crate::exit::{can_error, CliError, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: SendArgs, backend: BackendArg, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let frame = if args.rtr {
        Frame::new_remote(args.id, args.rtr_len, args.extended)
            .map_err(|err| CliError::usage(format!("frame: {err}")))?
    } else {
        build_frame(args.id, &args.bytes, args.extended)?
    };

    let registry = open_channel(backend, &args.iface, &args.link)?;
    registry
        .send(&args.iface, &frame, Timeout::After(timeout))
        .map_err(|err| can_error("send failed", err))?;
    debug!(iface = %args.iface, frame = %frame, "frame sent");

    print_frame(&args.iface, &frame, format);
    Ok(SUCCESS)
}
