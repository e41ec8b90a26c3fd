use serde::Serialize;
use tracing::info;

use crate::cmd::{open_channel, BackendArg, IfaceArgs, LinkArgs};
use crate::exit::{can_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum RecoveryAction {
    /// `--bring-up` already took the link down and up, which leaves bus-off.
    LinkCycled,
    /// Driver restart on a link left as found.
    Restart,
}

impl RecoveryAction {
    fn for_link(link: &LinkArgs) -> Self {
        if link.bring_up {
            RecoveryAction::LinkCycled
        } else {
            RecoveryAction::Restart
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            RecoveryAction::LinkCycled => "link_cycled",
            RecoveryAction::Restart => "restart",
        }
    }
}

#[derive(Serialize)]
struct RecoverOutput<'a> {
    iface: &'a str,
    action: RecoveryAction,
    state: cabincan::BusState,
}

/// Bus-off recovery. With `--bring-up` the open itself cycles the link and
/// no restart follows, since the driver refuses a restart on a running link.
pub fn run(args: IfaceArgs, backend: BackendArg, format: OutputFormat) -> CliResult<i32> {
    let action = RecoveryAction::for_link(&args.link);
    let registry = open_channel(backend, &args.iface, &args.link)?;
    if action == RecoveryAction::Restart {
        registry
            .recover(&args.iface)
            .map_err(|err| can_error("recover failed", err))?;
    }
    info!(iface = %args.iface, action = action.as_str(), "recovery requested");

    let state = registry
        .status(&args.iface)
        .map_err(|err| can_error("status failed", err))?;
    let out = RecoverOutput {
        iface: &args.iface,
        action,
        state,
    };
    print_record(
        &out,
        &[
            ("iface", out.iface.to_string()),
            ("action", action.as_str().to_string()),
            ("state", state.to_string()),
        ],
        format,
    );
    Ok(SUCCESS)
}
