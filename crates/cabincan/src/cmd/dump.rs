use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use cabincan::{Filter, Frame};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, open_channel, parse_can_id, parse_duration, BackendArg, DumpArgs};
use crate::exit::{can_error, CliError, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

const POLL: Duration = Duration::from_millis(100);

pub fn run(args: DumpArgs, backend: BackendArg, format: OutputFormat) -> CliResult<i32> {
    let filter = resolve_filter(&args)?;
    let deadline = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|d| Instant::now() + d);
    let running = install_ctrlc_handler()?;

    let registry = open_channel(backend, &args.iface, &args.link)?;
    let (tx, rx) = mpsc::channel::<Frame>();
    registry
        .subscribe(&args.iface, filter, move |frame: &Frame| {
            let _ = tx.send(*frame);
        })
        .map_err(|err| can_error("subscribe failed", err))?;
    info!(iface = %args.iface, "dumping frames");

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let frame = match rx.recv_timeout(POLL) {
            Ok(frame) => frame,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        print_frame(&args.iface, &frame, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    registry.dispose();
    Ok(SUCCESS)
}

fn resolve_filter(args: &DumpArgs) -> CliResult<Option<Filter>> {
    if let Some(text) = &args.filter {
        let (id, mask) = text
            .split_once(':')
            .ok_or_else(|| CliError::usage(format!("--filter expects id:mask, got {text}")))?;
        return Ok(Some(Filter::Mask {
            id: parse_can_id(id).map_err(CliError::usage)?,
            mask: parse_can_id(mask).map_err(CliError::usage)?,
        }));
    }
    if let Some(text) = &args.range {
        let (min, max) = text
            .split_once('-')
            .ok_or_else(|| CliError::usage(format!("--range expects lo-hi, got {text}")))?;
        let min = parse_can_id(min).map_err(CliError::usage)?;
        let max = parse_can_id(max).map_err(CliError::usage)?;
        if min > max {
            return Err(CliError::usage(format!("--range {text} is empty")));
        }
        return Ok(Some(Filter::Range { min, max }));
    }
    Ok(args.ids.clone().map(Filter::list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{LinkArgs, ModeArg};

    fn args() -> DumpArgs {
        DumpArgs {
            iface: "can0".to_string(),
            filter: None,
            range: None,
            ids: None,
            count: None,
            duration: None,
            link: LinkArgs {
                bitrate: 500_000,
                mode: ModeArg::Normal,
                bring_up: false,
            },
        }
    }

    #[test]
    fn no_filter_means_all() {
        assert_eq!(resolve_filter(&args()).unwrap(), None);
    }

    #[test]
    fn filter_arguments_parse() {
        let mut a = args();
        a.filter = Some("0x100:0x700".to_string());
        assert_eq!(
            resolve_filter(&a).unwrap(),
            Some(Filter::Mask {
                id: 0x100,
                mask: 0x700
            })
        );

        let mut a = args();
        a.range = Some("100-1ff".to_string());
        assert_eq!(
            resolve_filter(&a).unwrap(),
            Some(Filter::Range {
                min: 0x100,
                max: 0x1FF
            })
        );

        let mut a = args();
        a.ids = Some(vec![0x100, 0x200]);
        assert_eq!(
            resolve_filter(&a).unwrap(),
            Some(Filter::list(vec![0x100u32, 0x200]))
        );
    }

    #[test]
    fn bad_filter_specs_are_usage_errors() {
        let mut a = args();
        a.range = Some("200-100".to_string());
        assert!(resolve_filter(&a).is_err());

        let mut a = args();
        a.filter = Some("100".to_string());
        assert!(resolve_filter(&a).is_err());
    }
}
