use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cabincan::Frame;
use serde::Serialize;
use tracing::info;

use crate::cmd::{build_frame, install_ctrlc_handler, open_channel, parse_duration, BackendArg, JobArgs};
use crate::exit::{can_error, CliError, CliResult, SUCCESS};
use crate::output::{id_text, print_record, OutputFormat};

const TICK: Duration = Duration::from_millis(50);

#[derive(Serialize)]
struct JobOutput<'a> {
    iface: &'a str,
    job_id: u32,
    id: String,
    period_ms: u64,
    fired: u64,
}

pub fn run(args: JobArgs, backend: BackendArg, format: OutputFormat) -> CliResult<i32> {
    let period = parse_duration(&args.period)?;
    let frame = build_frame(args.id, &args.bytes, args.extended)?;
    if let Some(index) = args.counter_byte {
        if index >= frame.payload().len() {
            return Err(CliError::usage(format!(
                "--counter-byte {index} is outside the {}-byte payload",
                frame.payload().len()
            )));
        }
    }
    let deadline = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|d| Instant::now() + d);
    let running = install_ctrlc_handler()?;

    let registry = open_channel(backend, &args.iface, &args.link)?;
    let fired = Arc::new(AtomicU64::new(0));
    let hook = counting_hook(fired.clone(), args.counter_byte);
    let job_id = registry
        .register_job_ex(&args.iface, frame, period, hook)
        .map_err(|err| can_error("register job failed", err))?;
    info!(iface = %args.iface, job = job_id, period_ms = period.as_millis() as u64, "job running");

    while running.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
        std::thread::sleep(TICK);
    }

    registry
        .cancel_job(&args.iface, job_id)
        .map_err(|err| can_error("cancel job failed", err))?;
    registry.dispose();

    let out = JobOutput {
        iface: &args.iface,
        job_id,
        id: id_text(&frame),
        period_ms: period.as_millis() as u64,
        fired: fired.load(Ordering::SeqCst),
    };
    print_record(
        &out,
        &[
            ("iface", out.iface.to_string()),
            ("job_id", job_id.to_string()),
            ("id", out.id.clone()),
            ("period_ms", out.period_ms.to_string()),
            ("fired", out.fired.to_string()),
        ],
        format,
    );
    Ok(SUCCESS)
}

/// Count every transmission and optionally bump one payload byte, the way
/// alive counters in cyclic frames advance.
fn counting_hook(
    fired: Arc<AtomicU64>,
    counter_byte: Option<usize>,
) -> impl FnMut(&mut Frame) + Send + 'static {
    move |frame: &mut Frame| {
        fired.fetch_add(1, Ordering::SeqCst);
        if let Some(index) = counter_byte {
            if let Some(byte) = frame.data.get_mut(index) {
                *byte = byte.wrapping_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_counts_and_bumps_counter_byte() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut hook = counting_hook(fired.clone(), Some(1));
        let mut frame = Frame::new(0x2A0, &[0xAA, 0xFF]).unwrap();

        hook(&mut frame);
        assert_eq!(frame.payload(), &[0xAA, 0x00]);
        hook(&mut frame);
        assert_eq!(frame.payload(), &[0xAA, 0x01]);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn hook_without_counter_leaves_payload() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut hook = counting_hook(fired.clone(), None);
        let mut frame = Frame::new(0x2A0, &[0x10]).unwrap();
        hook(&mut frame);
        assert_eq!(frame.payload(), &[0x10]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
