use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cabincan::{BackendKind, ChannelConfig, Frame, Registry, Timeout};
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let mut checks = vec![
        backends_check(),
        can_socket_check(),
        loopback_selftest(),
    ];
    if let Some(iface) = &args.iface {
        checks.push(iface_check(iface));
    }

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("cabincan doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
    }
}

fn backends_check() -> CheckResult {
    let backends = if cfg!(target_os = "linux") {
        "loopback, socketcan"
    } else {
        "loopback"
    };
    CheckResult::new("backends", CheckStatus::Info, backends)
}

/// SocketCAN needs the `can`/`can_raw` kernel modules; only the loopback
/// backend works without them.
fn can_socket_check() -> CheckResult {
    let registry = Registry::new();
    match registry.init(BackendKind::SocketCan) {
        Ok(()) => CheckResult::new("can_socket", CheckStatus::Pass, "raw CAN socket opened"),
        Err(err) => CheckResult::new("can_socket", CheckStatus::Warn, err.to_string()),
    }
}

/// Round-trip one frame through the loopback backend: subscription
/// delivery and the receive queue.
fn loopback_selftest() -> CheckResult {
    const NAME: &str = "selftest";
    match run_loopback_selftest(NAME) {
        Ok(()) => CheckResult::new(
            "loopback",
            CheckStatus::Pass,
            "subscribe, send and recv round-trip",
        ),
        Err(detail) => CheckResult::new("loopback", CheckStatus::Fail, detail),
    }
}

fn run_loopback_selftest(name: &str) -> Result<(), String> {
    let registry = Registry::new();
    registry
        .init(BackendKind::Loopback)
        .map_err(|e| e.to_string())?;
    registry
        .open(name, &ChannelConfig::default())
        .map_err(|e| e.to_string())?;

    let delivered = Arc::new(AtomicUsize::new(0));
    let seen = delivered.clone();
    registry
        .subscribe(name, Some(cabincan::Filter::exact(0x123)), move |_: &Frame| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .map_err(|e| e.to_string())?;

    let frame = Frame::new(0x123, &[0xDE, 0xAD, 0xBE, 0xEF]).map_err(|e| e.to_string())?;
    registry
        .send(name, &frame, Timeout::NonBlocking)
        .map_err(|e| e.to_string())?;
    let echoed = registry
        .recv(name, Timeout::NonBlocking)
        .map_err(|e| e.to_string())?;

    if delivered.load(Ordering::SeqCst) != 1 {
        return Err("subscriber was not called exactly once".to_string());
    }
    if echoed != frame {
        return Err(format!("read back {echoed}, sent {frame}"));
    }
    Ok(())
}

fn iface_check(iface: &str) -> CheckResult {
    let registry = Registry::new();
    let result = registry
        .init(BackendKind::SocketCan)
        .and_then(|()| registry.open(iface, &ChannelConfig::default()))
        .and_then(|()| registry.status(iface));
    match result {
        Ok(state) => CheckResult::new(
            "iface",
            CheckStatus::Pass,
            format!("{iface}: {state} (netlink)"),
        ),
        Err(err) => CheckResult::new("iface", CheckStatus::Fail, format!("{iface}: {err}")),
    }
}
