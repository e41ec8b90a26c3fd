#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn cabincan(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cabincan"))
        .args(["--log-level", "error", "--backend", "loopback", "--format", "json"])
        .args(args)
        .env_remove("CABINCAN_BACKEND")
        .output()
        .expect("cabincan should run")
}

fn json_line(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().expect("stdout should have a line");
    serde_json::from_str(line).expect("stdout should be json")
}

#[test]
fn send_prints_the_sent_frame() {
    let output = cabincan(&["send", "can0", "0x123", "de", "ad", "be", "ef"]);
    assert!(output.status.success(), "{output:?}");

    let frame = json_line(&output);
    assert_eq!(frame["channel"], "can0");
    assert_eq!(frame["id"], "123");
    assert_eq!(frame["dlc"], 4);
    assert_eq!(frame["data"], "DE AD BE EF");
    assert_eq!(frame["extended"], false);
}

#[test]
fn send_rejects_out_of_range_standard_id() {
    let output = cabincan(&["send", "can0", "800", "01"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn recv_on_idle_channel_times_out() {
    let output = cabincan(&["recv", "can0", "--timeout", "50ms"]);
    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn status_reports_error_active() {
    let output = cabincan(&["status", "can0"]);
    assert!(output.status.success(), "{output:?}");
    let status = json_line(&output);
    assert_eq!(status["state"], "error_active");
    assert_eq!(status["backend"], "loopback");
}

#[test]
fn job_fires_until_duration_elapses() {
    let output = cabincan(&[
        "job",
        "can0",
        "20ms",
        "2a0",
        "00",
        "--counter-byte",
        "0",
        "--duration",
        "300ms",
    ]);
    assert!(output.status.success(), "{output:?}");
    let summary = json_line(&output);
    assert_eq!(summary["id"], "2A0");
    assert_eq!(summary["period_ms"], 20);
    assert!(summary["fired"].as_u64().unwrap() >= 3, "{summary}");
}

#[test]
fn dump_stops_after_duration() {
    let output = cabincan(&["dump", "can0", "--range", "100-1ff", "--duration", "100ms"]);
    assert!(output.status.success(), "{output:?}");
    assert!(output.stdout.is_empty());
}

#[test]
fn doctor_loopback_selftest_passes() {
    let output = cabincan(&["doctor"]);
    let report = json_line(&output);
    let loopback = report["checks"]
        .as_array()
        .expect("checks array")
        .iter()
        .find(|c| c["name"] == "loopback")
        .expect("loopback check present")
        .clone();
    assert_eq!(loopback["status"], "pass");
}

#[test]
fn version_prints_crate_version() {
    let output = cabincan(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(&format!("cabincan {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn extended_version_lists_backends() {
    let output = cabincan(&["version", "--extended"]);
    assert!(output.status.success(), "{output:?}");
    let info = json_line(&output);
    assert_eq!(info["backends"][0]["name"], "loopback");
    assert_eq!(info["backends"][0]["built"], true);
    assert_eq!(info["wire_frame_bytes"], 16);
}

#[test]
fn recover_with_bring_up_cycles_instead_of_restarting() {
    let output = cabincan(&["recover", "can0", "--bring-up"]);
    assert!(output.status.success(), "{output:?}");
    let report = json_line(&output);
    assert_eq!(report["action"], "link_cycled");
    assert_eq!(report["state"], "error_active");
}
