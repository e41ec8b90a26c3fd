use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cabincan::frame::parse_hex_payload;
use cabincan::{BackendKind, ChannelConfig, Frame, FrameFlags, Mode, Registry};
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{can_error, CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod doctor;
pub mod dump;
pub mod job;
pub mod recover;
pub mod recv;
pub mod send;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a single frame.
    Send(SendArgs),
    /// Print frames as they arrive.
    Dump(DumpArgs),
    /// Read one frame from the receive queue.
    Recv(RecvArgs),
    /// Transmit a frame periodically.
    Job(JobArgs),
    /// Show the controller's bus state.
    Status(IfaceArgs),
    /// Request a bus-off restart.
    Recover(IfaceArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, backend: BackendArg, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, backend, format),
        Command::Dump(args) => dump::run(args, backend, format),
        Command::Recv(args) => recv::run(args, backend, format),
        Command::Job(args) => job::run(args, backend, format),
        Command::Status(args) => status::run(args, backend, format),
        Command::Recover(args) => recover::run(args, backend, format),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum BackendArg {
    Socketcan,
    Loopback,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Socketcan => BackendKind::SocketCan,
            BackendArg::Loopback => BackendKind::Loopback,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ModeArg {
    Normal,
    Loopback,
    Silent,
    SilentLoopback,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Normal => Mode::Normal,
            ModeArg::Loopback => Mode::Loopback,
            ModeArg::Silent => Mode::Silent,
            ModeArg::SilentLoopback => Mode::SilentLoopback,
        }
    }
}

/// Link settings shared by every command that opens a channel.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Nominal bitrate in bit/s (applied with --bring-up).
    #[arg(long, default_value_t = 500_000)]
    pub bitrate: u32,
    /// Controller mode (applied with --bring-up).
    #[arg(long, value_enum, default_value = "normal")]
    pub mode: ModeArg,
    /// Configure and raise the interface before use (needs CAP_NET_ADMIN).
    #[arg(long)]
    pub bring_up: bool,
}

impl LinkArgs {
    pub fn config(&self) -> ChannelConfig {
        ChannelConfig {
            mode: self.mode.into(),
            bring_up: self.bring_up,
            ..ChannelConfig::with_bitrate(self.bitrate)
        }
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Interface name, e.g. can0.
    pub iface: String,
    /// Identifier in hex, with or without 0x.
    #[arg(value_parser = parse_can_id)]
    pub id: u32,
    /// Payload bytes in hex: `de ad be ef` or `DEADBEEF`.
    pub bytes: Vec<String>,
    /// Use a 29-bit identifier.
    #[arg(long, short = 'e')]
    pub extended: bool,
    /// Send a remote request for `--rtr-len` bytes instead of data.
    #[arg(long, conflicts_with = "bytes")]
    pub rtr: bool,
    /// Length requested by a remote frame.
    #[arg(long, default_value_t = 0, requires = "rtr")]
    pub rtr_len: u8,
    /// Give up if the transmit queue stays full this long (e.g. 100ms, 1s).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Interface name, e.g. can0.
    pub iface: String,
    /// Mask filter as `id:mask` in hex.
    #[arg(long, conflicts_with_all = ["range", "ids"])]
    pub filter: Option<String>,
    /// Inclusive id range as `lo-hi` in hex.
    #[arg(long, conflicts_with_all = ["filter", "ids"])]
    pub range: Option<String>,
    /// Explicit ids, comma-separated hex.
    #[arg(long, value_delimiter = ',', value_parser = parse_can_id, conflicts_with_all = ["filter", "range"])]
    pub ids: Option<Vec<u32>>,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Stop after this long (e.g. 10s). Default: until Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct RecvArgs {
    /// Interface name, e.g. can0.
    pub iface: String,
    /// How long to wait for a frame (e.g. 500ms, 2s).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct JobArgs {
    /// Interface name, e.g. can0.
    pub iface: String,
    /// Transmit period (e.g. 100ms).
    pub period: String,
    /// Identifier in hex, with or without 0x.
    #[arg(value_parser = parse_can_id)]
    pub id: u32,
    /// Payload bytes in hex.
    pub bytes: Vec<String>,
    /// Use a 29-bit identifier.
    #[arg(long, short = 'e')]
    pub extended: bool,
    /// Stop after this long (e.g. 5s). Default: until Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
    /// Increment this payload byte before every transmission.
    #[arg(long, value_name = "INDEX")]
    pub counter_byte: Option<usize>,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct IfaceArgs {
    /// Interface name, e.g. can0.
    pub iface: String,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show built backends and frame limits.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    /// Also try opening this interface.
    #[arg(long)]
    pub iface: Option<String>,
}

/// Hex identifier, `0x` prefix optional. Range is checked when the frame
/// is built.
pub fn parse_can_id(input: &str) -> Result<u32, String> {
    let digits = input
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|_| format!("invalid CAN id: {input}"))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "ms")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(match unit {
        "s" => Duration::from_secs(value),
        _ => Duration::from_millis(value),
    })
}

pub fn build_frame(id: u32, bytes: &[String], extended: bool) -> CliResult<Frame> {
    let payload =
        parse_hex_payload(bytes).map_err(|err| CliError::usage(format!("payload: {err}")))?;
    let flags = if extended {
        FrameFlags::EXTENDED_ID
    } else {
        FrameFlags::NONE
    };
    Frame::with_flags(id, &payload, flags).map_err(|err| CliError::usage(format!("frame: {err}")))
}

/// Initialize a registry on `backend` and open `iface` on it.
pub fn open_channel(backend: BackendArg, iface: &str, link: &LinkArgs) -> CliResult<Registry> {
    let registry = Registry::new();
    registry
        .init(backend.into())
        .map_err(|err| can_error("backend init failed", err))?;
    registry
        .open(iface, &link.config())
        .map_err(|err| can_error(&format!("open {iface} failed"), err))?;
    Ok(registry)
}

/// Flag cleared by Ctrl-C.
pub fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_ids_are_hex() {
        assert_eq!(parse_can_id("0x123").unwrap(), 0x123);
        assert_eq!(parse_can_id("7E8").unwrap(), 0x7E8);
        assert_eq!(parse_can_id("18DAF110").unwrap(), 0x18DA_F110);
        assert!(parse_can_id("zz").is_err());
    }

    #[test]
    fn durations_default_to_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("40").unwrap(), Duration::from_millis(40));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn build_frame_checks_id_width() {
        let bytes = vec!["de".to_string(), "ad".to_string()];
        assert!(build_frame(0x800, &bytes, false).is_err());
        let frame = build_frame(0x800, &bytes, true).unwrap();
        assert!(frame.is_extended());
        assert_eq!(frame.payload(), &[0xDE, 0xAD]);
    }

    #[test]
    fn link_args_build_config() {
        let link = LinkArgs {
            bitrate: 250_000,
            mode: ModeArg::Silent,
            bring_up: true,
        };
        let cfg = link.config();
        assert_eq!(cfg.bitrate, 250_000);
        assert_eq!(cfg.mode, Mode::Silent);
        assert!(cfg.bring_up);
    }
}
