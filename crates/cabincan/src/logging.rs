use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Crates whose events follow `--log-level`.
const CAN_TARGETS: [&str; 4] = [
    "cabincan",
    "cabincan_frame",
    "cabincan_transport",
    "cabincan_bus",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    /// One JSON object per event, fields flattened to the top level.
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// `--log-level` applies to the cabincan crates. Netlink and socket
/// internals stay at warn so `--log-level trace` shows link and worker
/// events rather than netlink message dumps.
fn can_targets(level: LogLevel) -> Targets {
    let level = LevelFilter::from(level);
    CAN_TARGETS.iter().fold(
        Targets::new().with_default(level.min(LevelFilter::WARN)),
        |targets, name| targets.with_target(*name, level),
    )
}

/// Send library events (link lifecycle, receive and job workers) to stderr
/// so stdout carries only frames and reports. Thread names identify the
/// `cabincan-rx-*` and `cabincan-jobs-*` workers; at debug and above the
/// emitting layer (`cabincan_transport`, `cabincan_bus`) is shown too.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let verbose = LevelFilter::from(level) >= LevelFilter::DEBUG;
    let registry = tracing_subscriber::registry().with(can_targets(level));
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(verbose);

    let _ = match format {
        LogFormat::Text => registry.with(fmt).try_init(),
        LogFormat::Json => registry.with(fmt.json().flatten_event(true)).try_init(),
    };
}
