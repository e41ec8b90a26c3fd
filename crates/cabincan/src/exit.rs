use std::fmt;

use cabincan::{CanError, ErrorKind};

pub const SUCCESS: i32 = 0;
pub const BUS_ERROR: i32 = 3;
pub const UNSUPPORTED: i32 = 4;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const NO_DEVICE: i32 = 69;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::WouldBlock | ErrorKind::Timeout => TIMEOUT,
        ErrorKind::Invalid => DATA_INVALID,
        ErrorKind::Permission => PERMISSION_DENIED,
        ErrorKind::NoDevice => NO_DEVICE,
        ErrorKind::Unsupported => UNSUPPORTED,
        ErrorKind::Io | ErrorKind::BusOff | ErrorKind::State => BUS_ERROR,
        ErrorKind::OutOfMemory => INTERNAL,
    }
}

pub fn can_error(context: &str, err: CanError) -> CliError {
    CliError::new(exit_code(err.kind()), format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_distinct_exit_codes() {
        assert_eq!(can_error("recv", CanError::Timeout).code, TIMEOUT);
        assert_eq!(
            can_error("open", CanError::Permission("CAP_NET_RAW".into())).code,
            PERMISSION_DENIED
        );
        assert_eq!(can_error("open", CanError::NoDevice("can9".into())).code, NO_DEVICE);
        assert_eq!(can_error("send", CanError::BusOff).code, BUS_ERROR);
        assert_eq!(
            can_error("recover", CanError::Unsupported("restart")).code,
            UNSUPPORTED
        );
    }
}
