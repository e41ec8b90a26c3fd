use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CanError, Result};

/// Controller operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Normal,
    /// Own frames are looped back to the local receiver.
    Loopback,
    /// Listen-only: the controller never drives the bus (no ACK, no TX).
    Silent,
    SilentLoopback,
}

impl Mode {
    pub fn is_silent(self) -> bool {
        matches!(self, Mode::Silent | Mode::SilentLoopback)
    }

    pub fn is_loopback(self) -> bool {
        matches!(self, Mode::Loopback | Mode::SilentLoopback)
    }
}

/// Per-channel link configuration.
///
/// Semantics beyond `bitrate` are backend-specific; a backend that cannot
/// express a setting ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Controller index on multi-controller hardware.
    pub channel_index: u8,
    /// Nominal bitrate in bit/s.
    pub bitrate: u32,
    /// Sample point as a fraction of the bit time, `0.0..=1.0`.
    pub sample_point: f32,
    /// Synchronization jump width in time quanta.
    pub sjw: u32,
    pub mode: Mode,
    /// Run the explicit interface bring-up (bitrate, mode, link up) on open.
    pub bring_up: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_index: 0,
            bitrate: 500_000,
            sample_point: 0.875,
            sjw: 1,
            mode: Mode::Normal,
            bring_up: false,
        }
    }
}

impl ChannelConfig {
    pub fn with_bitrate(bitrate: u32) -> Self {
        Self {
            bitrate,
            ..Self::default()
        }
    }

    /// Reject values no backend can apply.
    pub fn validate(&self) -> Result<()> {
        if self.bitrate == 0 {
            return Err(CanError::invalid("bitrate must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.sample_point) {
            return Err(CanError::invalid(format!(
                "sample point {} outside 0.0..=1.0",
                self.sample_point
            )));
        }
        if self.sjw == 0 {
            return Err(CanError::invalid("sjw must be greater than zero"));
        }
        Ok(())
    }
}

/// Which backend a registry constructs at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Loopback,
    SocketCan,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Loopback => "loopback",
            BackendKind::SocketCan => "socketcan",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loopback" | "debug" => Ok(BackendKind::Loopback),
            "socketcan" | "linux" => Ok(BackendKind::SocketCan),
            other => Err(CanError::invalid(format!("unknown backend: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.bitrate, 500_000);
        assert_eq!(cfg.mode, Mode::Normal);
        assert!(!cfg.bring_up);
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_timing() {
        let zero = ChannelConfig::with_bitrate(0);
        assert!(matches!(zero.validate(), Err(CanError::Invalid(_))));

        let sample = ChannelConfig {
            sample_point: 1.5,
            ..ChannelConfig::default()
        };
        assert!(matches!(sample.validate(), Err(CanError::Invalid(_))));

        let sjw = ChannelConfig {
            sjw: 0,
            ..ChannelConfig::default()
        };
        assert!(matches!(sjw.validate(), Err(CanError::Invalid(_))));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: ChannelConfig =
            serde_json::from_str(r#"{"bitrate":250000,"mode":"silent"}"#).unwrap();
        assert_eq!(cfg.bitrate, 250_000);
        assert_eq!(cfg.mode, Mode::Silent);
        assert_eq!(cfg.sjw, 1);
        assert!(cfg.mode.is_silent());
        assert!(!cfg.mode.is_loopback());
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("loopback".parse::<BackendKind>().unwrap(), BackendKind::Loopback);
        assert_eq!("SocketCAN".parse::<BackendKind>().unwrap(), BackendKind::SocketCan);
        assert_eq!("debug".parse::<BackendKind>().unwrap(), BackendKind::Loopback);
        assert!("esp32".parse::<BackendKind>().is_err());
    }
}
