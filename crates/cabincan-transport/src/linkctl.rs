//! CAN interface control over rtnetlink.
//!
//! Bit timing, controller mode, link state and bus-off restart are netlink
//! requests against the interface index, issued through the `socketcan`
//! crate's [`CanInterface`]. Configuration needs `CAP_NET_ADMIN`; state
//! queries do not.

use socketcan::nl::{CanCtrlMode, CanCtrlModes, CanInterface, CanState};
use tracing::debug;

use crate::config::ChannelConfig;
use crate::error::{CanError, Result};
use crate::traits::BusState;

/// Netlink handle for one named CAN interface.
pub struct LinkControl {
    name: String,
    iface: CanInterface,
}

impl LinkControl {
    /// Resolve `name` to its interface index.
    pub fn open(name: &str) -> Result<Self> {
        let iface = CanInterface::open(name)
            .map_err(|err| CanError::NoDevice(format!("{name}: {err}")))?;
        Ok(Self {
            name: name.to_string(),
            iface,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the link down, apply bit timing and mode, bring it back up.
    ///
    /// The synchronization jump width is left to the kernel's bit-timing
    /// calculation for the requested bitrate and sample point.
    pub fn configure(&self, config: &ChannelConfig) -> Result<()> {
        self.iface
            .bring_down()
            .map_err(|err| classify_failure(&self.name, "link down", &err.to_string()))?;

        self.iface
            .set_bitrate(config.bitrate, sample_point_permille(config.sample_point))
            .map_err(|err| classify_failure(&self.name, "set bitrate", &err.to_string()))?;

        let mut modes = CanCtrlModes::from_mode(CanCtrlMode::ListenOnly, config.mode.is_silent());
        modes.add(CanCtrlMode::Loopback, config.mode.is_loopback());
        self.iface
            .set_ctrlmodes(modes)
            .map_err(|err| classify_failure(&self.name, "set ctrlmode", &err.to_string()))?;

        self.iface
            .bring_up()
            .map_err(|err| classify_failure(&self.name, "link up", &err.to_string()))?;
        debug!(
            link = %self.name,
            bitrate = config.bitrate,
            mode = ?config.mode,
            sjw = config.sjw,
            "link configured and up"
        );
        Ok(())
    }

    /// Ask the driver to leave bus-off.
    pub fn restart(&self) -> Result<()> {
        self.iface
            .restart()
            .map_err(|err| classify_failure(&self.name, "restart", &err.to_string()))?;
        debug!(link = %self.name, "bus-off restart requested");
        Ok(())
    }

    /// Current controller state as reported by the driver.
    pub fn state(&self) -> Result<BusState> {
        let state = self
            .iface
            .state()
            .map_err(|err| classify_failure(&self.name, "query state", &err.to_string()))?;
        Ok(bus_state(state))
    }
}

/// Fold the driver's six-state view onto [`BusState`].
///
/// Links without a CAN state (virtual `vcan` links) report error-active.
pub fn bus_state(state: Option<CanState>) -> BusState {
    match state {
        Some(CanState::ErrorPassive) => BusState::ErrorPassive,
        Some(CanState::BusOff) => BusState::BusOff,
        _ => BusState::ErrorActive,
    }
}

/// Sample point in tenths of a percent, as netlink expects it.
pub fn sample_point_permille(fraction: f32) -> u32 {
    (fraction.clamp(0.0, 1.0) * 1000.0).round() as u32
}

/// Map a netlink failure onto the error taxonomy by its errno text.
pub(crate) fn classify_failure(name: &str, op: &str, detail: &str) -> CanError {
    let message = format!("{name}: {op}: {detail}");
    let lower = detail.to_ascii_lowercase();
    if lower.contains("not permitted") || lower.contains("permission denied") {
        CanError::Permission(message)
    } else if lower.contains("no such device") {
        CanError::NoDevice(message)
    } else if lower.contains("resource busy") {
        CanError::State(message)
    } else if lower.contains("not supported") {
        CanError::Unsupported("link does not accept this CAN configuration")
    } else {
        CanError::Io(std::io::Error::other(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn driver_states_fold_to_bus_state() {
        assert_eq!(bus_state(Some(CanState::ErrorActive)), BusState::ErrorActive);
        assert_eq!(bus_state(Some(CanState::ErrorWarning)), BusState::ErrorActive);
        assert_eq!(bus_state(Some(CanState::ErrorPassive)), BusState::ErrorPassive);
        assert_eq!(bus_state(Some(CanState::BusOff)), BusState::BusOff);
        assert_eq!(bus_state(None), BusState::ErrorActive);
    }

    #[test]
    fn sample_point_is_permille() {
        assert_eq!(sample_point_permille(0.875), 875);
        assert_eq!(sample_point_permille(0.8), 800);
        assert_eq!(sample_point_permille(1.5), 1000);
    }

    #[test]
    fn netlink_failures_classify() {
        let kind = |detail| classify_failure("can0", "link up", detail).kind();
        assert_eq!(kind("Operation not permitted (os error 1)"), ErrorKind::Permission);
        assert_eq!(kind("No such device (os error 19)"), ErrorKind::NoDevice);
        assert_eq!(kind("Device or resource busy (os error 16)"), ErrorKind::State);
        assert_eq!(kind("Operation not supported (os error 95)"), ErrorKind::Unsupported);
        assert_eq!(kind("Invalid argument (os error 22)"), ErrorKind::Io);
    }

    #[test]
    fn unknown_interface_is_no_device() {
        let err = LinkControl::open("cbnmiss0").err().map(|e| e.kind());
        assert_eq!(err, Some(ErrorKind::NoDevice));
    }
}
