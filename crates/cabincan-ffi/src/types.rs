use std::ffi::c_void;

use cabincan_bus::{
    BackendKind, BusState, CanError, ChannelConfig, Filter, Frame, FrameFlags, Mode,
};

/// Result codes, in `can_err_t` order.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanResult {
    Ok = 0,
    Again = 1,
    Timeout = 2,
    Invalid = 3,
    Io = 4,
    BusOff = 5,
    State = 6,
    Memory = 7,
    Permission = 8,
    NoDev = 9,
    Unsupported = 10,
    Internal = 99,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanBusState {
    ErrorActive = 0,
    ErrorPassive = 1,
    BusOff = 2,
}

impl From<BusState> for CanBusState {
    fn from(state: BusState) -> Self {
        match state {
            BusState::ErrorActive => CanBusState::ErrorActive,
            BusState::ErrorPassive => CanBusState::ErrorPassive,
            BusState::BusOff => CanBusState::BusOff,
        }
    }
}

pub const CAN_DEVICE_LOOPBACK: i32 = 0;
pub const CAN_DEVICE_LINUX: i32 = 1;
pub const CAN_DEVICE_ESP32: i32 = 2;

pub const CAN_MODE_NORMAL: i32 = 0;
pub const CAN_MODE_LOOPBACK: i32 = 1;
pub const CAN_MODE_SILENT: i32 = 2;
pub const CAN_MODE_SILENT_LOOPBACK: i32 = 3;

pub const CAN_FRAME_EXTID: u32 = 1 << 0;
pub const CAN_FRAME_RTR: u32 = 1 << 1;
pub const CAN_FRAME_ERR: u32 = 1 << 2;

pub const CAN_FILTER_RANGE: i32 = 0;
pub const CAN_FILTER_MASK: i32 = 1;
pub const CAN_FILTER_LIST: i32 = 2;

/// Wait forever in `can_send` / `can_recv`.
pub const CAN_TIMEOUT_INFINITE: u32 = u32::MAX;

pub(crate) fn backend_kind(device: i32) -> Result<BackendKind, CanError> {
    match device {
        CAN_DEVICE_LOOPBACK => Ok(BackendKind::Loopback),
        CAN_DEVICE_LINUX => Ok(BackendKind::SocketCan),
        CAN_DEVICE_ESP32 => Err(CanError::NoDevice(
            "microcontroller peripherals are not reachable from this library".to_string(),
        )),
        other => Err(CanError::Invalid(format!("unknown device kind {other}"))),
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub dlc: u8,
    pub data: [u8; 8],
    pub flags: u32,
}

impl From<&Frame> for CanFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id,
            dlc: frame.dlc(),
            data: frame.data,
            flags: u32::from(frame.flags.bits()),
        }
    }
}

impl TryFrom<&CanFrame> for Frame {
    type Error = CanError;

    fn try_from(raw: &CanFrame) -> Result<Self, CanError> {
        let flags = FrameFlags::from_bits_truncate((raw.flags & 0x7) as u8);
        let len = usize::from(raw.dlc);
        if len > raw.data.len() {
            return Err(CanError::Invalid(format!("dlc {len} exceeds 8")));
        }
        if flags.contains(FrameFlags::REMOTE_REQUEST) {
            let mut frame = Frame::with_flags(raw.id, &[], flags)?;
            frame.len = raw.dlc;
            return Ok(frame);
        }
        Ok(Frame::with_flags(raw.id, &raw.data[..len], flags)?)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CanRange {
    pub min: u32,
    pub max: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CanMask {
    pub id: u32,
    pub mask: u32,
}

/// Borrowed id array; copied during `can_subscribe`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CanIdList {
    pub list: *const u32,
    pub count: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union CanFilterData {
    pub range: CanRange,
    pub mask: CanMask,
    pub list: CanIdList,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CanFilter {
    /// One of `CAN_FILTER_RANGE`, `CAN_FILTER_MASK`, `CAN_FILTER_LIST`.
    pub kind: i32,
    pub data: CanFilterData,
}

impl CanFilter {
    /// Owned filter from the C description.
    ///
    /// # Safety
    /// For `CAN_FILTER_LIST` with a non-zero count, `data.list.list` must be
    /// readable for `count` elements.
    pub(crate) unsafe fn to_filter(&self) -> Result<Filter, CanError> {
        match self.kind {
            CAN_FILTER_RANGE => {
                // SAFETY: `kind` selects the `range` member.
                let range = unsafe { self.data.range };
                Ok(Filter::Range {
                    min: range.min,
                    max: range.max,
                })
            }
            CAN_FILTER_MASK => {
                // SAFETY: `kind` selects the `mask` member.
                let mask = unsafe { self.data.mask };
                Ok(Filter::Mask {
                    id: mask.id,
                    mask: mask.mask,
                })
            }
            CAN_FILTER_LIST => {
                // SAFETY: `kind` selects the `list` member.
                let list = unsafe { self.data.list };
                if list.count == 0 || list.list.is_null() {
                    return Ok(Filter::list(Vec::<u32>::new()));
                }
                // SAFETY: the caller guarantees `count` readable elements.
                let ids = unsafe { std::slice::from_raw_parts(list.list, list.count as usize) };
                Ok(Filter::list(ids.to_vec()))
            }
            other => Err(CanError::Invalid(format!("unknown filter type {other}"))),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanConfig {
    pub channel: u8,
    pub bitrate: i32,
    pub sample_point: f32,
    pub sjw: i32,
    /// One of the `CAN_MODE_*` constants.
    pub mode: i32,
    /// Non-zero runs the interface bring-up on open.
    pub bring_up: u8,
}

impl Default for CanConfig {
    fn default() -> Self {
        let cfg = ChannelConfig::default();
        Self {
            channel: cfg.channel_index,
            bitrate: cfg.bitrate as i32,
            sample_point: cfg.sample_point,
            sjw: cfg.sjw as i32,
            mode: CAN_MODE_NORMAL,
            bring_up: 0,
        }
    }
}

impl TryFrom<&CanConfig> for ChannelConfig {
    type Error = CanError;

    fn try_from(raw: &CanConfig) -> Result<Self, CanError> {
        let mode = match raw.mode {
            CAN_MODE_NORMAL => Mode::Normal,
            CAN_MODE_LOOPBACK => Mode::Loopback,
            CAN_MODE_SILENT => Mode::Silent,
            CAN_MODE_SILENT_LOOPBACK => Mode::SilentLoopback,
            other => return Err(CanError::Invalid(format!("unknown mode {other}"))),
        };
        let bitrate = u32::try_from(raw.bitrate)
            .map_err(|_| CanError::Invalid(format!("negative bitrate {}", raw.bitrate)))?;
        let sjw = u32::try_from(raw.sjw)
            .map_err(|_| CanError::Invalid(format!("negative sjw {}", raw.sjw)))?;
        Ok(ChannelConfig {
            channel_index: raw.channel,
            bitrate,
            sample_point: raw.sample_point,
            sjw,
            mode,
            bring_up: raw.bring_up != 0,
        })
    }
}

pub type CanCallback = Option<unsafe extern "C" fn(frame: *const CanFrame, user: *mut c_void)>;
pub type CanTxPrepare = Option<unsafe extern "C" fn(frame: *mut CanFrame, user: *mut c_void)>;

/// Caller-owned context pointer handed back to C callbacks.
#[derive(Clone, Copy)]
pub(crate) struct UserData(pub(crate) *mut c_void);

impl UserData {
    /// Closures must go through this rather than `.0` so they capture the
    /// whole `Send` wrapper.
    pub(crate) fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

// SAFETY: the pointer is never dereferenced here, only passed back to the
// caller's callback. Callers registering it accept that the callback runs
// on the receive or scheduler thread.
unsafe impl Send for UserData {}
// SAFETY: see `Send` above.
unsafe impl Sync for UserData {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_conversion_keeps_flags_and_payload() {
        let frame = Frame::new_extended(0x18DA_F110, &[0x02, 0x10, 0x03]).unwrap();
        let raw = CanFrame::from(&frame);
        assert_eq!(raw.dlc, 3);
        assert_eq!(raw.flags, CAN_FRAME_EXTID);
        assert_eq!(Frame::try_from(&raw).unwrap(), frame);
    }

    #[test]
    fn bad_c_frames_are_invalid() {
        let raw = CanFrame {
            id: 0x800,
            dlc: 1,
            ..CanFrame::default()
        };
        assert!(matches!(Frame::try_from(&raw), Err(CanError::Invalid(_))));

        let raw = CanFrame {
            id: 0x100,
            dlc: 9,
            ..CanFrame::default()
        };
        assert!(matches!(Frame::try_from(&raw), Err(CanError::Invalid(_))));
    }

    #[test]
    fn config_conversion() {
        let raw = CanConfig {
            mode: CAN_MODE_SILENT,
            bitrate: 250_000,
            ..CanConfig::default()
        };
        let cfg = ChannelConfig::try_from(&raw).unwrap();
        assert_eq!(cfg.mode, Mode::Silent);
        assert_eq!(cfg.bitrate, 250_000);
        assert!(!cfg.bring_up);

        let raw = CanConfig {
            mode: 7,
            ..CanConfig::default()
        };
        assert!(ChannelConfig::try_from(&raw).is_err());
    }

    #[test]
    fn list_filter_is_copied() {
        let ids = vec![0x100u32, 0x200];
        let raw = CanFilter {
            kind: CAN_FILTER_LIST,
            data: CanFilterData {
                list: CanIdList {
                    list: ids.as_ptr(),
                    count: 2,
                },
            },
        };
        // SAFETY: `ids` is alive and holds `count` elements.
        let filter = unsafe { raw.to_filter() }.unwrap();
        drop(ids);
        assert!(filter.matches(0x200));
        assert!(!filter.matches(0x300));
    }

    #[test]
    fn device_kinds() {
        assert_eq!(backend_kind(CAN_DEVICE_LOOPBACK).unwrap(), BackendKind::Loopback);
        assert!(matches!(
            backend_kind(CAN_DEVICE_ESP32),
            Err(CanError::NoDevice(_))
        ));
        assert!(matches!(backend_kind(42), Err(CanError::Invalid(_))));
    }
}
