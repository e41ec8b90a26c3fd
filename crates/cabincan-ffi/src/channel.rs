//! Per-channel verbs. Every function resolves its channel through the
//! process-wide registry in `lib.rs`.

use std::os::raw::{c_char, c_void};
use std::time::Duration;

use cabincan_bus::{ChannelConfig, Frame, Timeout};

use crate::args::{id_arg, out_arg, required_ref_arg, required_str_arg};
use crate::error;
use crate::types::{
    CanBusState, CanCallback, CanConfig, CanFilter, CanFrame, CanResult, CanTxPrepare, UserData,
};
use crate::REGISTRY;

macro_rules! try_arg {
    ($expr:expr) => {
        match $expr {
            Some(v) => v,
            None => return CanResult::Invalid,
        }
    };
}

macro_rules! try_can {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(err) => return error::map_can_error(&err),
        }
    };
}

fn period_arg(period_ms: u32) -> Option<Duration> {
    if period_ms == 0 {
        let _ = error::set_invalid_argument("period_ms must be greater than zero");
        return None;
    }
    Some(Duration::from_millis(u64::from(period_ms)))
}

/// Open a channel. A null `cfg` uses the default configuration.
///
/// # Safety
/// `name` must be a valid C string; `cfg` must be null or point to a valid
/// `CanConfig`.
#[no_mangle]
pub unsafe extern "C" fn can_open(name: *const c_char, cfg: *const CanConfig) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        let config = if cfg.is_null() {
            ChannelConfig::default()
        } else {
            // SAFETY: non-null and valid per caller contract.
            try_can!(ChannelConfig::try_from(unsafe { &*cfg }))
        };
        try_can!(REGISTRY.open(name, &config));
        CanResult::Ok
    })
}

/// # Safety
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn can_close(name: *const c_char) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        try_can!(REGISTRY.close(name));
        CanResult::Ok
    })
}

/// Send one frame. `timeout_ms` of 0 never blocks; `CAN_TIMEOUT_INFINITE`
/// waits forever.
///
/// # Safety
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn can_send(
    name: *const c_char,
    frame: CanFrame,
    timeout_ms: u32,
) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        let frame = try_can!(Frame::try_from(&frame));
        try_can!(REGISTRY.send(name, &frame, Timeout::from_millis(timeout_ms)));
        CanResult::Ok
    })
}

/// Read one frame from the channel's receive queue.
///
/// # Safety
/// `name` must be a valid C string and `out` a writable `CanFrame`.
#[no_mangle]
pub unsafe extern "C" fn can_recv(
    name: *const c_char,
    out: *mut CanFrame,
    timeout_ms: u32,
) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        // SAFETY: forwarded caller contract.
        let out = try_arg!(unsafe { out_arg(out, "out") });
        let frame = try_can!(REGISTRY.recv(name, Timeout::from_millis(timeout_ms)));
        *out = CanFrame::from(&frame);
        CanResult::Ok
    })
}

/// Subscribe `callback` to frames accepted by `filter` (null accepts all).
///
/// The callback runs on the channel's receive thread, or on the sending
/// thread for the loopback device. It must not call `can_close` or
/// `can_dispose`.
///
/// # Safety
/// `name` must be a valid C string, `sub_id` writable, and `filter` null or
/// a valid `CanFilter` whose id list (if any) is readable for `count`
/// entries. `user` is passed back untouched and must stay valid until the
/// subscription is removed.
#[no_mangle]
pub unsafe extern "C" fn can_subscribe(
    name: *const c_char,
    sub_id: *mut i32,
    filter: *const CanFilter,
    callback: CanCallback,
    user: *mut c_void,
) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        // SAFETY: forwarded caller contract.
        let sub_id = try_arg!(unsafe { out_arg(sub_id, "sub_id") });
        let Some(callback) = callback else {
            return error::set_invalid_argument("callback cannot be null");
        };
        let filter = if filter.is_null() {
            None
        } else {
            // SAFETY: non-null and valid per caller contract, list included.
            Some(try_can!(unsafe { (*filter).to_filter() }))
        };

        let user = UserData(user);
        let id = try_can!(REGISTRY.subscribe(name, filter, move |frame: &Frame| {
            let raw = CanFrame::from(frame);
            // SAFETY: the caller registered this callback with this context pointer.
            unsafe { callback(&raw, user.as_ptr()) };
        }));
        *sub_id = id as i32;
        CanResult::Ok
    })
}

/// Remove a subscription. Once this returns, the callback is not running
/// and will not run again, so its `user` context may be freed. Calling it
/// from inside that callback removes it without waiting.
///
/// # Safety
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn can_unsubscribe(name: *const c_char, sub_id: i32) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        let sub_id = try_arg!(id_arg(sub_id, "sub_id"));
        try_can!(REGISTRY.unsubscribe(name, sub_id));
        CanResult::Ok
    })
}

/// Transmit `frame` every `period_ms` until cancelled.
///
/// # Safety
/// `name` must be a valid C string, `job_id` writable and `frame` a
/// readable `CanFrame`.
#[no_mangle]
pub unsafe extern "C" fn can_register_job(
    name: *const c_char,
    job_id: *mut i32,
    frame: *const CanFrame,
    period_ms: u32,
) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        // SAFETY: forwarded caller contract.
        let job_id = try_arg!(unsafe { out_arg(job_id, "job_id") });
        // SAFETY: forwarded caller contract.
        let frame = try_arg!(unsafe { required_ref_arg(frame, "frame") });
        let period = try_arg!(period_arg(period_ms));
        let frame = try_can!(Frame::try_from(frame));

        let id = try_can!(REGISTRY.register_job(name, frame, period));
        *job_id = id as i32;
        CanResult::Ok
    })
}

/// Periodic job whose frame is handed to `prep` before every transmission.
///
/// Edits made by `prep` carry over to the next period. An edit that leaves
/// the frame invalid (bad id or dlc) is discarded and the previous frame is
/// sent.
///
/// # Safety
/// As for `can_register_job`; `prep_user` must stay valid until the job is
/// cancelled. `prep` runs on the channel's scheduler thread.
#[no_mangle]
pub unsafe extern "C" fn can_register_job_ex(
    name: *const c_char,
    job_id: *mut i32,
    frame: *const CanFrame,
    period_ms: u32,
    prep: CanTxPrepare,
    prep_user: *mut c_void,
) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        // SAFETY: forwarded caller contract.
        let job_id = try_arg!(unsafe { out_arg(job_id, "job_id") });
        // SAFETY: forwarded caller contract.
        let frame = try_arg!(unsafe { required_ref_arg(frame, "frame") });
        let Some(prep) = prep else {
            return error::set_invalid_argument("prep cannot be null");
        };
        let period = try_arg!(period_arg(period_ms));
        let frame = try_can!(Frame::try_from(frame));

        let user = UserData(prep_user);
        let id = try_can!(REGISTRY.register_job_ex(name, frame, period, move |frame: &mut Frame| {
            let mut raw = CanFrame::from(&*frame);
            // SAFETY: the caller registered this hook with this context pointer.
            unsafe { prep(&mut raw, user.as_ptr()) };
            if let Ok(edited) = Frame::try_from(&raw) {
                *frame = edited;
            }
        }));
        *job_id = id as i32;
        CanResult::Ok
    })
}

/// Cancel a job. Once this returns, its `prep` hook is not running and
/// will not run again.
///
/// # Safety
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn can_cancel_job(name: *const c_char, job_id: i32) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        let job_id = try_arg!(id_arg(job_id, "job_id"));
        try_can!(REGISTRY.cancel_job(name, job_id));
        CanResult::Ok
    })
}

/// # Safety
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn can_recover(name: *const c_char) -> CanResult {
    crate::ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let name = try_arg!(unsafe { required_str_arg(name, "name") });
        try_can!(REGISTRY.recover(name));
        CanResult::Ok
    })
}

/// Bus state of an open channel.
///
/// Any failure, including an unknown name, reports error-passive; the cause
/// is available from `can_last_error`.
///
/// # Safety
/// `name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn can_get_status(name: *const c_char) -> CanBusState {
    crate::ffi_boundary(CanBusState::ErrorPassive, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        let Some(name) = (unsafe { required_str_arg(name, "name") }) else {
            return CanBusState::ErrorPassive;
        };
        match REGISTRY.status(name) {
            Ok(state) => CanBusState::from(state),
            Err(err) => {
                let _ = error::map_can_error(&err);
                CanBusState::ErrorPassive
            }
        }
    })
}
