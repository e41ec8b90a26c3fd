//! cabincan-ffi: C-ABI exports for the cabincan transport core.
//!
//! One process-wide registry backs every exported verb. Result codes keep
//! the numbering of the C `can_err_t` enumeration.

mod args;
mod channel;
mod error;
pub mod types;

use std::panic::AssertUnwindSafe;
use std::sync::LazyLock;

use cabincan_bus::Registry;

pub use channel::{
    can_cancel_job, can_close, can_get_status, can_open, can_recover, can_recv, can_register_job,
    can_register_job_ex, can_send, can_subscribe, can_unsubscribe,
};
pub use types::{
    CanBusState, CanCallback, CanConfig, CanFilter, CanFilterData, CanFrame, CanIdList, CanMask,
    CanRange, CanResult, CanTxPrepare, CAN_DEVICE_ESP32, CAN_DEVICE_LINUX, CAN_DEVICE_LOOPBACK,
    CAN_FILTER_LIST, CAN_FILTER_MASK, CAN_FILTER_RANGE, CAN_FRAME_ERR, CAN_FRAME_EXTID,
    CAN_FRAME_RTR, CAN_MODE_LOOPBACK, CAN_MODE_NORMAL, CAN_MODE_SILENT, CAN_MODE_SILENT_LOOPBACK,
    CAN_TIMEOUT_INFINITE,
};

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Select and probe the backend. `device` is one of the `CAN_DEVICE_*`
/// constants.
#[no_mangle]
pub extern "C" fn can_init(device: i32) -> CanResult {
    ffi_boundary(CanResult::Internal, || {
        error::clear_error_state();
        let result = types::backend_kind(device).and_then(|kind| REGISTRY.init(kind));
        match result {
            Ok(()) => CanResult::Ok,
            Err(err) => error::map_can_error(&err),
        }
    })
}

/// Close every channel and release the backend. Safe to call repeatedly.
#[no_mangle]
pub extern "C" fn can_dispose() {
    ffi_boundary((), || {
        REGISTRY.dispose();
        error::clear_error_state();
    });
}

/// Message for the last failed call on this thread; empty after a success.
#[no_mangle]
pub extern "C" fn can_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
