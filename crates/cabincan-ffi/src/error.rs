use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use cabincan_bus::{CanError, ErrorKind};

use crate::types::CanResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let sanitized = message.into().replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> CanResult {
    set_error_message(message);
    CanResult::Invalid
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_can_error(err: &CanError) -> CanResult {
    set_error_message(err.to_string());
    CanResult::from(err.kind())
}

impl From<ErrorKind> for CanResult {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::WouldBlock => CanResult::Again,
            ErrorKind::Timeout => CanResult::Timeout,
            ErrorKind::Invalid => CanResult::Invalid,
            ErrorKind::Io => CanResult::Io,
            ErrorKind::BusOff => CanResult::BusOff,
            ErrorKind::State => CanResult::State,
            ErrorKind::OutOfMemory => CanResult::Memory,
            ErrorKind::Permission => CanResult::Permission,
            ErrorKind::NoDevice => CanResult::NoDev,
            ErrorKind::Unsupported => CanResult::Unsupported,
        }
    }
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_match_error_kind_codes() {
        for kind in [
            ErrorKind::WouldBlock,
            ErrorKind::Timeout,
            ErrorKind::Invalid,
            ErrorKind::Io,
            ErrorKind::BusOff,
            ErrorKind::State,
            ErrorKind::OutOfMemory,
            ErrorKind::Permission,
            ErrorKind::NoDevice,
            ErrorKind::Unsupported,
        ] {
            assert_eq!(CanResult::from(kind) as i32, kind.code());
        }
    }

    #[test]
    fn interior_nul_is_sanitized() {
        set_error_message("bad\0name");
        // SAFETY: the pointer refers to this thread's live CString.
        let text = unsafe { std::ffi::CStr::from_ptr(last_error_ptr()) };
        assert_eq!(text.to_str().unwrap(), "bad?name");
        clear_error_state();
    }
}
