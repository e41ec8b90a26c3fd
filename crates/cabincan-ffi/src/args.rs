use std::ffi::CStr;
use std::os::raw::c_char;

use crate::error;

/// Borrow a channel name from a C string.
///
/// # Safety
/// `value` must be null or point to a valid NUL-terminated C string.
pub(crate) unsafe fn required_str_arg<'a>(value: *const c_char, name: &str) -> Option<&'a str> {
    if value.is_null() {
        let _ = error::set_invalid_argument(format!("{name} cannot be null"));
        return None;
    }

    let as_cstr = {
        // SAFETY: The caller guarantees `value` points to a valid NUL-terminated C string.
        unsafe { CStr::from_ptr(value) }
    };

    match as_cstr.to_str() {
        Ok(v) => Some(v),
        Err(_) => {
            let _ = error::set_invalid_argument(format!("{name} must be valid UTF-8"));
            None
        }
    }
}

/// Borrow a struct argument the caller must provide.
///
/// # Safety
/// `value` must be null or point to a readable, properly aligned `T`.
pub(crate) unsafe fn required_ref_arg<'a, T>(value: *const T, name: &str) -> Option<&'a T> {
    if value.is_null() {
        let _ = error::set_invalid_argument(format!("{name} cannot be null"));
        return None;
    }
    // SAFETY: Null is rejected above; the caller guarantees validity for the call.
    Some(unsafe { &*value })
}

/// Borrow an output slot the caller must provide.
///
/// # Safety
/// `value` must be null or point to a writable, properly aligned `T`.
pub(crate) unsafe fn out_arg<'a, T>(value: *mut T, name: &str) -> Option<&'a mut T> {
    if value.is_null() {
        let _ = error::set_invalid_argument(format!("{name} cannot be null"));
        return None;
    }
    // SAFETY: Null is rejected above; the caller guarantees validity for the call.
    Some(unsafe { &mut *value })
}

/// Ids cross the C boundary as `int`; only non-negative values are ever issued.
pub(crate) fn id_arg(value: i32, name: &str) -> Option<u32> {
    match u32::try_from(value) {
        Ok(v) => Some(v),
        Err(_) => {
            let _ = error::set_invalid_argument(format!("{name} must not be negative"));
            None
        }
    }
}
