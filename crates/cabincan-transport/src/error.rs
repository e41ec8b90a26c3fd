use std::fmt;

use cabincan_frame::FrameError;

/// Canonical transport error taxonomy.
///
/// Backend-native failures (errno values, tool diagnostics) are translated
/// into these variants at the backend boundary and never leak upward raw.
#[derive(Debug, thiserror::Error)]
pub enum CanError {
    /// A non-blocking operation had nothing to do (queue full or empty).
    #[error("operation would block")]
    WouldBlock,

    /// A blocking operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Bad argument: empty or unknown name, unknown id, malformed frame.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Generic transport failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The controller is bus-off.
    #[error("controller is bus-off")]
    BusOff,

    /// Operation not valid in the current lifecycle state.
    #[error("invalid state: {0}")]
    State(String),

    #[error("out of memory")]
    OutOfMemory,

    /// Insufficient privilege to open or configure the link.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The named link or protocol family does not exist on this host.
    #[error("no such device: {0}")]
    NoDevice(String),

    /// The backend cannot perform this operation from user space.
    #[error("unsupported by backend: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, CanError>;

/// Fieldless mirror of [`CanError`] with stable numeric codes.
///
/// Codes follow the `can_err_t` ordering used by the C consumers.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    WouldBlock = 1,
    Timeout = 2,
    Invalid = 3,
    Io = 4,
    BusOff = 5,
    State = 6,
    OutOfMemory = 7,
    Permission = 8,
    NoDevice = 9,
    Unsupported = 10,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::WouldBlock => "would_block",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Io => "io",
            ErrorKind::BusOff => "bus_off",
            ErrorKind::State => "state",
            ErrorKind::OutOfMemory => "out_of_memory",
            ErrorKind::Permission => "permission",
            ErrorKind::NoDevice => "no_device",
            ErrorKind::Unsupported => "unsupported",
        }
    }

    /// True for conditions the caller may retry locally.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::WouldBlock | ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CanError::WouldBlock => ErrorKind::WouldBlock,
            CanError::Timeout => ErrorKind::Timeout,
            CanError::Invalid(_) => ErrorKind::Invalid,
            CanError::Io(_) => ErrorKind::Io,
            CanError::BusOff => ErrorKind::BusOff,
            CanError::State(_) => ErrorKind::State,
            CanError::OutOfMemory => ErrorKind::OutOfMemory,
            CanError::Permission(_) => ErrorKind::Permission,
            CanError::NoDevice(_) => ErrorKind::NoDevice,
            CanError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        CanError::Invalid(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        CanError::State(message.into())
    }

    /// Translate an OS error into the taxonomy, naming `context` in the
    /// message of variants that carry one.
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        #[cfg(unix)]
        if let Some(errno) = err.raw_os_error() {
            return Self::from_errno(context, errno).unwrap_or(CanError::Io(err));
        }

        match err.kind() {
            std::io::ErrorKind::WouldBlock => CanError::WouldBlock,
            std::io::ErrorKind::TimedOut => CanError::Timeout,
            std::io::ErrorKind::PermissionDenied => {
                CanError::Permission(format!("{context}: {err}"))
            }
            std::io::ErrorKind::NotFound => CanError::NoDevice(format!("{context}: {err}")),
            std::io::ErrorKind::OutOfMemory => CanError::OutOfMemory,
            std::io::ErrorKind::InvalidInput => CanError::Invalid(format!("{context}: {err}")),
            _ => CanError::Io(err),
        }
    }

    /// Map an errno to a specific variant; `None` means generic `Io`.
    #[cfg(unix)]
    pub fn from_errno(context: &str, errno: i32) -> Option<Self> {
        let describe = || format!("{context}: {}", std::io::Error::from_raw_os_error(errno));
        let mapped = match errno {
            libc::EAGAIN => CanError::WouldBlock,
            #[allow(unreachable_patterns)]
            libc::EWOULDBLOCK => CanError::WouldBlock,
            libc::ETIMEDOUT => CanError::Timeout,
            libc::EPERM | libc::EACCES => CanError::Permission(describe()),
            libc::ENODEV | libc::ENXIO | libc::EAFNOSUPPORT | libc::EPROTONOSUPPORT => {
                CanError::NoDevice(describe())
            }
            libc::ENETDOWN => CanError::State(describe()),
            libc::ENOBUFS | libc::ENOMEM => CanError::OutOfMemory,
            libc::EINVAL => CanError::Invalid(describe()),
            _ => return None,
        };
        Some(mapped)
    }

    /// Capture `errno` right after a failed libc call.
    #[cfg(unix)]
    pub(crate) fn last_os_error(context: &str) -> Self {
        Self::from_io(context, std::io::Error::last_os_error())
    }
}

impl From<FrameError> for CanError {
    fn from(err: FrameError) -> Self {
        CanError::Invalid(err.to_string())
    }
}
