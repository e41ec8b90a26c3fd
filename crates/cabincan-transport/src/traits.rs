use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cabincan_frame::Frame;
use serde::Serialize;

use crate::config::ChannelConfig;
use crate::error::Result;

/// Frame-arrival callback installed on a backend handle.
///
/// Invoked from the backend's receive path (its own thread for SocketCAN,
/// the writer's thread for loopback) for every inbound frame, unfiltered.
pub type RxCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Opaque per-channel handle issued by [`Backend::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    /// Wrap a backend-assigned raw value.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Blocking budget for `write`/`read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Return [`crate::CanError::WouldBlock`] instead of waiting.
    NonBlocking,
    After(Duration),
    Infinite,
}

impl Timeout {
    /// Millisecond convention of the C surface: `0` is non-blocking,
    /// `u32::MAX` waits forever.
    pub fn from_millis(ms: u32) -> Self {
        match ms {
            0 => Timeout::NonBlocking,
            u32::MAX => Timeout::Infinite,
            ms => Timeout::After(Duration::from_millis(u64::from(ms))),
        }
    }

    /// Absolute deadline of a bounded wait. `None` for the other variants;
    /// an `After` too large to represent is treated as unbounded.
    pub fn deadline(self) -> Option<Instant> {
        match self {
            Timeout::After(d) => Instant::now().checked_add(d),
            _ => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Timeout::NonBlocking
        } else {
            Timeout::After(d)
        }
    }
}

/// Controller error-confinement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusState {
    ErrorActive,
    ErrorPassive,
    BusOff,
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusState::ErrorActive => "error-active",
            BusState::ErrorPassive => "error-passive",
            BusState::BusOff => "bus-off",
        })
    }
}

/// Capability interface implemented once per execution environment.
///
/// Implementations must be safe to call from several threads at once;
/// `write` in particular may race between an application thread and the job
/// scheduler of the same channel.
///
/// Delivery discipline differs by backend: [`crate::LoopbackBackend`]
/// invokes the receive callback synchronously inside `write`, while
/// socket backends deliver from a dedicated receive thread.
pub trait Backend: Send + Sync {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Cheap environment check run once before any channel exists.
    ///
    /// Distinguishes `Permission` from `NoDevice` without needing elevated
    /// privileges to merely fail.
    fn probe(&self) -> Result<()>;

    /// Bind to the named link, applying `config`.
    fn open(&self, name: &str, config: &ChannelConfig) -> Result<Handle>;

    /// Install (or clear with `None`) the frame-arrival callback.
    fn set_callback(&self, handle: Handle, on_rx: Option<RxCallback>) -> Result<()>;

    /// Transmit with a bounded wait.
    fn write(&self, handle: Handle, frame: &Frame, timeout: Timeout) -> Result<()>;

    /// Synchronous poll path, independent of the callback path.
    fn read(&self, handle: Handle, timeout: Timeout) -> Result<Frame>;

    fn status(&self, handle: Handle) -> Result<BusState>;

    /// Bus-off recovery. Backends that cannot recover from user space
    /// return [`crate::CanError::Unsupported`] rather than succeeding.
    fn recover(&self, handle: Handle) -> Result<()>;

    /// Stop and join the receive path, then release the link.
    ///
    /// After this returns the callback is never invoked again. Closing an
    /// unknown or already-closed handle is a no-op.
    fn close(&self, handle: Handle);
}
