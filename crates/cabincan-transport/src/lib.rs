//! Hardware-agnostic CAN transport backends.
//!
//! Every execution environment implements the [`Backend`] capability trait
//! once:
//! - [`LoopbackBackend`]: in-memory, synchronous delivery, for tests
//! - `SocketCanBackend`: Linux raw `AF_CAN` sockets (Linux only)
//!
//! Backends deliver every inbound frame, unfiltered, to the single receive
//! callback installed per handle. Filtering happens one layer up.

pub mod config;
pub mod error;
pub mod loopback;
pub mod traits;
pub mod worker;

#[cfg(target_os = "linux")]
pub mod linkctl;
#[cfg(target_os = "linux")]
pub mod socketcan;

pub use config::{BackendKind, ChannelConfig, Mode};
pub use error::{CanError, ErrorKind, Result};
pub use loopback::LoopbackBackend;
pub use traits::{Backend, BusState, Handle, RxCallback, Timeout};
pub use worker::{CancelToken, WorkerGuard};

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanBackend;

/// Construct the backend for `kind`.
///
/// Fails with [`CanError::NoDevice`] when the kind is not available on this
/// platform.
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::Loopback => Ok(Box::new(LoopbackBackend::new())),
        #[cfg(target_os = "linux")]
        BackendKind::SocketCan => Ok(Box::new(SocketCanBackend::new())),
        #[cfg(not(target_os = "linux"))]
        BackendKind::SocketCan => Err(CanError::NoDevice(
            "SocketCAN is only available on Linux".to_string(),
        )),
    }
}
