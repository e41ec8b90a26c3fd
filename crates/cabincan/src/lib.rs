//! CAN transport core for in-vehicle comfort ECUs.
//!
//! cabincan moves classic CAN frames between application code and a bus
//! backend: filtered callback subscriptions, periodic transmit jobs with an
//! optional per-send hook, and bus status and recovery.
//!
//! # Crate Structure
//!
//! - [`frame`]: frame and acceptance-filter values, SocketCAN wire codec
//! - [`transport`]: the `Backend` trait with loopback and SocketCAN backends
//! - [`bus`]: channels and the name-keyed registry
//!
//! ```no_run
//! use cabincan::{BackendKind, ChannelConfig, Filter, Frame, Registry, Timeout};
//!
//! let registry = Registry::new();
//! registry.init(BackendKind::SocketCan)?;
//! registry.open("can0", &ChannelConfig::with_bitrate(500_000))?;
//! registry.subscribe("can0", Some(Filter::exact(0x3E8)), |frame: &Frame| {
//!     println!("{frame}");
//! })?;
//! registry.send("can0", &Frame::new(0x123, &[0xDE, 0xAD])?, Timeout::NonBlocking)?;
//! # Ok::<(), cabincan::CanError>(())
//! ```

/// Re-export frame types.
pub mod frame {
    pub use cabincan_frame::*;
}

/// Re-export transport backends.
pub mod transport {
    pub use cabincan_transport::*;
}

/// Re-export channel and registry types.
pub mod bus {
    pub use cabincan_bus::*;
}

pub use cabincan_bus::{
    Backend, BackendKind, BusState, CanError, Channel, ChannelConfig, ErrorKind, Filter, Frame,
    FrameFlags, JobId, Mode, Registry, RegistryConfig, Result, SchedulerConfig, SubscriptionId,
    Timeout,
};
