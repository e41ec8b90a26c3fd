//! Channel registry for the cabincan transport core.
//!
//! This is the layer applications talk to. A [`Registry`] owns one backend
//! and a set of named [`Channel`]s; each channel fans inbound frames out to
//! filtered subscriptions and drives its periodic jobs from a scheduler
//! thread.

pub mod channel;
pub mod config;
pub mod error;
pub mod jobs;
mod liveness;
pub mod registry;
pub mod scheduler;
pub mod subscription;

pub use channel::Channel;
pub use config::{RegistryConfig, SchedulerConfig};
pub use error::{CanError, ErrorKind, Result};
pub use jobs::{JobId, PrepareFn};
pub use registry::Registry;
pub use subscription::{FrameCallback, SubscriptionId};

pub use cabincan_frame::{Filter, Frame, FrameFlags};
pub use cabincan_transport::{Backend, BackendKind, BusState, ChannelConfig, Mode, Timeout};
