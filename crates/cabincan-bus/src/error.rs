//! Channel and registry verbs report the transport taxonomy unchanged so a
//! caller sees one set of error kinds from every layer.

pub use cabincan_transport::{CanError, ErrorKind, Result};
