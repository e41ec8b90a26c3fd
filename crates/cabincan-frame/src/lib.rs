//! CAN frame and acceptance-filter model.
//!
//! This is the leaf layer of cabincan. Everything above it moves frames by
//! value:
//! - [`Frame`]: identifier, up to 8 payload bytes, EXT/RTR/ERR flag bits
//! - [`Filter`]: range, bitmask, or explicit id list with a pure match predicate
//! - [`codec`]: conversion to and from the 16-byte Linux `struct can_frame`
//!
//! No I/O happens here.

pub mod codec;
pub mod error;
pub mod filter;
pub mod frame;

pub use codec::{decode_frame, encode_frame, from_wire, to_wire, WIRE_SIZE};
pub use error::{FrameError, Result};
pub use filter::{filter_match, Filter};
pub use frame::{parse_hex_payload, Frame, FrameFlags, EFF_MASK, MAX_DLC, SFF_MASK};
