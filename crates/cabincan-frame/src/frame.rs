use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Maximum classic CAN payload length.
pub const MAX_DLC: u8 = 8;

/// Valid bits of a standard (11-bit) identifier.
pub const SFF_MASK: u32 = 0x0000_07FF;

/// Valid bits of an extended (29-bit) identifier.
pub const EFF_MASK: u32 = 0x1FFF_FFFF;

bitflags! {
    /// Control flag bits carried alongside a frame.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FrameFlags: u8 {
        /// 29-bit identifier.
        const EXTENDED_ID = 1 << 0;
        /// Remote transmission request.
        const REMOTE_REQUEST = 1 << 1;
        /// Controller error frame.
        const ERROR = 1 << 2;
    }
}

impl FrameFlags {
    pub const NONE: FrameFlags = FrameFlags::empty();
}

/// A classic CAN frame.
///
/// Copied by value across every API boundary. Bytes past `len` are kept
/// zeroed by the constructors and ignored by [`Frame::payload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    /// 11-bit or 29-bit identifier, depending on [`FrameFlags::EXTENDED_ID`].
    pub id: u32,
    /// Payload length, `0..=8`.
    pub len: u8,
    /// Payload storage.
    pub data: [u8; 8],
    pub flags: FrameFlags,
}

impl Frame {
    /// Build a standard-id data frame.
    pub fn new(id: u32, payload: &[u8]) -> Result<Self> {
        Self::with_flags(id, payload, FrameFlags::NONE)
    }

    /// Build an extended-id data frame.
    pub fn new_extended(id: u32, payload: &[u8]) -> Result<Self> {
        Self::with_flags(id, payload, FrameFlags::EXTENDED_ID)
    }

    /// Build a remote-request frame asking for `len` bytes.
    pub fn new_remote(id: u32, len: u8, extended: bool) -> Result<Self> {
        let mut flags = FrameFlags::REMOTE_REQUEST;
        if extended {
            flags.insert(FrameFlags::EXTENDED_ID);
        }
        let mut frame = Self::with_flags(id, &[], flags)?;
        frame.len = len.min(MAX_DLC);
        Ok(frame)
    }

    /// Build a frame with explicit flags, validating id range and length.
    pub fn with_flags(id: u32, payload: &[u8], flags: FrameFlags) -> Result<Self> {
        let extended = flags.contains(FrameFlags::EXTENDED_ID);
        let limit = if extended { EFF_MASK } else { SFF_MASK };
        if id > limit {
            return Err(FrameError::IdOutOfRange { id, extended });
        }
        if payload.len() > MAX_DLC as usize {
            return Err(FrameError::PayloadTooLong { len: payload.len() });
        }

        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            len: payload.len() as u8,
            data,
            flags,
        })
    }

    /// Re-check id range and length of a frame assembled field by field.
    pub fn validate(&self) -> Result<()> {
        let extended = self.is_extended();
        let limit = if extended { EFF_MASK } else { SFF_MASK };
        if self.id > limit {
            return Err(FrameError::IdOutOfRange {
                id: self.id,
                extended,
            });
        }
        if self.len > MAX_DLC {
            return Err(FrameError::PayloadTooLong {
                len: self.len as usize,
            });
        }
        Ok(())
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.dlc() as usize]
    }

    /// Payload length clamped to 8.
    pub fn dlc(&self) -> u8 {
        self.len.min(MAX_DLC)
    }

    pub fn is_extended(&self) -> bool {
        self.flags.contains(FrameFlags::EXTENDED_ID)
    }

    pub fn is_remote(&self) -> bool {
        self.flags.contains(FrameFlags::REMOTE_REQUEST)
    }

    pub fn is_error(&self) -> bool {
        self.flags.contains(FrameFlags::ERROR)
    }
}

/// candump-style rendering: `123#DEADBEEF`, `1234ABCD#01`, `123#R`.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended() {
            write!(f, "{:08X}#", self.id)?;
        } else {
            write!(f, "{:03X}#", self.id)?;
        }
        if self.is_remote() {
            return write!(f, "R{}", self.dlc());
        }
        for byte in self.payload() {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Parse payload tokens such as `["de", "ad"]`, `["DEADBEEF"]` or
/// `["0x01", "2"]` into at most 8 bytes.
///
/// Multi-character tokens without a `0x` prefix are read as packed hex and
/// must have an even length.
pub fn parse_hex_payload<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(8);
    for token in tokens {
        let token = token.as_ref().trim();
        if token.is_empty() {
            continue;
        }
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"));

        match digits {
            Some(hex) => out.push(parse_byte(hex, token)?),
            None if token.len() <= 2 => out.push(parse_byte(token, token)?),
            None => {
                if token.len() % 2 != 0 {
                    return Err(FrameError::InvalidHex(format!(
                        "{token}: packed hex must have an even length"
                    )));
                }
                for chunk in token.as_bytes().chunks(2) {
                    let pair = std::str::from_utf8(chunk)
                        .map_err(|_| FrameError::InvalidHex(token.to_string()))?;
                    out.push(parse_byte(pair, token)?);
                }
            }
        }

        if out.len() > MAX_DLC as usize {
            return Err(FrameError::PayloadTooLong { len: out.len() });
        }
    }
    Ok(out)
}

fn parse_byte(hex: &str, token: &str) -> Result<u8> {
    u8::from_str_radix(hex, 16).map_err(|_| FrameError::InvalidHex(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_zero_fills_unused_bytes() {
        let frame = Frame::new(0x123, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(frame.len, 4);
        assert_eq!(frame.payload(), &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&frame.data[4..], &[0, 0, 0, 0]);
        assert!(!frame.is_extended());
    }

    #[test]
    fn standard_id_range_is_enforced() {
        assert!(Frame::new(0x7FF, &[]).is_ok());
        assert_eq!(
            Frame::new(0x800, &[]),
            Err(FrameError::IdOutOfRange {
                id: 0x800,
                extended: false
            })
        );
        assert!(Frame::new_extended(0x800, &[]).is_ok());
        assert!(Frame::new_extended(0x2000_0000, &[]).is_err());
    }

    #[test]
    fn validate_catches_hand_built_frames() {
        let mut frame = Frame::new(0x7FF, &[1]).unwrap();
        frame.validate().unwrap();
        frame.id = 0x800;
        assert!(frame.validate().is_err());
        frame.flags.insert(FrameFlags::EXTENDED_ID);
        frame.validate().unwrap();
        frame.len = 9;
        assert_eq!(frame.validate(), Err(FrameError::PayloadTooLong { len: 9 }));
    }

    #[test]
    fn payload_longer_than_eight_is_rejected() {
        let err = Frame::new(0x1, &[0u8; 9]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLong { len: 9 });
    }

    #[test]
    fn payload_clamps_oversized_len_field() {
        let mut frame = Frame::new(0x10, &[1, 2]).unwrap();
        frame.len = 12;
        assert_eq!(frame.dlc(), 8);
        assert_eq!(frame.payload().len(), 8);
    }

    #[test]
    fn remote_frame_keeps_requested_length() {
        let frame = Frame::new_remote(0x321, 3, false).unwrap();
        assert!(frame.is_remote());
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.to_string(), "321#R3");
    }

    #[test]
    fn display_is_candump_style() {
        let std = Frame::new(0x12, &[0x01, 0xAB]).unwrap();
        assert_eq!(std.to_string(), "012#01AB");

        let ext = Frame::new_extended(0x18DA_F110, &[0xFF]).unwrap();
        assert_eq!(ext.to_string(), "18DAF110#FF");
    }

    #[test]
    fn flags_insert_and_remove() {
        let mut flags = FrameFlags::EXTENDED_ID | FrameFlags::ERROR;
        assert!(flags.contains(FrameFlags::ERROR));
        flags.remove(FrameFlags::ERROR);
        assert_eq!(flags, FrameFlags::EXTENDED_ID);
        assert_eq!(FrameFlags::from_bits_truncate(0xFF).bits(), 0b111);
    }

    #[test]
    fn frame_serializes_flag_names() {
        let frame = Frame::new_extended(0x18DA_F110, &[0x01]).unwrap();
        let json = serde_json::to_value(frame).unwrap();
        assert_eq!(json["flags"], "EXTENDED_ID");
        let back: Frame = serde_json::from_value(json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn parse_hex_payload_accepts_mixed_forms() {
        assert_eq!(
            parse_hex_payload(&["de", "ad", "0xBE", "EF"]).unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert_eq!(
            parse_hex_payload(&["AABBCC"]).unwrap(),
            vec![0xAA, 0xBB, 0xCC]
        );
        assert_eq!(parse_hex_payload::<&str>(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn parse_hex_payload_rejects_bad_input() {
        assert!(matches!(
            parse_hex_payload(&["ABC"]),
            Err(FrameError::InvalidHex(_))
        ));
        assert!(matches!(
            parse_hex_payload(&["zz"]),
            Err(FrameError::InvalidHex(_))
        ));
        assert!(matches!(
            parse_hex_payload(&["0102030405060708", "09"]),
            Err(FrameError::PayloadTooLong { len: 9 })
        ));
    }
}
