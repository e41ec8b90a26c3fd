use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::frame::{Frame, FrameFlags, EFF_MASK, MAX_DLC, SFF_MASK};

/// Size of the Linux `struct can_frame`.
pub const WIRE_SIZE: usize = 16;

const CAN_EFF_FLAG: u32 = 0x8000_0000;
const CAN_RTR_FLAG: u32 = 0x4000_0000;
const CAN_ERR_FLAG: u32 = 0x2000_0000;

/// Encode a frame into the SocketCAN wire layout.
///
/// Wire format (host byte order for `can_id`):
/// ```text
/// ┌──────────────────┬─────┬──────────────┬───────────────┐
/// │ can_id (4B)      │ DLC │ pad/res (3B) │ data (8B)     │
/// │ id | EFF|RTR|ERR │ 0-8 │ zero         │ zero past DLC │
/// └──────────────────┴─────┴──────────────┴───────────────┘
/// ```
///
/// The id is masked to its 11/29-bit space and the length is clamped to 8.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    let mut can_id = if frame.is_extended() {
        (frame.id & EFF_MASK) | CAN_EFF_FLAG
    } else {
        frame.id & SFF_MASK
    };
    if frame.is_remote() {
        can_id |= CAN_RTR_FLAG;
    }
    if frame.is_error() {
        can_id |= CAN_ERR_FLAG;
    }

    let dlc = frame.dlc();
    dst.reserve(WIRE_SIZE);
    dst.put_u32_ne(can_id);
    dst.put_u8(dlc);
    dst.put_bytes(0, 3);
    dst.put_slice(&frame.data[..dlc as usize]);
    dst.put_bytes(0, (MAX_DLC - dlc) as usize);
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` if fewer than [`WIRE_SIZE`] bytes are buffered. On
/// success the frame bytes are consumed.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    if src.len() < WIRE_SIZE {
        return Ok(None);
    }

    let can_id = src.get_u32_ne();
    let dlc = src.get_u8().min(MAX_DLC);
    src.advance(3);

    let mut data = [0u8; 8];
    src.copy_to_slice(&mut data);
    data[dlc as usize..].fill(0);

    let mut flags = FrameFlags::NONE;
    let id = if can_id & CAN_EFF_FLAG != 0 {
        flags.insert(FrameFlags::EXTENDED_ID);
        can_id & EFF_MASK
    } else {
        can_id & SFF_MASK
    };
    if can_id & CAN_RTR_FLAG != 0 {
        flags.insert(FrameFlags::REMOTE_REQUEST);
    }
    if can_id & CAN_ERR_FLAG != 0 {
        flags.insert(FrameFlags::ERROR);
    }

    Ok(Some(Frame {
        id,
        len: dlc,
        data,
        flags,
    }))
}

/// Encode into a fixed-size buffer for a single `write(2)`.
pub fn to_wire(frame: &Frame) -> [u8; WIRE_SIZE] {
    let mut buf = BytesMut::with_capacity(WIRE_SIZE);
    encode_frame(frame, &mut buf);
    let mut out = [0u8; WIRE_SIZE];
    out.copy_from_slice(&buf);
    out
}

/// Decode a buffer filled by a single `read(2)`.
pub fn from_wire(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < WIRE_SIZE {
        return Err(FrameError::Truncated { len: bytes.len() });
    }
    let mut buf = BytesMut::from(&bytes[..WIRE_SIZE]);
    decode_frame(&mut buf)?.ok_or(FrameError::Truncated { len: bytes.len() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_standard_frame_layout() {
        let frame = Frame::new(0x123, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let wire = to_wire(&frame);

        assert_eq!(u32::from_ne_bytes(wire[0..4].try_into().unwrap()), 0x123);
        assert_eq!(wire[4], 4);
        assert_eq!(&wire[5..8], &[0, 0, 0]);
        assert_eq!(&wire[8..12], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&wire[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn encode_sets_flag_bits() {
        let mut frame = Frame::new_remote(0x1ABC_DEF0, 2, true).unwrap();
        frame.flags.insert(FrameFlags::ERROR);
        let wire = to_wire(&frame);
        let can_id = u32::from_ne_bytes(wire[0..4].try_into().unwrap());

        assert_eq!(can_id & EFF_MASK, 0x1ABC_DEF0);
        assert_ne!(can_id & CAN_EFF_FLAG, 0);
        assert_ne!(can_id & CAN_RTR_FLAG, 0);
        assert_ne!(can_id & CAN_ERR_FLAG, 0);
    }

    #[test]
    fn encode_zeroes_stale_bytes_past_len() {
        let mut frame = Frame::new(0x10, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        frame.len = 2;
        let wire = to_wire(&frame);
        assert_eq!(&wire[8..16], &[1, 2, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn encode_clamps_len_to_eight() {
        let mut frame = Frame::new(0x10, &[9; 8]).unwrap();
        frame.len = 15;
        let wire = to_wire(&frame);
        assert_eq!(wire[4], 8);
    }

    #[test]
    fn decode_ignores_bytes_past_dlc() {
        let mut wire = [0u8; WIRE_SIZE];
        wire[0..4].copy_from_slice(&0x7FFu32.to_ne_bytes());
        wire[4] = 3;
        wire[8..16].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let frame = from_wire(&wire).unwrap();
        assert_eq!(frame.id, 0x7FF);
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.data, [1, 2, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn decode_extended_id_strips_flags() {
        let mut wire = [0u8; WIRE_SIZE];
        let raw = 0x18DA_F110 | CAN_EFF_FLAG;
        wire[0..4].copy_from_slice(&raw.to_ne_bytes());

        let frame = from_wire(&wire).unwrap();
        assert_eq!(frame.id, 0x18DA_F110);
        assert!(frame.is_extended());
        assert!(!frame.is_remote());
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut buf = BytesMut::from(&[0u8; 10][..]);
        assert!(decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn decode_consumes_back_to_back_frames() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::new(0x1, &[0xAA]).unwrap(), &mut buf);
        encode_frame(&Frame::new(0x2, &[0xBB, 0xCC]).unwrap(), &mut buf);

        let first = decode_frame(&mut buf).unwrap().unwrap();
        let second = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!((first.id, first.payload()), (0x1, &[0xAA][..]));
        assert_eq!((second.id, second.payload()), (0x2, &[0xBB, 0xCC][..]));
        assert!(buf.is_empty());
    }

    #[test]
    fn from_wire_rejects_short_buffer() {
        assert_eq!(
            from_wire(&[0u8; 8]),
            Err(FrameError::Truncated { len: 8 })
        );
    }
}
