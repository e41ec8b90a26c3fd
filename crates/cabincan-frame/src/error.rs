/// Errors raised while building or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The identifier does not fit the 11-bit or 29-bit id space.
    #[error("id 0x{id:X} out of range for {} frame", if *extended { "extended" } else { "standard" })]
    IdOutOfRange { id: u32, extended: bool },

    /// More than 8 payload bytes were supplied.
    #[error("payload too long ({len} bytes, max 8)")]
    PayloadTooLong { len: usize },

    /// The wire buffer holds less than one complete frame.
    #[error("truncated wire frame ({len} bytes, need 16)")]
    Truncated { len: usize },

    /// A payload string could not be parsed as hex bytes.
    #[error("invalid hex payload: {0}")]
    InvalidHex(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
