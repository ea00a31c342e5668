use thiserror::Error;

/// Errors raised by the wire layer. Every variant is fatal to the session
/// whose stream produced it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {got} bytes exceeds the {max}-byte packet limit")]
    FrameTooLarge { got: usize, max: usize },

    #[error("varint continued past {max} bytes", max = crate::VarInt::MAX_LEN)]
    VarIntTooLong,

    #[error("packet body ended before the field did")]
    UnexpectedEnd,

    #[error("negative length prefix {0}")]
    NegativeLength(i32),

    #[error("string of {got} bytes exceeds the {max}-character cap")]
    StringTooLong { got: usize, max: usize },

    #[error("string is not utf-8: {0}")]
    BadUtf8(#[from] std::str::Utf8Error),

    #[error("bool byte must be 0 or 1, got {0}")]
    BadBool(u8),

    #[error("malformed uuid string: {0}")]
    BadUuid(#[from] uuid::Error),

    #[error("discriminant {value} is not defined for {what}")]
    BadDiscriminant { what: &'static str, value: i32 },

    #[error("zlib inflate failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("zlib deflate failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("frame declared {declared} uncompressed bytes but inflated to {got}")]
    DecompressedSizeMismatch { declared: usize, got: usize },

    #[error("compressed frame of {got} bytes is not over the {threshold}-byte threshold")]
    UnderThreshold { got: usize, threshold: i32 },

    #[error("{name} does not exist in protocol revision {revision}")]
    MissingPacket {
        name: &'static str,
        revision: &'static str,
    },
}
