use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Variable-length i32: 7-bit little-endian groups, high bit set on every
/// byte but the last, at most five bytes on the wire.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(pub i32);

impl VarInt {
    pub const MAX_LEN: usize = 5;

    /// Number of bytes this value occupies once encoded.
    #[must_use]
    pub const fn written_len(self) -> usize {
        let bits = 32 - (self.0 as u32 | 1).leading_zeros() as usize;
        bits.div_ceil(7)
    }

    pub fn encode(self, buf: &mut impl BufMut) {
        let mut value = self.0 as u32;
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                buf.put_u8(byte);
                return;
            }
            buf.put_u8(byte | 0x80);
        }
    }

    /// Decodes one varint from the front of `buf`. `UnexpectedEnd` means the
    /// buffer ran dry mid-value; callers that stream may retry with more
    /// bytes. `VarIntTooLong` is unrecoverable.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut value: u32 = 0;
        for shift in 0..Self::MAX_LEN {
            if !buf.has_remaining() {
                return Err(ProtocolError::UnexpectedEnd);
            }
            let byte = buf.get_u8();
            value |= u32::from(byte & 0x7F) << (shift * 7);
            if byte & 0x80 == 0 {
                return Ok(Self(value as i32));
            }
        }
        Err(ProtocolError::VarIntTooLong)
    }
}

impl From<i32> for VarInt {
    fn from(value: i32) -> Self {
        Self(value)
    }
}
