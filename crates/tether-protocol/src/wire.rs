//! Primitive field readers and writers.
//!
//! [`BodyReader`] walks one decoded packet body; [`PacketBuf`] builds one
//! outbound `{id, body}` payload for a [`crate::FrameEncoder`] to frame.

use bytes::{Buf, BufMut, Bytes};
use uuid::Uuid;

use crate::{
    error::ProtocolError,
    position::BlockPos,
    registry::ProtocolVersion,
    slot::SlotData,
    var_int::VarInt,
};

/// Longest string the protocol allows, in characters.
pub const MAX_STRING_LEN: usize = 32767;

/// Cursor over one packet body. Reads consume from the front; whatever a
/// parser leaves behind can be taken wholesale with [`Self::read_rest`] for
/// faithful re-emission.
pub struct BodyReader {
    buf: Bytes,
    version: ProtocolVersion,
}

impl BodyReader {
    #[must_use]
    pub const fn new(body: Bytes, version: ProtocolVersion) -> Self {
        Self { buf: body, version }
    }

    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, bytes: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < bytes {
            return Err(ProtocolError::UnexpectedEnd);
        }
        Ok(())
    }

    pub fn read_varint(&mut self) -> Result<i32, ProtocolError> {
        VarInt::decode(&mut self.buf).map(|v| v.0)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::BadBool(other)),
        }
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(ProtocolError::NegativeLength(len));
        }
        let len = len as usize;
        if len > MAX_STRING_LEN * 4 {
            return Err(ProtocolError::StringTooLong {
                got: len,
                max: MAX_STRING_LEN,
            });
        }
        self.need(len)?;
        let raw = self.buf.split_to(len);
        let text = std::str::from_utf8(&raw)?;
        if text.chars().count() > MAX_STRING_LEN {
            return Err(ProtocolError::StringTooLong {
                got: len,
                max: MAX_STRING_LEN,
            });
        }
        Ok(text.to_owned())
    }

    /// Two big-endian longs, i.e. 16 raw bytes.
    pub fn read_uuid(&mut self) -> Result<Uuid, ProtocolError> {
        self.need(16)?;
        let mut raw = [0u8; 16];
        self.buf.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes(raw))
    }

    pub fn read_position(&mut self) -> Result<BlockPos, ProtocolError> {
        Ok(BlockPos::from_packed(self.read_i64()?, self.version))
    }

    pub fn read_slot(&mut self) -> Result<SlotData, ProtocolError> {
        SlotData::read(self)
    }

    pub fn read_bytes_varint(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(ProtocolError::NegativeLength(len));
        }
        self.need(len as usize)?;
        Ok(self.buf.split_to(len as usize))
    }

    pub fn read_bytes_short(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.read_i16()?;
        if len < 0 {
            return Err(ProtocolError::NegativeLength(i32::from(len)));
        }
        self.need(len as usize)?;
        Ok(self.buf.split_to(len as usize))
    }

    /// Everything left in the body, raw. Also how entity metadata is
    /// carried past the proxy: the sentinel-terminated stream is never
    /// decoded here, only preserved.
    pub fn read_rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len())
    }
}

/// Builder for one outbound packet payload: the id varint followed by the
/// body fields.
pub struct PacketBuf {
    buf: Vec<u8>,
    version: ProtocolVersion,
}

impl PacketBuf {
    #[must_use]
    pub fn new(id: i32, version: ProtocolVersion) -> Self {
        let mut buf = Vec::with_capacity(64);
        VarInt(id).encode(&mut buf);
        Self { buf, version }
    }

    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn write_varint(&mut self, value: i32) {
        VarInt(value).encode(&mut self.buf);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), ProtocolError> {
        let chars = value.chars().count();
        if chars > MAX_STRING_LEN {
            return Err(ProtocolError::StringTooLong {
                got: chars,
                max: MAX_STRING_LEN,
            });
        }
        self.write_varint(value.len() as i32);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_uuid(&mut self, value: Uuid) {
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_position(&mut self, value: BlockPos) {
        self.buf.put_i64(value.to_packed(self.version));
    }

    pub fn write_slot(&mut self, value: &SlotData) {
        value.write(self);
    }

    pub fn write_bytes_varint(&mut self, value: &[u8]) {
        self.write_varint(value.len() as i32);
        self.buf.extend_from_slice(value);
    }

    pub fn write_bytes_short(&mut self, value: &[u8]) {
        self.buf.put_i16(value.len() as i16);
        self.buf.extend_from_slice(value);
    }

    pub fn write_raw(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    #[must_use]
    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V: ProtocolVersion = ProtocolVersion(47);

    fn reader_over(buf: PacketBuf) -> (i32, BodyReader) {
        let payload = buf.finish();
        let mut slice = &payload[..];
        let id = VarInt::decode(&mut slice).unwrap().0;
        let body = payload.slice(payload.len() - slice.len()..);
        (id, BodyReader::new(body, V))
    }

    #[test]
    fn primitives_round_trip() {
        fastrand::seed(7);

        for _ in 0..500 {
            let short = fastrand::i16(..);
            let ushort = fastrand::u16(..);
            let int = fastrand::i32(..);
            let long = fastrand::i64(..);
            let float = f32::from_bits(fastrand::u32(..));
            let double = f64::from_bits(fastrand::u64(..));
            let flag = fastrand::bool();
            let id = Uuid::from_u64_pair(fastrand::u64(..), fastrand::u64(..));

            let mut buf = PacketBuf::new(0x2A, V);
            buf.write_i16(short);
            buf.write_u16(ushort);
            buf.write_i32(int);
            buf.write_i64(long);
            buf.write_f32(float);
            buf.write_f64(double);
            buf.write_bool(flag);
            buf.write_uuid(id);

            let (packet_id, mut r) = reader_over(buf);
            assert_eq!(packet_id, 0x2A);
            assert_eq!(r.read_i16().unwrap(), short);
            assert_eq!(r.read_u16().unwrap(), ushort);
            assert_eq!(r.read_i32().unwrap(), int);
            assert_eq!(r.read_i64().unwrap(), long);
            assert_eq!(r.read_f32().unwrap().to_bits(), float.to_bits());
            assert_eq!(r.read_f64().unwrap().to_bits(), double.to_bits());
            assert_eq!(r.read_bool().unwrap(), flag);
            assert_eq!(r.read_uuid().unwrap(), id);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn strings_round_trip() {
        let mut buf = PacketBuf::new(0, V);
        buf.write_string("käse ütf-8 ✔").unwrap();
        let (_, mut r) = reader_over(buf);
        assert_eq!(r.read_string().unwrap(), "käse ütf-8 ✔");
    }

    #[test]
    fn overlong_string_rejected() {
        let mut buf = PacketBuf::new(0, V);
        let big = "x".repeat(MAX_STRING_LEN + 1);
        assert!(matches!(
            buf.write_string(&big),
            Err(ProtocolError::StringTooLong { .. })
        ));
    }

    #[test]
    fn byte_arrays_round_trip() {
        let mut buf = PacketBuf::new(0, V);
        buf.write_bytes_varint(b"varint-length");
        buf.write_bytes_short(b"short-length");
        buf.write_raw(b"tail");

        let (_, mut r) = reader_over(buf);
        assert_eq!(&r.read_bytes_varint().unwrap()[..], b"varint-length");
        assert_eq!(&r.read_bytes_short().unwrap()[..], b"short-length");
        assert_eq!(&r.read_rest()[..], b"tail");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_read_errors() {
        let mut r = BodyReader::new(Bytes::from_static(&[0, 1, 2]), V);
        assert!(matches!(r.read_i64(), Err(ProtocolError::UnexpectedEnd)));
    }
}
