//! Frame codec: varint length prefix, optional zlib envelope, optional
//! AES/CFB8 stream encryption.
//!
//! Compression state is per-direction and may be toggled mid-session by
//! SET_COMPRESSION; the new setting applies from the next frame. Encryption
//! is applied at the stream boundary: inbound bytes are decrypted as they
//! are queued, outbound frames are encrypted as they are emitted.

use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::{Compression, read::ZlibDecoder, read::ZlibEncoder};

use crate::{
    MAX_PACKET_SIZE,
    crypt::{Decryptor, Encryptor},
    error::ProtocolError,
    var_int::VarInt,
};

/// One decoded frame. `raw` is the exact `{id, body}` byte run and is what
/// gets forwarded when a parser passes the packet through untouched; `body`
/// is the same run minus the id varint.
#[derive(Clone, Debug)]
pub struct Frame {
    pub id: i32,
    pub body: Bytes,
    pub raw: Bytes,
}

/// Decoder half of a codec. Owns the receive buffer for one socket
/// direction.
pub struct FrameDecoder {
    buf: BytesMut,
    threshold: i32,
    cipher: Option<Decryptor>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            threshold: -1,
            cipher: None,
        }
    }

    /// Append bytes received from the socket, decrypting in place when
    /// session encryption is active.
    pub fn queue_bytes(&mut self, data: &[u8]) {
        let start = self.buf.len();
        self.buf.extend_from_slice(data);
        if let Some(cipher) = &mut self.cipher {
            cipher.decrypt(&mut self.buf[start..]);
        }
    }

    /// Threshold ≥ 0 enables the compressed-frame envelope from the next
    /// frame on; −1 disables it.
    pub fn set_compression(&mut self, threshold: i32) {
        self.threshold = threshold;
    }

    pub fn enable_encryption(&mut self, secret: &[u8; 16]) {
        self.cipher = Some(Decryptor::new(secret));
    }

    /// Consumes one complete frame, or returns `None` when the buffer does
    /// not yet hold one (caller reads more and retries). A frame is
    /// complete iff exactly `length` bytes past the prefix are present.
    pub fn try_next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let mut peek = &self.buf[..];
        let length = match VarInt::decode(&mut peek) {
            Ok(v) => v.0,
            Err(ProtocolError::UnexpectedEnd) => return Ok(None),
            Err(e) => return Err(e),
        };

        if length < 0 {
            return Err(ProtocolError::NegativeLength(length));
        }
        let length = length as usize;
        if length > MAX_PACKET_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                got: length,
                max: MAX_PACKET_SIZE,
            });
        }
        if peek.len() < length {
            return Ok(None);
        }

        let prefix_len = self.buf.len() - peek.len();
        self.buf.advance(prefix_len);
        let frame = self.buf.split_to(length).freeze();

        let payload = if self.threshold >= 0 {
            self.unwrap_compressed(frame)?
        } else {
            frame
        };

        let mut id_view = &payload[..];
        let id = VarInt::decode(&mut id_view)?.0;
        let body = payload.slice(payload.len() - id_view.len()..);

        Ok(Some(Frame {
            id,
            body,
            raw: payload,
        }))
    }

    fn unwrap_compressed(&self, frame: Bytes) -> Result<Bytes, ProtocolError> {
        let mut view = &frame[..];
        let declared = VarInt::decode(&mut view)?.0;

        // 0 marks a frame that stayed under the threshold: raw payload next
        if declared == 0 {
            return Ok(frame.slice(frame.len() - view.len()..));
        }
        if declared < 0 {
            return Err(ProtocolError::NegativeLength(declared));
        }

        let declared = declared as usize;
        if declared > MAX_PACKET_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                got: declared,
                max: MAX_PACKET_SIZE,
            });
        }
        if declared as i64 <= i64::from(self.threshold) {
            return Err(ProtocolError::UnderThreshold {
                got: declared,
                threshold: self.threshold,
            });
        }

        let mut inflated = Vec::with_capacity(declared);
        ZlibDecoder::new(view)
            .take(declared as u64 + 1)
            .read_to_end(&mut inflated)
            .map_err(ProtocolError::Decompress)?;

        if inflated.len() != declared {
            return Err(ProtocolError::DecompressedSizeMismatch {
                declared,
                got: inflated.len(),
            });
        }

        Ok(Bytes::from(inflated))
    }
}

/// Encoder half of a codec. Frames `{id, body}` payloads for one socket
/// direction.
pub struct FrameEncoder {
    threshold: i32,
    cipher: Option<Encryptor>,
    level: Compression,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            threshold: -1,
            cipher: None,
            level: Compression::default(),
        }
    }

    pub fn set_compression(&mut self, threshold: i32) {
        self.threshold = threshold;
    }

    pub fn enable_encryption(&mut self, secret: &[u8; 16]) {
        self.cipher = Some(Encryptor::new(secret));
    }

    /// Appends one complete frame for `payload` (an `{id, body}` run) to
    /// `dst`, compressed and encrypted per the negotiated state.
    pub fn encode_frame(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if payload.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                got: payload.len(),
                max: MAX_PACKET_SIZE,
            });
        }

        let start = dst.len();

        if self.threshold >= 0 {
            if payload.len() >= self.threshold as usize {
                let mut deflated = Vec::with_capacity(payload.len() / 2 + 16);
                ZlibEncoder::new(payload, self.level)
                    .read_to_end(&mut deflated)
                    .map_err(ProtocolError::Compress)?;

                let data_len = VarInt(payload.len() as i32);
                VarInt((data_len.written_len() + deflated.len()) as i32).encode(dst);
                data_len.encode(dst);
                dst.extend_from_slice(&deflated);
            } else {
                VarInt(payload.len() as i32 + 1).encode(dst);
                dst.put_u8(0);
                dst.extend_from_slice(payload);
            }
        } else {
            VarInt(payload.len() as i32).encode(dst);
            dst.extend_from_slice(payload);
        }

        if let Some(cipher) = &mut self.cipher {
            cipher.encrypt(&mut dst[start..]);
        }

        Ok(())
    }

    /// Convenience wrapper returning the frame as its own buffer.
    pub fn encode_to_bytes(&mut self, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::with_capacity(payload.len() + VarInt::MAX_LEN);
        self.encode_frame(payload, &mut dst)?;
        Ok(dst.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(id: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![id];
        payload.extend_from_slice(body);
        payload
    }

    #[test]
    fn frames_round_trip_uncompressed() {
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();

        let payload = payload_of(0x02, b"hello frame");
        let wire = enc.encode_to_bytes(&payload).unwrap();
        dec.queue_bytes(&wire);

        let frame = dec.try_next_frame().unwrap().unwrap();
        assert_eq!(frame.id, 0x02);
        assert_eq!(&frame.body[..], b"hello frame");
        assert_eq!(&frame.raw[..], &payload[..]);
        assert!(dec.try_next_frame().unwrap().is_none());
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();

        let wire = enc.encode_to_bytes(&payload_of(0x01, &[9u8; 300])).unwrap();

        // drip-feed one byte at a time; only the final byte completes it
        for byte in &wire[..wire.len() - 1] {
            dec.queue_bytes(std::slice::from_ref(byte));
            assert!(dec.try_next_frame().unwrap().is_none());
        }
        dec.queue_bytes(&wire[wire.len() - 1..]);
        let frame = dec.try_next_frame().unwrap().unwrap();
        assert_eq!(frame.body.len(), 300);
    }

    #[test]
    fn small_frame_carries_uncompressed_marker() {
        let mut enc = FrameEncoder::new();
        enc.set_compression(64);

        let payload = payload_of(0x02, b"tiny chat");
        let wire = enc.encode_to_bytes(&payload).unwrap();

        // varint(total) || 0x00 || raw payload
        let mut view = &wire[..];
        let total = VarInt::decode(&mut view).unwrap().0 as usize;
        assert_eq!(total, view.len());
        assert_eq!(view[0], 0);
        assert_eq!(&view[1..], &payload[..]);
    }

    #[test]
    fn large_frame_is_zlib_wrapped() {
        let mut enc = FrameEncoder::new();
        enc.set_compression(64);

        let payload = payload_of(0x02, &[b'a'; 199]);
        let wire = enc.encode_to_bytes(&payload).unwrap();

        let mut view = &wire[..];
        let total = VarInt::decode(&mut view).unwrap().0 as usize;
        assert_eq!(total, view.len());
        let declared = VarInt::decode(&mut view).unwrap().0 as usize;
        assert_eq!(declared, payload.len());

        let mut inflated = Vec::new();
        ZlibDecoder::new(view).read_to_end(&mut inflated).unwrap();
        assert_eq!(inflated, payload);

        // and the decoder agrees
        let mut dec = FrameDecoder::new();
        dec.set_compression(64);
        dec.queue_bytes(&wire);
        let frame = dec.try_next_frame().unwrap().unwrap();
        assert_eq!(&frame.raw[..], &payload[..]);
    }

    #[test]
    fn encrypted_frames_round_trip() {
        let secret = *b"sixteen byte key";
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        enc.enable_encryption(&secret);
        dec.enable_encryption(&secret);

        for n in 0..20 {
            let body = vec![n as u8; 10 + n * 7];
            let payload = payload_of(0x10, &body);
            let wire = enc.encode_to_bytes(&payload).unwrap();
            dec.queue_bytes(&wire);
            let frame = dec.try_next_frame().unwrap().unwrap();
            assert_eq!(frame.id, 0x10);
            assert_eq!(&frame.body[..], &body[..]);
        }
    }

    #[test]
    fn compression_and_encryption_compose() {
        let secret = [7u8; 16];
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();
        enc.enable_encryption(&secret);
        dec.enable_encryption(&secret);
        enc.set_compression(32);
        dec.set_compression(32);

        let payload = payload_of(0x3F, &[b'z'; 512]);
        let wire = enc.encode_to_bytes(&payload).unwrap();
        dec.queue_bytes(&wire);
        let frame = dec.try_next_frame().unwrap().unwrap();
        assert_eq!(&frame.raw[..], &payload[..]);
    }

    #[test]
    fn oversized_length_prefix_is_fatal() {
        let mut dec = FrameDecoder::new();
        let mut wire = Vec::new();
        VarInt((MAX_PACKET_SIZE + 1) as i32).encode(&mut wire);
        dec.queue_bytes(&wire);
        assert!(matches!(
            dec.try_next_frame(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn lying_uncompressed_length_is_fatal() {
        let mut enc = FrameEncoder::new();
        enc.set_compression(16);
        let wire = enc.encode_to_bytes(&payload_of(0x01, &[5u8; 64])).unwrap();

        // corrupt the declared uncompressed length (second varint)
        let mut bad = wire.to_vec();
        let mut view = &bad[..];
        let _total = VarInt::decode(&mut view).unwrap();
        let idx = bad.len() - view.len();
        bad[idx] = 0x70; // plausible but wrong

        let mut dec = FrameDecoder::new();
        dec.set_compression(16);
        dec.queue_bytes(&bad);
        assert!(matches!(
            dec.try_next_frame(),
            Err(ProtocolError::DecompressedSizeMismatch { .. })
        ));
    }

    #[test]
    fn queued_frames_decode_in_order() {
        let mut enc = FrameEncoder::new();
        let mut dec = FrameDecoder::new();

        let mut wire = BytesMut::new();
        for id in 0..5u8 {
            enc.encode_frame(&payload_of(id, &[id; 3]), &mut wire).unwrap();
        }
        dec.queue_bytes(&wire);

        for id in 0..5 {
            let frame = dec.try_next_frame().unwrap().unwrap();
            assert_eq!(frame.id, i32::from(id));
        }
        assert!(dec.try_next_frame().unwrap().is_none());
    }
}
