use bytes::Bytes;
use uuid::Uuid;

use crate::{
    error::ProtocolError,
    wire::{BodyReader, PacketBuf},
};

/// Client-bound login ids. Fixed across every supported revision.
pub mod cb {
    pub const DISCONNECT: i32 = 0x00;
    pub const ENCRYPTION_REQUEST: i32 = 0x01;
    pub const SUCCESS: i32 = 0x02;
    pub const SET_COMPRESSION: i32 = 0x03;
}

/// Server-bound login ids.
pub mod sb {
    pub const LOGIN_START: i32 = 0x00;
    pub const ENCRYPTION_RESPONSE: i32 = 0x01;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginStart {
    pub username: String,
}

impl LoginStart {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: r.read_string()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_string(&self.username)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub server_id: String,
    pub public_key: Bytes,
    pub verify_token: Bytes,
}

impl EncryptionRequest {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            server_id: r.read_string()?,
            public_key: r.read_bytes_varint()?,
            verify_token: r.read_bytes_varint()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_string(&self.server_id)?;
        buf.write_bytes_varint(&self.public_key);
        buf.write_bytes_varint(&self.verify_token);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionResponse {
    pub shared_secret: Bytes,
    pub verify_token: Bytes,
}

impl EncryptionResponse {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            shared_secret: r.read_bytes_varint()?,
            verify_token: r.read_bytes_varint()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_bytes_varint(&self.shared_secret);
        buf.write_bytes_varint(&self.verify_token);
        Ok(())
    }
}

/// Success carries the uuid as a hyphenated string on every revision the
/// proxy speaks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginSuccess {
    pub uuid: Uuid,
    pub username: String,
}

impl LoginSuccess {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let raw = r.read_string()?;
        let uuid = Uuid::parse_str(&raw)?;
        Ok(Self {
            uuid,
            username: r.read_string()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_string(&self.uuid.hyphenated().to_string())?;
        buf.write_string(&self.username)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetCompression {
    pub threshold: i32,
}

impl SetCompression {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            threshold: r.read_varint()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) {
        buf.write_varint(self.threshold);
    }
}

/// Login-state disconnect; the reason is a JSON chat document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginDisconnect {
    pub reason: String,
}

impl LoginDisconnect {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: r.read_string()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_string(&self.reason)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::registry::ProtocolVersion;

    const V: ProtocolVersion = ProtocolVersion(47);

    fn body_of(buf: PacketBuf) -> BodyReader {
        let payload = buf.finish();
        BodyReader::new(payload.slice(1..), V)
    }

    #[test]
    fn encryption_request_round_trips() {
        let pkt = EncryptionRequest {
            server_id: "6a0e3f".to_owned(),
            public_key: Bytes::from_static(&[1, 2, 3, 4]),
            verify_token: Bytes::from_static(&[9, 9, 9, 9]),
        };
        let mut buf = PacketBuf::new(cb::ENCRYPTION_REQUEST, V);
        pkt.write(&mut buf).unwrap();
        assert_eq!(EncryptionRequest::read(&mut body_of(buf)).unwrap(), pkt);
    }

    #[test]
    fn login_success_uuid_is_hyphenated() {
        let pkt = LoginSuccess {
            uuid: Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0),
            username: "alice".to_owned(),
        };
        let mut buf = PacketBuf::new(cb::SUCCESS, V);
        pkt.write(&mut buf).unwrap();

        let mut r = body_of(buf);
        let uuid_field = r.read_string().unwrap();
        assert_eq!(uuid_field, "12345678-9abc-def0-1234-56789abcdef0");
        assert_eq!(r.read_string().unwrap(), "alice");
    }
}
