use crate::{
    error::ProtocolError,
    wire::{BodyReader, PacketBuf},
};

/// Client-bound status ids.
pub mod cb {
    pub const RESPONSE: i32 = 0x00;
    pub const PONG: i32 = 0x01;
}

/// Server-bound status ids.
pub mod sb {
    pub const REQUEST: i32 = 0x00;
    pub const PING: i32 = 0x01;
}

/// Status response body: one JSON document describing the server list
/// entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusResponse {
    pub json: String,
}

impl StatusResponse {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            json: r.read_string()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_string(&self.json)
    }
}

/// Ping and pong share one echoed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ping {
    pub payload: i64,
}

impl Ping {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: r.read_i64()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) {
        buf.write_i64(self.payload);
    }
}
