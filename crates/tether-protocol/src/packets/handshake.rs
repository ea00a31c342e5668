use crate::{
    error::ProtocolError,
    wire::{BodyReader, PacketBuf},
};

pub const HANDSHAKE: i32 = 0x00;

pub const NEXT_STATE_STATUS: i32 = 1;
pub const NEXT_STATE_LOGIN: i32 = 2;

/// The first packet of every connection; the only packet valid in the
/// Handshake state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

impl Handshake {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            protocol_version: r.read_varint()?,
            server_address: r.read_string()?,
            server_port: r.read_u16()?,
            next_state: r.read_varint()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_varint(self.protocol_version);
        buf.write_string(&self.server_address)?;
        buf.write_u16(self.server_port);
        buf.write_varint(self.next_state);
        Ok(())
    }
}
