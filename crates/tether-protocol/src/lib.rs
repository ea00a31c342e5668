//! Wire layer for the proxy: framing, primitives, ciphers, and the
//! per-revision packet-type registry.
//!
//! Everything here is pure protocol plumbing. Sockets, sessions, and the
//! event pipeline live in `tether-proxy`.

pub use codec::{Frame, FrameDecoder, FrameEncoder};
pub use error::ProtocolError;
pub use position::BlockPos;
pub use registry::{Clientbound, ProtocolVersion, Revision, Serverbound, epoch};
pub use slot::SlotData;
pub use var_int::VarInt;
pub use wire::{BodyReader, PacketBuf};

pub mod codec;
pub mod crypt;
mod error;
pub mod packets;
mod position;
pub mod registry;
mod slot;
pub mod var_int;
pub mod wire;

/// The maximum number of bytes in a single packet, compressed or not.
pub const MAX_PACKET_SIZE: usize = 0x001F_FFFF;
