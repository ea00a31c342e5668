use bytes::Bytes;

use crate::{
    error::ProtocolError,
    wire::{BodyReader, PacketBuf},
};

/// One inventory slot as carried by SET_SLOT and the window packets.
///
/// The proxy understands the stable prefix (item id, count, damage) and
/// keeps the item NBT, plus anything a later protocol appends after it,
/// as raw bytes so re-emission is byte-faithful. An item id of -1 encodes
/// the empty slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotData {
    pub item: Option<SlotItem>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotItem {
    pub item_id: i16,
    pub count: u8,
    pub damage: i16,
    /// Opaque NBT tail, `0x00` when the item carries none.
    pub nbt: Bytes,
}

impl SlotData {
    #[must_use]
    pub const fn empty() -> Self {
        Self { item: None }
    }

    /// Reads a slot sitting at the end of a packet body; the NBT tail is
    /// whatever remains.
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let item_id = r.read_i16()?;
        if item_id == -1 {
            return Ok(Self::empty());
        }
        let count = r.read_u8()?;
        let damage = r.read_i16()?;
        let nbt = r.read_rest();
        Ok(Self {
            item: Some(SlotItem {
                item_id,
                count,
                damage,
                nbt,
            }),
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) {
        match &self.item {
            None => buf.write_i16(-1),
            Some(item) => {
                buf.write_i16(item.item_id);
                buf.write_u8(item.count);
                buf.write_i16(item.damage);
                buf.write_raw(&item.nbt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProtocolVersion;

    const V: ProtocolVersion = ProtocolVersion(47);

    fn round_trip(slot: &SlotData) -> SlotData {
        let mut buf = PacketBuf::new(0, V);
        slot.write(&mut buf);
        let payload = buf.finish();
        let mut r = BodyReader::new(payload.slice(1..), V);
        SlotData::read(&mut r).unwrap()
    }

    #[test]
    fn empty_slot_round_trips() {
        assert_eq!(round_trip(&SlotData::empty()), SlotData::empty());
    }

    #[test]
    fn nbt_tail_is_preserved_verbatim() {
        let slot = SlotData {
            item: Some(SlotItem {
                item_id: 276,
                count: 1,
                damage: 12,
                nbt: Bytes::from_static(&[0x0A, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF, 0x00]),
            }),
        };
        assert_eq!(round_trip(&slot), slot);
    }
}
