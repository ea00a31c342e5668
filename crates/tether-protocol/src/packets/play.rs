//! Play-state layouts. Ids come from [`crate::registry::Revision`] tables;
//! several bodies change shape across the epochs in
//! [`crate::registry::epoch`].

use bytes::Bytes;
use uuid::Uuid;

use crate::{
    error::ProtocolError,
    position::BlockPos,
    registry::epoch,
    slot::SlotData,
    wire::{BodyReader, PacketBuf},
};

/// Keep-alive id, varint on the wire from [`epoch::VARINT_KEEP_ALIVE`] on
/// and a plain int before that. Same body in both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepAlive {
    pub id: i64,
}

impl KeepAlive {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let id = if r.version().at_least(epoch::VARINT_KEEP_ALIVE) {
            i64::from(r.read_varint()?)
        } else {
            i64::from(r.read_i32()?)
        };
        Ok(Self { id })
    }

    pub fn write(&self, buf: &mut PacketBuf) {
        if buf.version().at_least(epoch::VARINT_KEEP_ALIVE) {
            buf.write_varint(self.id as i32);
        } else {
            buf.write_i32(self.id as i32);
        }
    }
}

/// Client-bound chat: a JSON document plus a position byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessageCb {
    pub json: String,
    pub position: i8,
}

impl ChatMessageCb {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            json: r.read_string()?,
            position: r.read_i8()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_string(&self.json)?;
        buf.write_i8(self.position);
        Ok(())
    }
}

/// Server-bound chat: the raw message string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessageSb {
    pub message: String,
}

impl ChatMessageSb {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            message: r.read_string()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_string(&self.message)
    }
}

/// The prefix of JOIN_GAME the proxy records; the level-type tail rides
/// along raw when the packet is forwarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinGame {
    pub entity_id: i32,
    pub gamemode: u8,
    pub dimension: i32,
}

impl JoinGame {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let entity_id = r.read_i32()?;
        let gamemode = r.read_u8()?;
        let dimension = if r.version().at_least(epoch::DIMENSION_INT) {
            r.read_i32()?
        } else {
            i32::from(r.read_i8()?)
        };
        Ok(Self {
            entity_id,
            gamemode,
            dimension,
        })
    }
}

/// RESPAWN keeps the pre-1.9.1 int dimension on every revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Respawn {
    pub dimension: i32,
    pub difficulty: u8,
    pub gamemode: u8,
}

impl Respawn {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            dimension: r.read_i32()?,
            difficulty: r.read_u8()?,
            gamemode: r.read_u8()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpawnPosition {
    pub location: BlockPos,
}

impl SpawnPosition {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            location: r.read_position()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeUpdate {
    pub world_age: i64,
    pub time_of_day: i64,
}

impl TimeUpdate {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            world_age: r.read_i64()?,
            time_of_day: r.read_i64()?,
        })
    }
}

/// Client-bound position correction. Grows a teleport id at
/// [`epoch::TELEPORT_CONFIRM`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerPosLookCb {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub flags: i8,
    pub teleport_id: Option<i32>,
}

impl PlayerPosLookCb {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let x = r.read_f64()?;
        let y = r.read_f64()?;
        let z = r.read_f64()?;
        let yaw = r.read_f32()?;
        let pitch = r.read_f32()?;
        let flags = r.read_i8()?;
        let teleport_id = if r.version().at_least(epoch::TELEPORT_CONFIRM) {
            Some(r.read_varint()?)
        } else {
            None
        };
        Ok(Self {
            x,
            y,
            z,
            yaw,
            pitch,
            flags,
            teleport_id,
        })
    }
}

/// Server-bound movement bodies. POSITION and POSLOOK share the coordinate
/// prefix; LOOK carries only angles.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerPosLookSb {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

impl PlayerPosLookSb {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            x: r.read_f64()?,
            y: r.read_f64()?,
            z: r.read_f64()?,
            yaw: r.read_f32()?,
            pitch: r.read_f32()?,
            on_ground: r.read_bool()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) {
        buf.write_f64(self.x);
        buf.write_f64(self.y);
        buf.write_f64(self.z);
        buf.write_f32(self.yaw);
        buf.write_f32(self.pitch);
        buf.write_bool(self.on_ground);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerPositionSb {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub on_ground: bool,
}

impl PlayerPositionSb {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            x: r.read_f64()?,
            y: r.read_f64()?,
            z: r.read_f64()?,
            on_ground: r.read_bool()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TeleportConfirm {
    pub teleport_id: i32,
}

impl TeleportConfirm {
    pub fn write(&self, buf: &mut PacketBuf) {
        buf.write_varint(self.teleport_id);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UseBed {
    pub entity_id: i32,
    pub location: BlockPos,
}

impl UseBed {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            entity_id: r.read_varint()?,
            location: r.read_position()?,
        })
    }
}

/// SPAWN_PLAYER up to the uuid; the fixed-point/double coordinate tail and
/// metadata ride along raw so the uuid rewrite is byte-faithful.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnPlayer {
    pub entity_id: i32,
    pub uuid: Uuid,
    pub rest: Bytes,
}

impl SpawnPlayer {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            entity_id: r.read_varint()?,
            uuid: r.read_uuid()?,
            rest: r.read_rest(),
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) {
        buf.write_varint(self.entity_id);
        buf.write_uuid(self.uuid);
        buf.write_raw(&self.rest);
    }
}

/// The entity-table prefix of SPAWN_OBJECT. 1.9 added the object uuid and
/// widened coordinates to doubles.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnObject {
    pub entity_id: i32,
    pub uuid: Option<Uuid>,
    pub kind: i8,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pitch: i8,
    pub yaw: i8,
}

impl SpawnObject {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let entity_id = r.read_varint()?;
        let (uuid, kind, x, y, z) = if r.version().at_least(epoch::ENTITY_DOUBLES) {
            let uuid = r.read_uuid()?;
            let kind = r.read_i8()?;
            (
                Some(uuid),
                kind,
                r.read_f64()?,
                r.read_f64()?,
                r.read_f64()?,
            )
        } else {
            let kind = r.read_i8()?;
            // fixed-point 32nds of a block
            (
                None,
                kind,
                f64::from(r.read_i32()?) / 32.0,
                f64::from(r.read_i32()?) / 32.0,
                f64::from(r.read_i32()?) / 32.0,
            )
        };
        Ok(Self {
            entity_id,
            uuid,
            kind,
            x,
            y,
            z,
            pitch: r.read_i8()?,
            yaw: r.read_i8()?,
        })
    }
}

/// The entity-table prefix of SPAWN_MOB; same epoch split as
/// [`SpawnObject`] plus a head pitch.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnMob {
    pub entity_id: i32,
    pub uuid: Option<Uuid>,
    pub kind: u8,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: i8,
    pub pitch: i8,
    pub head_pitch: i8,
}

impl SpawnMob {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let entity_id = r.read_varint()?;
        let (uuid, kind, x, y, z) = if r.version().at_least(epoch::ENTITY_DOUBLES) {
            let uuid = r.read_uuid()?;
            let kind = r.read_u8()?;
            (
                Some(uuid),
                kind,
                r.read_f64()?,
                r.read_f64()?,
                r.read_f64()?,
            )
        } else {
            let kind = r.read_u8()?;
            (
                None,
                kind,
                f64::from(r.read_i32()?) / 32.0,
                f64::from(r.read_i32()?) / 32.0,
                f64::from(r.read_i32()?) / 32.0,
            )
        };
        Ok(Self {
            entity_id,
            uuid,
            kind,
            x,
            y,
            z,
            yaw: r.read_i8()?,
            pitch: r.read_i8()?,
            head_pitch: r.read_i8()?,
        })
    }
}

/// Relative move deltas: 8ths of a pixel (i8 32nds) before 1.9, 4096ths of
/// a block (i16) after.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityRelativeMove {
    pub entity_id: i32,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl EntityRelativeMove {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let entity_id = r.read_varint()?;
        let (dx, dy, dz) = if r.version().at_least(epoch::ENTITY_DOUBLES) {
            (
                f64::from(r.read_i16()?) / 4096.0,
                f64::from(r.read_i16()?) / 4096.0,
                f64::from(r.read_i16()?) / 4096.0,
            )
        } else {
            (
                f64::from(r.read_i8()?) / 32.0,
                f64::from(r.read_i8()?) / 32.0,
                f64::from(r.read_i8()?) / 32.0,
            )
        };
        Ok(Self {
            entity_id,
            dx,
            dy,
            dz,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityTeleport {
    pub entity_id: i32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: i8,
    pub pitch: i8,
}

impl EntityTeleport {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let entity_id = r.read_varint()?;
        let (x, y, z) = if r.version().at_least(epoch::ENTITY_DOUBLES) {
            (r.read_f64()?, r.read_f64()?, r.read_f64()?)
        } else {
            (
                f64::from(r.read_i32()?) / 32.0,
                f64::from(r.read_i32()?) / 32.0,
                f64::from(r.read_i32()?) / 32.0,
            )
        };
        Ok(Self {
            entity_id,
            x,
            y,
            z,
            yaw: r.read_i8()?,
            pitch: r.read_i8()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestroyEntities {
    pub entity_ids: Vec<i32>,
}

impl DestroyEntities {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let count = r.read_varint()?;
        if count < 0 {
            return Err(ProtocolError::NegativeLength(count));
        }
        let mut entity_ids = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            entity_ids.push(r.read_varint()?);
        }
        Ok(Self { entity_ids })
    }
}

/// ATTACH_ENTITY. 1.8 carries (entity, vehicle, leash); 1.9 repurposed the
/// packet for leashing only, holder −1 meaning detach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachEntity {
    pub entity_id: i32,
    pub vehicle_id: i32,
    pub leash: bool,
}

impl AttachEntity {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        if r.version().at_least(epoch::ENTITY_DOUBLES) {
            let entity_id = r.read_i32()?;
            let vehicle_id = r.read_i32()?;
            Ok(Self {
                entity_id,
                vehicle_id,
                leash: vehicle_id != -1,
            })
        } else {
            Ok(Self {
                entity_id: r.read_i32()?,
                vehicle_id: r.read_i32()?,
                leash: r.read_bool()?,
            })
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChangeGameState {
    pub reason: u8,
    pub value: f32,
}

impl ChangeGameState {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: r.read_u8()?,
            value: r.read_f32()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) {
        buf.write_u8(self.reason);
        buf.write_f32(self.value);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetSlot {
    pub window_id: i8,
    pub slot: i16,
    pub data: SlotData,
}

impl SetSlot {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            window_id: r.read_i8()?,
            slot: r.read_i16()?,
            data: r.read_slot()?,
        })
    }
}

/// Play-state disconnect; the reason is a JSON chat document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: String,
}

impl Disconnect {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: r.read_string()?,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_string(&self.reason)
    }
}

/// One profile property on a PLAYER_LIST_ITEM add action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

impl Property {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let name = r.read_string()?;
        let value = r.read_string()?;
        let signature = if r.read_bool()? {
            Some(r.read_string()?)
        } else {
            None
        };
        Ok(Self {
            name,
            value,
            signature,
        })
    }

    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        buf.write_string(&self.name)?;
        buf.write_string(&self.value)?;
        match &self.signature {
            Some(sig) => {
                buf.write_bool(true);
                buf.write_string(sig)?;
            }
            None => buf.write_bool(false),
        }
        Ok(())
    }
}

/// PLAYER_LIST_ITEM actions. Only `Add` carries properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerListAction {
    Add {
        name: String,
        properties: Vec<Property>,
        gamemode: i32,
        ping: i32,
        display_name: Option<String>,
    },
    UpdateGamemode(i32),
    UpdateLatency(i32),
    UpdateDisplayName(Option<String>),
    Remove,
}

impl PlayerListAction {
    const ADD: i32 = 0;
    const GAMEMODE: i32 = 1;
    const LATENCY: i32 = 2;
    const DISPLAY_NAME: i32 = 3;
    const REMOVE: i32 = 4;

    #[must_use]
    pub const fn discriminant(&self) -> i32 {
        match self {
            Self::Add { .. } => Self::ADD,
            Self::UpdateGamemode(_) => Self::GAMEMODE,
            Self::UpdateLatency(_) => Self::LATENCY,
            Self::UpdateDisplayName(_) => Self::DISPLAY_NAME,
            Self::Remove => Self::REMOVE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerListEntry {
    pub uuid: Uuid,
    pub action: PlayerListAction,
}

/// The whole PLAYER_LIST_ITEM packet, parsed entry by entry so identities
/// can be rewritten in place and the packet re-encoded with its original
/// entry count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerListItem {
    pub entries: Vec<PlayerListEntry>,
}

impl PlayerListItem {
    pub fn read(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let action = r.read_varint()?;
        let count = r.read_varint()?;
        if count < 0 {
            return Err(ProtocolError::NegativeLength(count));
        }

        let mut entries = Vec::with_capacity((count as usize).min(256));
        for _ in 0..count {
            let uuid = r.read_uuid()?;
            let action = match action {
                PlayerListAction::ADD => {
                    let name = r.read_string()?;
                    let property_count = r.read_varint()?;
                    if property_count < 0 {
                        return Err(ProtocolError::NegativeLength(property_count));
                    }
                    let mut properties = Vec::with_capacity((property_count as usize).min(16));
                    for _ in 0..property_count {
                        properties.push(Property::read(r)?);
                    }
                    let gamemode = r.read_varint()?;
                    let ping = r.read_varint()?;
                    let display_name = if r.read_bool()? {
                        Some(r.read_string()?)
                    } else {
                        None
                    };
                    PlayerListAction::Add {
                        name,
                        properties,
                        gamemode,
                        ping,
                        display_name,
                    }
                }
                PlayerListAction::GAMEMODE => PlayerListAction::UpdateGamemode(r.read_varint()?),
                PlayerListAction::LATENCY => PlayerListAction::UpdateLatency(r.read_varint()?),
                PlayerListAction::DISPLAY_NAME => {
                    let display = if r.read_bool()? {
                        Some(r.read_string()?)
                    } else {
                        None
                    };
                    PlayerListAction::UpdateDisplayName(display)
                }
                PlayerListAction::REMOVE => PlayerListAction::Remove,
                other => {
                    return Err(ProtocolError::BadDiscriminant {
                        what: "PLAYER_LIST_ITEM action",
                        value: other,
                    });
                }
            };
            entries.push(PlayerListEntry { uuid, action });
        }

        Ok(Self { entries })
    }

    /// Re-encodes the packet. All entries share one action varint, so a
    /// packet mixing actions is a caller bug; the first entry decides.
    pub fn write(&self, buf: &mut PacketBuf) -> Result<(), ProtocolError> {
        let action = self
            .entries
            .first()
            .map_or(PlayerListAction::ADD, |e| e.action.discriminant());
        buf.write_varint(action);
        buf.write_varint(self.entries.len() as i32);

        for entry in &self.entries {
            buf.write_uuid(entry.uuid);
            match &entry.action {
                PlayerListAction::Add {
                    name,
                    properties,
                    gamemode,
                    ping,
                    display_name,
                } => {
                    buf.write_string(name)?;
                    buf.write_varint(properties.len() as i32);
                    for property in properties {
                        property.write(buf)?;
                    }
                    buf.write_varint(*gamemode);
                    buf.write_varint(*ping);
                    match display_name {
                        Some(display) => {
                            buf.write_bool(true);
                            buf.write_string(display)?;
                        }
                        None => buf.write_bool(false),
                    }
                }
                PlayerListAction::UpdateGamemode(gamemode) => buf.write_varint(*gamemode),
                PlayerListAction::UpdateLatency(ping) => buf.write_varint(*ping),
                PlayerListAction::UpdateDisplayName(display) => match display {
                    Some(display) => {
                        buf.write_bool(true);
                        buf.write_string(display)?;
                    }
                    None => buf.write_bool(false),
                },
                PlayerListAction::Remove => {}
            }
        }

        Ok(())
    }
}
