//! Per-revision packet-type tables.
//!
//! Symbolic packet names are fixed across revisions; each revision maps the
//! names it knows to numeric ids, split into the client-bound and
//! server-bound play families. Handshake, status, and login ids never moved
//! and live as constants next to their layouts in [`crate::packets`].

use tracing::warn;

use crate::error::ProtocolError;

/// Negotiated wire revision number, straight from the client handshake.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(pub i32);

impl ProtocolVersion {
    #[must_use]
    pub const fn at_least(self, epoch: i32) -> bool {
        self.0 >= epoch
    }
}

/// Boundary versions at which one or more wire layouts changed. Parsers
/// branch on these instead of matching revisions directly.
pub mod epoch {
    /// Keep-alive ids became varints.
    pub const VARINT_KEEP_ALIVE: i32 = 47;
    /// Entity coordinates became doubles, relative moves became short
    /// deltas, and the spawn packets grew entity uuids.
    pub const ENTITY_DOUBLES: i32 = 107;
    /// Teleports are acknowledged with TELEPORT_CONFIRM rather than an
    /// echoed position-look.
    pub const TELEPORT_CONFIRM: i32 = 107;
    /// JOIN_GAME and RESPAWN widened the dimension field to an int.
    pub const DIMENSION_INT: i32 = 108;
    /// Packed position longs switched from x|y|z to x|z|y ordering. This
    /// boundary sits past every revision [`super::Revision::select`]
    /// serves; [`crate::BlockPos`] keeps the second layout as forward
    /// scaffolding for when the window moves.
    pub const POSITION_Y_TAIL: i32 = 441;
}

/// One supported pair of packet-id tables.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Revision {
    /// 1.8.x, protocol 47.
    V1_8,
    /// 1.9 through 1.9.2, protocols 107-109.
    V1_9,
    /// 1.9.3/1.9.4, protocol 110 and the trailing pre-1.10 window.
    V1_9_3,
}

/// Revision used when the handshake names a version outside every supported
/// range.
pub const FALLBACK: Revision = Revision::V1_8;

impl Revision {
    /// Maps a negotiated protocol number onto a table pair using half-open
    /// version ranges, warning when it has to fall back.
    #[must_use]
    pub fn select(version: ProtocolVersion) -> Self {
        match version.0 {
            47..=106 => Self::V1_8,
            107..=109 => Self::V1_9,
            110..=115 => Self::V1_9_3,
            other => {
                warn!(
                    version = other,
                    "unsupported protocol revision, falling back to {FALLBACK:?} tables"
                );
                FALLBACK
            }
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::V1_8 => "1.8",
            Self::V1_9 => "1.9",
            Self::V1_9_3 => "1.9.3",
        }
    }
}

/// Client-bound (server → client) play packets the proxy can name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Clientbound {
    KeepAlive,
    JoinGame,
    ChatMessage,
    TimeUpdate,
    SpawnPosition,
    PlayerPosLook,
    UseBed,
    Respawn,
    SpawnPlayer,
    SpawnObject,
    SpawnMob,
    EntityRelativeMove,
    EntityTeleport,
    DestroyEntities,
    AttachEntity,
    MapChunkBulk,
    ChangeGameState,
    SetSlot,
    PlayerListItem,
    Disconnect,
    SetCompression,
}

/// Server-bound (client → server) play packets the proxy can name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Serverbound {
    TeleportConfirm,
    KeepAlive,
    ChatMessage,
    Player,
    PlayerPosition,
    PlayerLook,
    PlayerPosLook,
}

impl Revision {
    /// Id of a client-bound packet in this revision, `None` when the packet
    /// does not exist on this wire.
    #[must_use]
    pub const fn clientbound_id(self, name: Clientbound) -> Option<i32> {
        use Clientbound::*;

        match self {
            Self::V1_8 => Some(match name {
                KeepAlive => 0x00,
                JoinGame => 0x01,
                ChatMessage => 0x02,
                TimeUpdate => 0x03,
                SpawnPosition => 0x05,
                Respawn => 0x07,
                PlayerPosLook => 0x08,
                UseBed => 0x0A,
                SpawnPlayer => 0x0C,
                SpawnObject => 0x0E,
                SpawnMob => 0x0F,
                DestroyEntities => 0x13,
                EntityRelativeMove => 0x15,
                EntityTeleport => 0x18,
                AttachEntity => 0x1B,
                MapChunkBulk => 0x26,
                ChangeGameState => 0x2B,
                SetSlot => 0x2F,
                PlayerListItem => 0x38,
                Disconnect => 0x40,
                SetCompression => 0x46,
            }),
            // 1.9.3 renumbered nothing the proxy names, so both revisions
            // share one table.
            Self::V1_9 | Self::V1_9_3 => match name {
                SpawnObject => Some(0x00),
                SpawnMob => Some(0x03),
                SpawnPlayer => Some(0x05),
                ChatMessage => Some(0x0F),
                SetSlot => Some(0x16),
                Disconnect => Some(0x1A),
                ChangeGameState => Some(0x1E),
                KeepAlive => Some(0x1F),
                JoinGame => Some(0x23),
                EntityRelativeMove => Some(0x25),
                PlayerListItem => Some(0x2D),
                PlayerPosLook => Some(0x2E),
                UseBed => Some(0x2F),
                DestroyEntities => Some(0x30),
                Respawn => Some(0x33),
                AttachEntity => Some(0x3A),
                SpawnPosition => Some(0x43),
                TimeUpdate => Some(0x44),
                EntityTeleport => Some(0x49),
                // gone: the chunk-bulk container and the play-state
                // compression toggle were removed in 1.9
                MapChunkBulk | SetCompression => None,
            },
        }
    }

    /// Reverse lookup for inbound dispatch.
    #[must_use]
    pub const fn clientbound(self, id: i32) -> Option<Clientbound> {
        use Clientbound::*;

        match self {
            Self::V1_8 => match id {
                0x00 => Some(KeepAlive),
                0x01 => Some(JoinGame),
                0x02 => Some(ChatMessage),
                0x03 => Some(TimeUpdate),
                0x05 => Some(SpawnPosition),
                0x07 => Some(Respawn),
                0x08 => Some(PlayerPosLook),
                0x0A => Some(UseBed),
                0x0C => Some(SpawnPlayer),
                0x0E => Some(SpawnObject),
                0x0F => Some(SpawnMob),
                0x13 => Some(DestroyEntities),
                0x15 => Some(EntityRelativeMove),
                0x18 => Some(EntityTeleport),
                0x1B => Some(AttachEntity),
                0x26 => Some(MapChunkBulk),
                0x2B => Some(ChangeGameState),
                0x2F => Some(SetSlot),
                0x38 => Some(PlayerListItem),
                0x40 => Some(Disconnect),
                0x46 => Some(SetCompression),
                _ => None,
            },
            Self::V1_9 | Self::V1_9_3 => match id {
                0x00 => Some(SpawnObject),
                0x03 => Some(SpawnMob),
                0x05 => Some(SpawnPlayer),
                0x0F => Some(ChatMessage),
                0x16 => Some(SetSlot),
                0x1A => Some(Disconnect),
                0x1E => Some(ChangeGameState),
                0x1F => Some(KeepAlive),
                0x23 => Some(JoinGame),
                0x25 => Some(EntityRelativeMove),
                0x2D => Some(PlayerListItem),
                0x2E => Some(PlayerPosLook),
                0x2F => Some(UseBed),
                0x30 => Some(DestroyEntities),
                0x33 => Some(Respawn),
                0x3A => Some(AttachEntity),
                0x43 => Some(SpawnPosition),
                0x44 => Some(TimeUpdate),
                0x49 => Some(EntityTeleport),
                _ => None,
            },
        }
    }

    /// Id of a server-bound packet in this revision.
    #[must_use]
    pub const fn serverbound_id(self, name: Serverbound) -> Option<i32> {
        use Serverbound::*;

        match self {
            Self::V1_8 => match name {
                KeepAlive => Some(0x00),
                ChatMessage => Some(0x01),
                Player => Some(0x03),
                PlayerPosition => Some(0x04),
                PlayerLook => Some(0x05),
                PlayerPosLook => Some(0x06),
                TeleportConfirm => None,
            },
            Self::V1_9 | Self::V1_9_3 => Some(match name {
                TeleportConfirm => 0x00,
                ChatMessage => 0x02,
                KeepAlive => 0x0B,
                PlayerPosition => 0x0C,
                PlayerPosLook => 0x0D,
                PlayerLook => 0x0E,
                Player => 0x0F,
            }),
        }
    }

    #[must_use]
    pub const fn serverbound(self, id: i32) -> Option<Serverbound> {
        use Serverbound::*;

        match self {
            Self::V1_8 => match id {
                0x00 => Some(KeepAlive),
                0x01 => Some(ChatMessage),
                0x03 => Some(Player),
                0x04 => Some(PlayerPosition),
                0x05 => Some(PlayerLook),
                0x06 => Some(PlayerPosLook),
                _ => None,
            },
            Self::V1_9 | Self::V1_9_3 => match id {
                0x00 => Some(TeleportConfirm),
                0x02 => Some(ChatMessage),
                0x0B => Some(KeepAlive),
                0x0C => Some(PlayerPosition),
                0x0D => Some(PlayerPosLook),
                0x0E => Some(PlayerLook),
                0x0F => Some(Player),
                _ => None,
            },
        }
    }

    /// Like [`Self::clientbound_id`] but surfaces the miss as an error.
    /// Asking for a packet a revision does not define is a programming
    /// error on the caller's side.
    pub fn require_clientbound(self, name: Clientbound) -> Result<i32, ProtocolError> {
        self.clientbound_id(name)
            .ok_or(ProtocolError::MissingPacket {
                name: clientbound_name(name),
                revision: self.name(),
            })
    }

    /// Like [`Self::serverbound_id`] but surfaces the miss as an error.
    pub fn require_serverbound(self, name: Serverbound) -> Result<i32, ProtocolError> {
        self.serverbound_id(name)
            .ok_or(ProtocolError::MissingPacket {
                name: serverbound_name(name),
                revision: self.name(),
            })
    }
}

const fn clientbound_name(name: Clientbound) -> &'static str {
    use Clientbound::*;

    match name {
        KeepAlive => "KEEP_ALIVE",
        JoinGame => "JOIN_GAME",
        ChatMessage => "CHAT_MESSAGE",
        TimeUpdate => "TIME_UPDATE",
        SpawnPosition => "SPAWN_POSITION",
        PlayerPosLook => "PLAYER_POSLOOK",
        UseBed => "USE_BED",
        Respawn => "RESPAWN",
        SpawnPlayer => "SPAWN_PLAYER",
        SpawnObject => "SPAWN_OBJECT",
        SpawnMob => "SPAWN_MOB",
        EntityRelativeMove => "ENTITY_RELATIVE_MOVE",
        EntityTeleport => "ENTITY_TELEPORT",
        DestroyEntities => "DESTROY_ENTITIES",
        AttachEntity => "ATTACH_ENTITY",
        MapChunkBulk => "MAP_CHUNK_BULK",
        ChangeGameState => "CHANGE_GAME_STATE",
        SetSlot => "SET_SLOT",
        PlayerListItem => "PLAYER_LIST_ITEM",
        Disconnect => "DISCONNECT",
        SetCompression => "SET_COMPRESSION",
    }
}

const fn serverbound_name(name: Serverbound) -> &'static str {
    use Serverbound::*;

    match name {
        TeleportConfirm => "TELEPORT_CONFIRM",
        KeepAlive => "KEEP_ALIVE",
        ChatMessage => "CHAT_MESSAGE",
        Player => "PLAYER",
        PlayerPosition => "PLAYER_POSITION",
        PlayerLook => "PLAYER_LOOK",
        PlayerPosLook => "PLAYER_POSLOOK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_by_range() {
        assert_eq!(Revision::select(ProtocolVersion(47)), Revision::V1_8);
        assert_eq!(Revision::select(ProtocolVersion(106)), Revision::V1_8);
        assert_eq!(Revision::select(ProtocolVersion(107)), Revision::V1_9);
        assert_eq!(Revision::select(ProtocolVersion(109)), Revision::V1_9);
        assert_eq!(Revision::select(ProtocolVersion(110)), Revision::V1_9_3);
    }

    #[test]
    fn unknown_versions_fall_back() {
        assert_eq!(Revision::select(ProtocolVersion(5)), FALLBACK);
        assert_eq!(Revision::select(ProtocolVersion(210)), FALLBACK);
    }

    #[test]
    fn tables_invert() {
        for rev in [Revision::V1_8, Revision::V1_9, Revision::V1_9_3] {
            for name in [
                Clientbound::KeepAlive,
                Clientbound::JoinGame,
                Clientbound::ChatMessage,
                Clientbound::SpawnPlayer,
                Clientbound::PlayerListItem,
                Clientbound::Disconnect,
                Clientbound::EntityTeleport,
            ] {
                let id = rev.clientbound_id(name).unwrap();
                assert_eq!(rev.clientbound(id), Some(name));
            }
            for name in [
                Serverbound::KeepAlive,
                Serverbound::ChatMessage,
                Serverbound::PlayerPosLook,
            ] {
                let id = rev.serverbound_id(name).unwrap();
                assert_eq!(rev.serverbound(id), Some(name));
            }
        }
    }

    #[test]
    fn absent_names_error() {
        assert!(matches!(
            Revision::V1_9.require_clientbound(Clientbound::MapChunkBulk),
            Err(ProtocolError::MissingPacket { .. })
        ));
        assert!(matches!(
            Revision::V1_8.require_serverbound(Serverbound::TeleportConfirm),
            Err(ProtocolError::MissingPacket { .. })
        ));
        assert_eq!(
            Revision::V1_8.require_clientbound(Clientbound::MapChunkBulk).ok(),
            Some(0x26)
        );
    }
}
