use crate::registry::{ProtocolVersion, epoch};

/// An integer block position packed into one long on the wire.
///
/// Two bit layouts exist: x(26)|y(12)|z(26) originally, and x(26)|z(26)|y(12)
/// from [`epoch::POSITION_Y_TAIL`] on. The codec picks by the session's
/// negotiated version.
///
/// Every revision the registry actually serves predates the swap, so the
/// y-tail branch is forward scaffolding: it keeps the version switch in the
/// one place that must learn the new packing when the served window moves
/// past [`epoch::POSITION_Y_TAIL`], and only tests reach it today.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub const fn from_packed(raw: i64, version: ProtocolVersion) -> Self {
        // shift pairs sign-extend the 26/12-bit fields
        if version.at_least(epoch::POSITION_Y_TAIL) {
            Self {
                x: (raw >> 38) as i32,
                y: (raw << 52 >> 52) as i32,
                z: (raw << 26 >> 38) as i32,
            }
        } else {
            Self {
                x: (raw >> 38) as i32,
                y: ((raw >> 26) & 0xFFF) as i32,
                z: (raw << 38 >> 38) as i32,
            }
        }
    }

    #[must_use]
    pub const fn to_packed(self, version: ProtocolVersion) -> i64 {
        let x = self.x as i64 & 0x3FF_FFFF;
        let y = self.y as i64 & 0xFFF;
        let z = self.z as i64 & 0x3FF_FFFF;

        if version.at_least(epoch::POSITION_Y_TAIL) {
            (x << 38) | (z << 12) | y
        } else {
            (x << 38) | (y << 26) | z
        }
    }
}
