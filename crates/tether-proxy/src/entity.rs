//! Proxy-side mirror of the backend's entity set.
//!
//! Single-writer per session (the server half), read-only to external
//! queries. Readers tolerate staleness; nothing here is serialized across
//! entries, and an inconsistent update is logged and swallowed rather than
//! treated as fatal.

use papaya::HashMap;
use rustc_hash::FxBuildHasher;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub uuid: Option<Uuid>,
    pub kind: i32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: i8,
    pub pitch: i8,
    pub head_pitch: Option<i8>,
    /// Object (projectile, item frame, …) as opposed to a mob.
    pub is_object: bool,
}

#[derive(Default)]
pub struct EntityTable {
    map: HashMap<i32, Entity, FxBuildHasher>,
}

impl EntityTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity_id: i32, entity: Entity) {
        self.map.pin().insert(entity_id, entity);
    }

    #[must_use]
    pub fn get(&self, entity_id: i32) -> Option<Entity> {
        self.map.pin().get(&entity_id).cloned()
    }

    pub fn move_relative(&self, entity_id: i32, dx: f64, dy: f64, dz: f64) {
        let map = self.map.pin();
        let Some(entity) = map.get(&entity_id) else {
            warn!(entity_id, "relative move for an entity the table never saw");
            return;
        };
        let mut moved = entity.clone();
        moved.x += dx;
        moved.y += dy;
        moved.z += dz;
        map.insert(entity_id, moved);
    }

    pub fn teleport(&self, entity_id: i32, x: f64, y: f64, z: f64, yaw: i8, pitch: i8) {
        let map = self.map.pin();
        let Some(entity) = map.get(&entity_id) else {
            warn!(entity_id, "teleport for an entity the table never saw");
            return;
        };
        let mut moved = entity.clone();
        moved.x = x;
        moved.y = y;
        moved.z = z;
        moved.yaw = yaw;
        moved.pitch = pitch;
        map.insert(entity_id, moved);
    }

    pub fn remove(&self, entity_id: i32) {
        self.map.pin().remove(&entity_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.pin().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.pin().is_empty()
    }

    /// Drops every entry; used when a session rebinds to a fresh backend.
    pub fn clear(&self) {
        self.map.pin().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mob(x: f64) -> Entity {
        Entity {
            uuid: None,
            kind: 54,
            x,
            y: 64.0,
            z: 0.0,
            yaw: 0,
            pitch: 0,
            head_pitch: Some(0),
            is_object: false,
        }
    }

    #[test]
    fn spawn_move_destroy_lifecycle() {
        let table = EntityTable::new();
        table.insert(9, mob(10.0));
        table.move_relative(9, 0.5, 0.0, -0.25);
        let entity = table.get(9).unwrap();
        assert!((entity.x - 10.5).abs() < f64::EPSILON);
        assert!((entity.z + 0.25).abs() < f64::EPSILON);

        table.teleport(9, -4.0, 70.0, 8.0, 16, -8);
        let entity = table.get(9).unwrap();
        assert!((entity.x + 4.0).abs() < f64::EPSILON);
        assert_eq!(entity.yaw, 16);

        table.remove(9);
        assert!(table.get(9).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn moving_an_unknown_entity_is_harmless() {
        let table = EntityTable::new();
        table.move_relative(1, 1.0, 0.0, 0.0);
        table.teleport(1, 0.0, 0.0, 0.0, 0, 0);
        assert!(table.get(1).is_none());
    }
}
