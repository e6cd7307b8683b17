//! Local mirror of the server world.
//!
//! Rebuilt purely from server packets: spawns create entries, batches and
//! updates move them, destroys remove them. Batch entries for network ids the
//! mirror never saw spawned are ignored.

use std::collections::BTreeMap;

use arena_shared::{
    components::EntityKind,
    math::Vec2,
    protocol::{BatchEntry, EntitySpawn, EntityUpdate, Payload},
};

#[derive(Debug, Clone, PartialEq)]
pub struct MirroredEntity {
    pub network_id: u32,
    pub kind: EntityKind,
    pub owner_player: u8,
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: u8,
    /// Empty for anything but players.
    pub username: String,
}

impl From<&EntitySpawn> for MirroredEntity {
    fn from(spawn: &EntitySpawn) -> Self {
        Self {
            network_id: spawn.network_id,
            kind: spawn.kind,
            owner_player: spawn.owner_player,
            position: Vec2::new(spawn.pos_x, spawn.pos_y),
            velocity: Vec2::new(spawn.vel_x, spawn.vel_y),
            health: spawn.health,
            username: spawn.username.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct WorldMirror {
    entities: BTreeMap<u32, MirroredEntity>,
    /// Network ids in the order their spawns arrived.
    spawn_log: Vec<u32>,
    batches: u64,
    ignored_entries: u64,
}

impl WorldMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one server payload. Returns false for payloads the mirror does
    /// not consume (inputs, pings).
    pub fn apply(&mut self, payload: &Payload) -> bool {
        match payload {
            Payload::EntitySpawn(spawn) => self.apply_spawn(spawn),
            Payload::EntityUpdate(update) => self.apply_update(update),
            Payload::EntityDestroy { network_id } => {
                self.entities.remove(network_id);
            }
            Payload::EntityBatchUpdate(batch) => {
                self.batches += 1;
                for entry in batch.entries() {
                    self.apply_batch_entry(entry);
                }
            }
            Payload::PlayerInput(_) | Payload::Ping | Payload::Pong => return false,
        }
        true
    }

    fn apply_spawn(&mut self, spawn: &EntitySpawn) {
        self.spawn_log.push(spawn.network_id);
        self.entities
            .insert(spawn.network_id, MirroredEntity::from(spawn));
    }

    fn apply_update(&mut self, update: &EntityUpdate) {
        if let Some(e) = self.entities.get_mut(&update.network_id) {
            e.position = Vec2::new(update.pos_x, update.pos_y);
            e.velocity = Vec2::new(update.vel_x, update.vel_y);
            e.health = update.health;
        }
    }

    fn apply_batch_entry(&mut self, entry: &BatchEntry) {
        match self.entities.get_mut(&entry.network_id) {
            Some(e) => {
                e.position = Vec2::new(entry.pos_x, entry.pos_y);
                e.health = entry.health;
            }
            None => self.ignored_entries += 1,
        }
    }

    pub fn get(&self, network_id: u32) -> Option<&MirroredEntity> {
        self.entities.get(&network_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities sorted by network id.
    pub fn entities(&self) -> impl Iterator<Item = &MirroredEntity> {
        self.entities.values()
    }

    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &MirroredEntity> {
        self.entities.values().filter(move |e| e.kind == kind)
    }

    /// The avatar owned by `player_id`, if spawned.
    pub fn player(&self, player_id: u8) -> Option<&MirroredEntity> {
        self.of_kind(EntityKind::Player)
            .find(|e| e.owner_player == player_id)
    }

    pub fn spawn_log(&self) -> &[u32] {
        &self.spawn_log
    }

    pub fn batches_received(&self) -> u64 {
        self.batches
    }

    pub fn ignored_entries(&self) -> u64 {
        self.ignored_entries
    }
}

#[cfg(test)]
mod tests {
    use arena_shared::protocol::EntityBatch;

    use super::*;

    fn spawn(network_id: u32, kind: EntityKind, owner: u8) -> Payload {
        Payload::EntitySpawn(EntitySpawn {
            network_id,
            kind,
            owner_player: owner,
            pos_x: 10.0,
            pos_y: 20.0,
            vel_x: 0.0,
            vel_y: 0.0,
            health: 100,
            username: if kind == EntityKind::Player {
                "ace".into()
            } else {
                String::new()
            },
        })
    }

    fn entry(network_id: u32, x: f32, health: u8) -> BatchEntry {
        BatchEntry {
            network_id,
            pos_x: x,
            pos_y: 5.0,
            health,
        }
    }

    #[test]
    fn batch_moves_known_and_ignores_unknown() {
        let mut mirror = WorldMirror::new();
        assert!(mirror.apply(&spawn(1, EntityKind::Player, 1)));

        let batch = EntityBatch::new(vec![entry(1, 42.0, 75), entry(9, 0.0, 10)]).unwrap();
        assert!(mirror.apply(&Payload::EntityBatchUpdate(batch)));

        let player = mirror.get(1).unwrap();
        assert_eq!(player.position, Vec2::new(42.0, 5.0));
        assert_eq!(player.health, 75);
        assert!(mirror.get(9).is_none());
        assert_eq!(mirror.ignored_entries(), 1);
        assert_eq!(mirror.batches_received(), 1);
    }

    #[test]
    fn destroy_removes_and_late_batch_is_ignored() {
        let mut mirror = WorldMirror::new();
        mirror.apply(&spawn(1, EntityKind::Player, 1));
        mirror.apply(&spawn(2, EntityKind::Enemy, 0));
        mirror.apply(&Payload::EntityDestroy { network_id: 2 });
        assert_eq!(mirror.len(), 1);

        let batch = EntityBatch::new(vec![entry(2, 1.0, 1)]).unwrap();
        mirror.apply(&Payload::EntityBatchUpdate(batch));
        assert!(mirror.get(2).is_none());
        assert_eq!(mirror.spawn_log(), &[1, 2]);
    }

    #[test]
    fn player_lookup_by_owner() {
        let mut mirror = WorldMirror::new();
        mirror.apply(&spawn(3, EntityKind::PlayerBullet, 2));
        mirror.apply(&spawn(4, EntityKind::Player, 2));
        let player = mirror.player(2).unwrap();
        assert_eq!(player.network_id, 4);
        assert_eq!(player.username, "ace");
        assert!(!mirror.apply(&Payload::Pong));
    }
}
