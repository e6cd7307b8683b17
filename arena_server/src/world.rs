//! Game world: the entity registry plus the per-player bookkeeping the
//! simulation needs around it.
//!
//! Only this module spawns gameplay entities, so every networked entity gets
//! exactly one `NetworkId` and the full component set its kind requires.

use std::{collections::BTreeMap, net::SocketAddr};

use arena_shared::{
    components::{
        Color, Damage, Drawable, EntityKind, Health, Lifetime, NetworkId, PlayerOwner, Position,
        Velocity, SERVER_OWNER,
    },
    config::GameTuning,
    ecs::{Entity, Registry},
    protocol::{BatchEntry, EntitySpawn, PlayerInput},
};
use tracing::warn;

/// Health reported for networked entities without a `Health` component.
pub const DEFAULT_REPORTED_HEALTH: u8 = 100;

const PLAYER_COLORS: [Color; 4] = [
    Color::rgb(200, 30, 30),
    Color::rgb(30, 200, 30),
    Color::rgb(30, 30, 200),
    Color::rgb(200, 200, 30),
];
const BULLET_COLOR: Color = Color::rgb(255, 255, 0);
const ENEMY_COLOR: Color = Color::rgb(255, 0, 0);

/// Per-player state owned by the simulation.
#[derive(Debug, Clone)]
pub struct PlayerSlot {
    pub username: String,
    /// Bound avatar; cleared before the handle is recycled.
    pub entity: Option<Entity>,
    /// Set once the first authenticated datagram arrives.
    pub endpoint: Option<SocketAddr>,
    /// Simulation time of the last accepted shot.
    pub last_shot: Option<f64>,
    /// Latest input received since the previous tick.
    pub pending_input: Option<PlayerInput>,
}

impl PlayerSlot {
    fn new(username: String) -> Self {
        Self {
            username,
            entity: None,
            endpoint: None,
            last_shot: None,
            pending_input: None,
        }
    }
}

pub struct GameWorld {
    pub registry: Registry,
    pub players: BTreeMap<u8, PlayerSlot>,
    next_network_id: u32,
}

impl Default for GameWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl GameWorld {
    pub fn new() -> Self {
        let mut registry = Registry::new();
        registry.register::<Position>();
        registry.register::<Velocity>();
        registry.register::<Drawable>();
        registry.register::<Health>();
        registry.register::<Damage>();
        registry.register::<NetworkId>();
        registry.register::<PlayerOwner>();
        registry.register::<EntityKind>();
        registry.register::<Lifetime>();
        Self {
            registry,
            players: BTreeMap::new(),
            next_network_id: 1,
        }
    }

    /// Ids run 1..=u32::MAX and then wrap back to 1; 0 is never handed out.
    fn allocate_network_id(&mut self) -> NetworkId {
        let id = NetworkId(self.next_network_id);
        self.next_network_id = match self.next_network_id.checked_add(1) {
            Some(next) => next,
            None => {
                warn!("Network id space exhausted; wrapping to 1");
                1
            }
        };
        id
    }

    /// Spawns and binds the avatar for `player_id`, replacing any previous slot.
    pub fn spawn_player(&mut self, player_id: u8, username: String, tuning: &GameTuning) -> Entity {
        let p = &tuning.player;
        let color = PLAYER_COLORS[usize::from(player_id.saturating_sub(1)) % PLAYER_COLORS.len()];
        let e = self.registry.spawn();
        let net_id = self.allocate_network_id();
        self.registry.insert(
            e,
            Position::new(p.spawn_x + p.spawn_spacing * f32::from(player_id), p.spawn_y),
        );
        self.registry.insert(e, Velocity::ZERO);
        self.registry.insert(e, Drawable::new(p.width, p.height, color));
        self.registry.insert(e, Health::full(p.health));
        self.registry.insert(e, net_id);
        self.registry.insert(e, PlayerOwner { player_id });
        self.registry.insert(e, EntityKind::Player);

        let mut slot = PlayerSlot::new(username);
        slot.entity = Some(e);
        self.players.insert(player_id, slot);
        e
    }

    /// Spawns a player-owned bullet at the muzzle of `shooter_pos`.
    pub fn spawn_bullet(&mut self, owner: u8, shooter_pos: Position, tuning: &GameTuning) -> Entity {
        let b = &tuning.bullet;
        let e = self.registry.spawn();
        let net_id = self.allocate_network_id();
        self.registry.insert(
            e,
            Position::new(shooter_pos.x + b.offset_x, shooter_pos.y + b.offset_y),
        );
        self.registry.insert(e, Velocity::new(b.speed, 0.0));
        self.registry.insert(e, Drawable::new(b.width, b.height, BULLET_COLOR));
        self.registry.insert(e, net_id);
        self.registry.insert(e, PlayerOwner { player_id: owner });
        self.registry.insert(e, EntityKind::PlayerBullet);
        self.registry.insert(e, Damage { amount: b.damage });
        self.registry.insert(e, Lifetime { remaining: b.lifetime });
        e
    }

    /// Spawns a server-owned enemy entering from the right at lane `y`.
    pub fn spawn_enemy(&mut self, y: f32, tuning: &GameTuning) -> Entity {
        let en = &tuning.enemy;
        let e = self.registry.spawn();
        let net_id = self.allocate_network_id();
        self.registry.insert(e, Position::new(en.spawn_x, y));
        self.registry.insert(e, Velocity::new(-en.speed, 0.0));
        self.registry.insert(e, Drawable::new(en.width, en.height, ENEMY_COLOR));
        self.registry.insert(e, Health::full(en.health));
        self.registry.insert(e, net_id);
        self.registry.insert(e, SERVER_OWNER);
        self.registry.insert(e, EntityKind::Enemy);
        e
    }

    /// Full spawn description of a networked entity, or `None` if it is not
    /// replicated.
    pub fn spawn_message(&self, e: Entity) -> Option<EntitySpawn> {
        let reg = &self.registry;
        let net_id = reg.get::<NetworkId>(e)?;
        let kind = reg.get::<EntityKind>(e).copied().unwrap_or(EntityKind::Obstacle);
        let pos = reg.get::<Position>(e).copied().unwrap_or_default();
        let vel = reg.get::<Velocity>(e).copied().unwrap_or_default();
        let owner = reg.get::<PlayerOwner>(e).copied().unwrap_or(SERVER_OWNER);
        let username = if kind == EntityKind::Player {
            self.players
                .get(&owner.player_id)
                .map(|slot| slot.username.clone())
                .unwrap_or_default()
        } else {
            String::new()
        };
        Some(EntitySpawn {
            network_id: net_id.0,
            kind,
            owner_player: owner.player_id,
            pos_x: pos.x,
            pos_y: pos.y,
            vel_x: vel.x,
            vel_y: vel.y,
            health: reported_health(reg, e),
            username,
        })
    }

    /// Live networked entities, ascending by network id.
    pub fn networked(&self) -> Vec<(NetworkId, Entity)> {
        let mut out: Vec<(NetworkId, Entity)> = self
            .registry
            .iter::<NetworkId>()
            .map(|(e, id)| (*id, e))
            .collect();
        out.sort_unstable();
        out
    }

    /// State of every replicated entity (Position + NetworkId + Drawable),
    /// ascending by network id.
    pub fn batch_entries(&self) -> Vec<BatchEntry> {
        let reg = &self.registry;
        self.networked()
            .into_iter()
            .filter(|(_, e)| reg.has::<Drawable>(*e))
            .filter_map(|(id, e)| {
                let pos = reg.get::<Position>(e)?;
                Some(BatchEntry {
                    network_id: id.0,
                    pos_x: pos.x,
                    pos_y: pos.y,
                    health: reported_health(reg, e),
                })
            })
            .collect()
    }

    /// Ready endpoints of every player, ascending by player id.
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.players.values().filter_map(|p| p.endpoint).collect()
    }

    pub fn player_entity(&self, player_id: u8) -> Option<Entity> {
        self.players
            .get(&player_id)
            .and_then(|slot| slot.entity)
            .filter(|e| self.registry.is_alive(*e))
    }
}

fn reported_health(reg: &Registry, e: Entity) -> u8 {
    reg.get::<Health>(e)
        .map(|h| h.current)
        .unwrap_or(DEFAULT_REPORTED_HEALTH)
}
