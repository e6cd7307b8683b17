//! Gameplay systems.
//!
//! Each system is a plain function over the [`GameWorld`]. The simulation runs
//! them in a fixed order every tick:
//!
//! 1. [`input_system`]
//! 2. [`enemy_spawner_system`]
//! 3. [`movement_system`]
//! 4. [`lifetime_system`]
//! 5. [`collision_system`]
//! 6. [`destruction_system`]
//! 7. [`broadcast_system`] (only on broadcast ticks)
//!
//! Systems never destroy entities directly; they push them on the
//! [`DestroyQueue`] and the destruction system reaps them once per tick.

use arena_shared::{
    components::{Damage, Drawable, EntityKind, Health, Lifetime, NetworkId, Position, Velocity},
    config::{GameTuning, HitPolicy},
    ecs::Entity,
    math::Rect,
    protocol::{Buttons, EntityBatch, Payload},
};
use rand::Rng;
use tracing::{debug, trace};

use crate::{replication::Outbox, world::GameWorld};

/// Slack for comparing accumulated simulation time against cooldowns.
const TIME_EPSILON: f64 = 1e-6;

/// Entities to reap at the end of the tick.
#[derive(Debug, Default)]
pub struct DestroyQueue {
    entities: Vec<Entity>,
}

impl DestroyQueue {
    pub fn push(&mut self, e: Entity) {
        self.entities.push(e);
    }

    pub fn contains(&self, e: Entity) -> bool {
        self.entities.contains(&e)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Takes the queued entities, sorted and without duplicates.
    pub fn drain(&mut self) -> Vec<Entity> {
        let mut out = std::mem::take(&mut self.entities);
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Randomized enemy spawn timer.
#[derive(Debug, Clone)]
pub struct EnemySpawner {
    elapsed: f32,
    threshold: f32,
}

impl EnemySpawner {
    pub fn new(tuning: &GameTuning) -> Self {
        Self {
            elapsed: 0.0,
            threshold: tuning.enemy.first_spawn_after,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Applies the latest buffered input of every player.
///
/// Movement axes are clamped to `{-1, 0, 1}`. SHOOT spawns a bullet when the
/// shooter's cooldown has elapsed in simulation time `now`.
pub fn input_system(world: &mut GameWorld, tuning: &GameTuning, now: f64, out: &mut Outbox) {
    let endpoints = world.endpoints();
    let player_ids: Vec<u8> = world.players.keys().copied().collect();

    for player_id in player_ids {
        let Some(input) = world
            .players
            .get_mut(&player_id)
            .and_then(|slot| slot.pending_input.take())
        else {
            continue;
        };
        let Some(avatar) = world.player_entity(player_id) else {
            debug!(player_id, "Input for player without a live entity; dropped");
            continue;
        };

        let speed = tuning.player.speed;
        let vel = Velocity::new(
            f32::from(input.move_x.signum()) * speed,
            f32::from(input.move_y.signum()) * speed,
        );
        world.registry.insert(avatar, vel);

        if !input.buttons.contains(Buttons::SHOOT) {
            continue;
        }
        let cooldown = f64::from(tuning.shoot_cooldown());
        let ready = world
            .players
            .get(&player_id)
            .and_then(|slot| slot.last_shot)
            .map_or(true, |t| now - t + TIME_EPSILON >= cooldown);
        if !ready {
            continue;
        }
        let Some(origin) = world.registry.get::<Position>(avatar).copied() else {
            continue;
        };
        if let Some(slot) = world.players.get_mut(&player_id) {
            slot.last_shot = Some(now);
        }
        let bullet = world.spawn_bullet(player_id, origin, tuning);
        trace!(player_id, ?bullet, "Bullet fired");
        if let Some(spawn) = world.spawn_message(bullet) {
            out.broadcast(&endpoints, Payload::EntitySpawn(spawn));
        }
    }
}

/// Spawns one enemy whenever the accumulated time reaches the current
/// threshold, then draws a new threshold.
pub fn enemy_spawner_system<R: Rng>(
    world: &mut GameWorld,
    spawner: &mut EnemySpawner,
    rng: &mut R,
    tuning: &GameTuning,
    dt: f32,
    out: &mut Outbox,
) {
    spawner.elapsed += dt;
    if spawner.elapsed < spawner.threshold {
        return;
    }
    spawner.elapsed = 0.0;

    let en = &tuning.enemy;
    spawner.threshold = rng.gen_range(en.spawn_interval_min..=en.spawn_interval_max);
    let y = rng.gen_range(0.0..tuning.field_height);
    let enemy = world.spawn_enemy(y, tuning);
    debug!(?enemy, y, next_in = spawner.threshold, "Enemy spawned");

    if let Some(spawn) = world.spawn_message(enemy) {
        out.broadcast(&world.endpoints(), Payload::EntitySpawn(spawn));
    }
}

/// Integrates `position += velocity * dt`. Players are clamped to the field.
pub fn movement_system(world: &mut GameWorld, tuning: &GameTuning, dt: f32) {
    let field = Rect::new(0.0, 0.0, tuning.field_width, tuning.field_height);
    let reg = &mut world.registry;
    let moving: Vec<(Entity, Velocity)> = reg.iter::<Velocity>().map(|(e, v)| (e, *v)).collect();

    for (e, vel) in moving {
        let is_player = reg.get::<EntityKind>(e) == Some(&EntityKind::Player);
        let Some(pos) = reg.get_mut::<Position>(e) else {
            continue;
        };
        pos.x += vel.x * dt;
        pos.y += vel.y * dt;
        if is_player {
            let clamped = field.clamp_point(pos.as_vec());
            pos.x = clamped.x;
            pos.y = clamped.y;
        }
    }
}

/// Counts lifetimes down and queues expired entities.
pub fn lifetime_system(world: &mut GameWorld, dt: f32, queue: &mut DestroyQueue) {
    for (e, lifetime) in world.registry.storage_mut::<Lifetime>().iter_mut() {
        lifetime.remaining -= dt;
        if lifetime.remaining <= 0.0 {
            queue.push(e);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Hitbox {
    entity: Entity,
    net_id: NetworkId,
    bounds: Rect,
}

/// Player bullets against enemies, plus out-of-field reaping.
///
/// A bullet that overlaps an enemy is always queued and damages at most one
/// enemy, chosen by the configured [`HitPolicy`] among enemies still alive in
/// this pass. An enemy is queued when its health reaches zero.
pub fn collision_system(world: &mut GameWorld, tuning: &GameTuning, queue: &mut DestroyQueue) {
    let reg = &world.registry;
    let mut bullets: Vec<(Hitbox, u8)> = Vec::new();
    let mut enemies: Vec<(Hitbox, u8)> = Vec::new();

    for (e, kind) in reg.iter::<EntityKind>() {
        let (Some(pos), Some(shape), Some(net_id)) = (
            reg.get::<Position>(e),
            reg.get::<Drawable>(e),
            reg.get::<NetworkId>(e),
        ) else {
            continue;
        };
        let hitbox = Hitbox {
            entity: e,
            net_id: *net_id,
            bounds: shape.bounds_at(*pos),
        };
        match kind {
            EntityKind::PlayerBullet => {
                let damage = reg.get::<Damage>(e).map_or(tuning.bullet.damage, |d| d.amount);
                bullets.push((hitbox, damage));
            }
            EntityKind::Enemy => {
                if let Some(health) = reg.get::<Health>(e) {
                    enemies.push((hitbox, health.current));
                }
            }
            _ => {}
        }
    }
    bullets.sort_unstable_by_key(|(h, _)| h.net_id);
    enemies.sort_unstable_by_key(|(h, _)| h.net_id);

    for (bullet, damage) in &bullets {
        let candidates = enemies
            .iter()
            .enumerate()
            .filter(|(_, (enemy, health))| *health > 0 && bullet.bounds.overlaps(&enemy.bounds));
        let target = match tuning.hit_policy {
            HitPolicy::OldestFirst => candidates.map(|(i, _)| i).next(),
            HitPolicy::Nearest => {
                let origin = bullet.bounds.center();
                candidates
                    .min_by(|(_, (a, _)), (_, (b, _))| {
                        let da = origin.dist_sq(a.bounds.center());
                        let db = origin.dist_sq(b.bounds.center());
                        da.total_cmp(&db)
                    })
                    .map(|(i, _)| i)
            }
        };
        let Some(idx) = target else {
            continue;
        };

        queue.push(bullet.entity);
        let (enemy, remaining) = &mut enemies[idx];
        if let Some(health) = world.registry.get_mut::<Health>(enemy.entity) {
            let lethal = health.apply_damage(*damage);
            *remaining = health.current;
            trace!(enemy = ?enemy.net_id, hp = health.current, "Enemy hit");
            if lethal {
                queue.push(enemy.entity);
            }
        }
    }

    for (bullet, _) in &bullets {
        if bullet.bounds.x > tuning.bullet.despawn_x {
            queue.push(bullet.entity);
        }
    }
    for (enemy, _) in &enemies {
        if enemy.bounds.x < tuning.enemy.despawn_x {
            queue.push(enemy.entity);
        }
    }
}

/// Reaps queued entities: unbinds players, destroys, and broadcasts one
/// `EntityDestroy` per networked entity.
pub fn destruction_system(world: &mut GameWorld, queue: &mut DestroyQueue, out: &mut Outbox) {
    if queue.is_empty() {
        return;
    }
    let endpoints = world.endpoints();
    for e in queue.drain() {
        if !world.registry.is_alive(e) {
            continue;
        }
        let net_id = world.registry.get::<NetworkId>(e).copied();
        for slot in world.players.values_mut() {
            if slot.entity == Some(e) {
                slot.entity = None;
            }
        }
        world.registry.destroy(e);
        if let Some(id) = net_id {
            debug!(network_id = id.0, "Entity destroyed");
            out.broadcast(&endpoints, Payload::EntityDestroy { network_id: id.0 });
        }
    }
}

/// Sends the state of every replicated entity to every ready endpoint, in
/// batches of at most ten, ascending by network id.
pub fn broadcast_system(world: &GameWorld, out: &mut Outbox) {
    let endpoints = world.endpoints();
    if endpoints.is_empty() {
        return;
    }
    let entries = world.batch_entries();
    for batch in EntityBatch::chunked(&entries) {
        out.broadcast(&endpoints, Payload::EntityBatchUpdate(batch));
    }
}
