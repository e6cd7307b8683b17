//! Configuration system.
//!
//! Loads server configuration from JSON strings/files. Every field has a
//! default, so a config file only needs to name what it overrides.

use std::{path::Path, time::Duration};

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

/// Root server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Control channel (handshake) listen address.
    pub tcp_addr: String,
    /// Gameplay datagram listen address.
    pub udp_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// World-state broadcast rate, independent of `tick_hz`.
    pub broadcast_hz: u32,
    pub max_players: u8,
    /// Capacity of the transport -> simulation event queue.
    pub input_queue: usize,
    /// Capacity of the simulation -> transport datagram queue.
    pub outbound_queue: usize,
    pub game: GameTuning,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: "0.0.0.0:4242".to_string(),
            udp_addr: "0.0.0.0:4243".to_string(),
            tick_hz: 60,
            broadcast_hz: 30,
            max_players: 4,
            input_queue: 1024,
            outbound_queue: 4096,
            game: GameTuning::default(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.tick_hz > 0, "tick_hz must be positive");
        ensure!(self.broadcast_hz > 0, "broadcast_hz must be positive");
        ensure!(
            (1..=4).contains(&self.max_players),
            "max_players must be within 1..=4"
        );
        ensure!(self.input_queue > 0, "input_queue must be positive");
        ensure!(self.outbound_queue > 0, "outbound_queue must be positive");
        self.game.validate()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz))
    }

    /// Seconds of simulation time between two world-state broadcasts.
    pub fn broadcast_period(&self) -> f32 {
        1.0 / self.broadcast_hz as f32
    }
}

/// Which enemy a bullet hits when it overlaps several in the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HitPolicy {
    /// The longest-lived enemy (lowest network id).
    #[default]
    OldestFirst,
    /// The enemy whose centre is closest to the bullet's; ties go to the oldest.
    Nearest,
}

/// Gameplay tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameTuning {
    pub field_width: f32,
    pub field_height: f32,
    pub shoot_cooldown_ms: u64,
    pub hit_policy: HitPolicy,
    /// Fixed seed for the spawner RNG; random when absent.
    pub rng_seed: Option<u64>,
    pub player: PlayerTuning,
    pub bullet: BulletTuning,
    pub enemy: EnemyTuning,
}

impl Default for GameTuning {
    fn default() -> Self {
        Self {
            field_width: 800.0,
            field_height: 600.0,
            shoot_cooldown_ms: 250,
            hit_policy: HitPolicy::default(),
            rng_seed: None,
            player: PlayerTuning::default(),
            bullet: BulletTuning::default(),
            enemy: EnemyTuning::default(),
        }
    }
}

impl GameTuning {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.field_width > 0.0 && self.field_height > 0.0,
            "play field must have a positive size"
        );
        ensure!(
            self.enemy.spawn_interval_min > 0.0
                && self.enemy.spawn_interval_min <= self.enemy.spawn_interval_max,
            "enemy spawn interval must satisfy 0 < min <= max"
        );
        ensure!(self.bullet.lifetime > 0.0, "bullet lifetime must be positive");
        Ok(())
    }

    pub fn shoot_cooldown(&self) -> f32 {
        Duration::from_millis(self.shoot_cooldown_ms).as_secs_f32()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerTuning {
    /// Units per second per unit of input axis.
    pub speed: f32,
    pub width: f32,
    pub height: f32,
    pub health: u8,
    /// Player `n` starts at `spawn_x + n * spawn_spacing`.
    pub spawn_x: f32,
    pub spawn_spacing: f32,
    pub spawn_y: f32,
}

impl Default for PlayerTuning {
    fn default() -> Self {
        Self {
            speed: 200.0,
            width: 48.0,
            height: 48.0,
            health: 100,
            spawn_x: 100.0,
            spawn_spacing: 100.0,
            spawn_y: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulletTuning {
    pub speed: f32,
    pub damage: u8,
    /// Seconds.
    pub lifetime: f32,
    pub width: f32,
    pub height: f32,
    /// Muzzle offset from the shooter's position.
    pub offset_x: f32,
    pub offset_y: f32,
    /// Bullets past this x are reaped.
    pub despawn_x: f32,
}

impl Default for BulletTuning {
    fn default() -> Self {
        Self {
            speed: 400.0,
            damage: 25,
            lifetime: 3.0,
            width: 8.0,
            height: 2.0,
            offset_x: 60.0,
            offset_y: 20.0,
            despawn_x: 900.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnemyTuning {
    /// Leftward speed, units per second.
    pub speed: f32,
    pub health: u8,
    pub width: f32,
    pub height: f32,
    /// Enemies enter just past the right edge.
    pub spawn_x: f32,
    /// Enemies past this x (left of the field) are reaped.
    pub despawn_x: f32,
    /// Seconds.
    pub spawn_interval_min: f32,
    pub spawn_interval_max: f32,
    /// Delay before the first enemy.
    pub first_spawn_after: f32,
}

impl Default for EnemyTuning {
    fn default() -> Self {
        Self {
            speed: 150.0,
            health: 50,
            width: 40.0,
            height: 40.0,
            spawn_x: 850.0,
            despawn_x: -100.0,
            spawn_interval_min: 3.0,
            spawn_interval_max: 5.0,
            first_spawn_after: 3.0,
        }
    }
}

/// Headless client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server control channel address.
    pub server_addr: String,
    pub username: String,
    /// Input send rate.
    pub input_hz: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4242".to_string(),
            username: "Player".to_string(),
            input_hz: 60,
        }
    }
}
