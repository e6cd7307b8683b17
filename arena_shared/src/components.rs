//! Gameplay components.
//!
//! Plain values with no identity of their own; they are addressed by the
//! owning entity's handle inside the registry.

use serde::{Deserialize, Serialize};

use crate::math::{Rect, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn as_vec(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Units per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

impl Velocity {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::rgb(255, 255, 255)
    }
}

/// Visual extent. Also serves as the collision box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Drawable {
    pub width: f32,
    pub height: f32,
    pub color: Color,
}

impl Drawable {
    pub const fn new(width: f32, height: f32, color: Color) -> Self {
        Self {
            width,
            height,
            color,
        }
    }

    pub fn bounds_at(&self, pos: Position) -> Rect {
        Rect::new(pos.x, pos.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub current: u8,
    pub max: u8,
}

impl Health {
    pub const fn full(max: u8) -> Self {
        Self { current: max, max }
    }

    /// Subtracts `amount`, saturating at zero. Returns `true` if this was lethal.
    pub fn apply_damage(&mut self, amount: u8) -> bool {
        self.current = self.current.saturating_sub(amount);
        self.current == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Damage {
    pub amount: u8,
}

/// Replication id. The only entity reference that ever goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub u32);

/// Owning player; `0` means server-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerOwner {
    pub player_id: u8,
}

pub const SERVER_OWNER: PlayerOwner = PlayerOwner { player_id: 0 };

/// Entity type tag. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    Player = 0,
    Enemy = 1,
    PlayerBullet = 2,
    EnemyBullet = 3,
    Powerup = 4,
    Obstacle = 5,
}

impl EntityKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Player),
            1 => Some(Self::Enemy),
            2 => Some(Self::PlayerBullet),
            3 => Some(Self::EnemyBullet),
            4 => Some(Self::Powerup),
            5 => Some(Self::Obstacle),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Seconds left before the entity is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lifetime {
    pub remaining: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_saturates_at_zero() {
        let mut hp = Health::full(50);
        assert!(!hp.apply_damage(25));
        assert_eq!(hp.current, 25);
        assert!(hp.apply_damage(200));
        assert_eq!(hp.current, 0);
    }

    #[test]
    fn entity_kind_wire_values() {
        for v in 0..=5u8 {
            assert_eq!(EntityKind::from_u8(v).map(EntityKind::as_u8), Some(v));
        }
        assert_eq!(EntityKind::from_u8(6), None);
    }
}
