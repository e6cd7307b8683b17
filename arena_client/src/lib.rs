//! `arena_client`
//!
//! Headless client:
//! - Control channel handshake and notices
//! - Input sampling and `PlayerInput` generation
//! - World mirror rebuilt from spawn/batch/destroy packets

pub mod client;
pub mod input;
pub mod mirror;

pub use client::{ClientEvent, ConnectRejected, GameClient};
