//! `arena_shared`
//!
//! Libraries used by both client and server.
//!
//! Design goals:
//! - Bit-exact wire format, independent of any socket code.
//! - Entity registry with per-type sparse storage.
//! - Clear separation of concerns (ecs, components, protocol, control, net).
//! - No `unsafe`.

pub mod components;
pub mod config;
pub mod control;
pub mod ecs;
pub mod math;
pub mod net;
pub mod protocol;

