//! `arena_server`
//!
//! Authoritative arena server:
//! - Fixed timestep simulation on its own thread
//! - Ordered gameplay systems over the entity registry
//! - Receives `PlayerInput` datagrams
//! - Sends spawn/destroy events and batched world state
//!
//! Networking model:
//! - TCP: handshake/control plane
//! - UDP: gameplay plane (inputs/world state)

pub mod replication;
pub mod server;
pub mod session;
pub mod simulation;
pub mod systems;
pub mod transport;
pub mod world;

pub use server::{bind_ephemeral, GameServer};
pub use simulation::{SimEvent, Simulation};
