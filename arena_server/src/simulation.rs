//! Fixed-step simulation.
//!
//! The [`Simulation`] owns the world exclusively. Transport tasks talk to it
//! only through a bounded [`SimEvent`] queue, and it answers only with
//! encoded [`Datagram`]s. It runs on its own OS thread (see [`spawn`]) so a
//! slow tick never stalls socket I/O and vice versa.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use arena_shared::{
    components::NetworkId,
    config::{GameTuning, ServerConfig},
    protocol::{Payload, PlayerInput},
};
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
};
use tracing::{debug, info, warn};

use crate::{
    replication::{Datagram, Outbox},
    systems::{
        broadcast_system, collision_system, destruction_system, enemy_spawner_system,
        input_system, lifetime_system, movement_system, DestroyQueue, EnemySpawner,
    },
    world::GameWorld,
};

/// Slack when comparing the broadcast accumulator against its period.
const BROADCAST_EPSILON: f32 = 1e-6;

/// Everything the transport can tell the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    PlayerConnected { player_id: u8, username: String },
    /// First authenticated datagram from this player.
    PlayerUdpReady { player_id: u8, endpoint: SocketAddr },
    /// The player's datagrams now come from a different address.
    EndpointChanged { player_id: u8, endpoint: SocketAddr },
    PlayerDisconnected { player_id: u8 },
    /// `player_id` is the session's, never the payload's.
    Input { player_id: u8, input: PlayerInput },
}

pub struct Simulation {
    world: GameWorld,
    tuning: GameTuning,
    rng: StdRng,
    spawner: EnemySpawner,
    destroy_queue: DestroyQueue,
    outbox: Outbox,
    broadcast_period: f32,
    broadcast_accum: f32,
    /// Simulation time in seconds.
    clock: f64,
    tick: u64,
}

impl Simulation {
    pub fn new(cfg: &ServerConfig) -> Self {
        let tuning = cfg.game.clone();
        let rng = match tuning.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            world: GameWorld::new(),
            spawner: EnemySpawner::new(&tuning),
            tuning,
            rng,
            destroy_queue: DestroyQueue::default(),
            outbox: Outbox::default(),
            broadcast_period: cfg.broadcast_period(),
            broadcast_accum: 0.0,
            clock: 0.0,
            tick: 0,
        }
    }

    pub fn world(&self) -> &GameWorld {
        &self.world
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Applies a transport event. Any packets it produces go out with the
    /// next [`Simulation::tick`].
    pub fn handle_event(&mut self, event: SimEvent) {
        match event {
            SimEvent::PlayerConnected {
                player_id,
                username,
            } => self.on_player_connected(player_id, username),
            SimEvent::PlayerUdpReady {
                player_id,
                endpoint,
            } => self.on_player_udp_ready(player_id, endpoint),
            SimEvent::EndpointChanged {
                player_id,
                endpoint,
            } => {
                if let Some(slot) = self.world.players.get_mut(&player_id) {
                    slot.endpoint = Some(endpoint);
                    debug!(player_id, %endpoint, "Player endpoint changed");
                }
            }
            SimEvent::PlayerDisconnected { player_id } => self.on_player_disconnected(player_id),
            SimEvent::Input { player_id, input } => match self.world.players.get_mut(&player_id) {
                Some(slot) => slot.pending_input = Some(input),
                None => debug!(player_id, "Input for unknown player; dropped"),
            },
        }
    }

    fn on_player_connected(&mut self, player_id: u8, username: String) {
        if let Some(stale) = self.world.player_entity(player_id) {
            self.destroy_queue.push(stale);
            destruction_system(&mut self.world, &mut self.destroy_queue, &mut self.outbox);
        }
        let avatar = self.world.spawn_player(player_id, username, &self.tuning);
        let network_id = self.world.registry.get::<NetworkId>(avatar).map(|id| id.0);
        info!(player_id, ?avatar, ?network_id, "Player spawned");
    }

    fn on_player_udp_ready(&mut self, player_id: u8, endpoint: SocketAddr) {
        let Some(slot) = self.world.players.get_mut(&player_id) else {
            debug!(player_id, "UDP ready for unknown player; ignored");
            return;
        };
        slot.endpoint = Some(endpoint);
        let own = slot.entity;

        // Catch the newcomer up on everything else first.
        let mut caught_up = 0usize;
        for (_, e) in self.world.networked() {
            if Some(e) == own {
                continue;
            }
            if let Some(spawn) = self.world.spawn_message(e) {
                self.outbox.send(endpoint, Payload::EntitySpawn(spawn));
                caught_up += 1;
            }
        }

        if let Some(spawn) = own.and_then(|e| self.world.spawn_message(e)) {
            let endpoints = self.world.endpoints();
            self.outbox.broadcast(&endpoints, Payload::EntitySpawn(spawn));
        }
        info!(player_id, %endpoint, caught_up, "Player UDP ready");
    }

    fn on_player_disconnected(&mut self, player_id: u8) {
        let Some(slot) = self.world.players.remove(&player_id) else {
            debug!(player_id, "Disconnect for unknown player; ignored");
            return;
        };
        if let Some(avatar) = slot.entity {
            self.destroy_queue.push(avatar);
            destruction_system(&mut self.world, &mut self.destroy_queue, &mut self.outbox);
        }
        info!(player_id, username = %slot.username, "Player removed");
    }

    /// Runs every system once and returns the packets to send.
    pub fn tick(&mut self, dt: f32) -> Vec<Datagram> {
        self.clock += f64::from(dt);
        self.tick += 1;

        input_system(&mut self.world, &self.tuning, self.clock, &mut self.outbox);
        enemy_spawner_system(
            &mut self.world,
            &mut self.spawner,
            &mut self.rng,
            &self.tuning,
            dt,
            &mut self.outbox,
        );
        movement_system(&mut self.world, &self.tuning, dt);
        lifetime_system(&mut self.world, dt, &mut self.destroy_queue);
        collision_system(&mut self.world, &self.tuning, &mut self.destroy_queue);
        destruction_system(&mut self.world, &mut self.destroy_queue, &mut self.outbox);

        self.broadcast_accum += dt;
        if self.broadcast_accum + BROADCAST_EPSILON >= self.broadcast_period {
            self.broadcast_accum -= self.broadcast_period;
            if self.broadcast_accum >= self.broadcast_period {
                // Broadcasting slower than requested; don't build a backlog.
                self.broadcast_accum = 0.0;
            }
            broadcast_system(&self.world, &mut self.outbox);
        }

        self.outbox.drain()
    }
}

/// Control handle for a simulation thread.
pub struct SimulationHandle {
    shutdown: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    join: Option<thread::JoinHandle<()>>,
}

impl SimulationHandle {
    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Signals the thread to stop and waits for it.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Simulation thread panicked");
            }
        }
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs `sim` on a dedicated thread at a fixed step of `tick_interval`.
///
/// Each tick drains `events` without blocking, steps the world, and hands the
/// resulting datagrams to `outbound`. A full outbound queue drops datagrams.
/// The thread exits on [`SimulationHandle::stop`] or when either channel
/// closes.
pub fn spawn(
    mut sim: Simulation,
    mut events: mpsc::Receiver<SimEvent>,
    outbound: mpsc::Sender<Datagram>,
    tick_interval: Duration,
) -> anyhow::Result<SimulationHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let ticks = Arc::new(AtomicU64::new(0));
    let thread_shutdown = Arc::clone(&shutdown);
    let thread_ticks = Arc::clone(&ticks);
    let dt = tick_interval.as_secs_f32();

    let join = thread::Builder::new()
        .name("simulation".into())
        .spawn(move || {
            info!(tick_hz = 1.0 / dt, "Simulation thread started");
            let mut next = Instant::now();
            'run: while !thread_shutdown.load(Ordering::Acquire) {
                loop {
                    match events.try_recv() {
                        Ok(event) => sim.handle_event(event),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => break 'run,
                    }
                }

                let mut dropped = 0usize;
                for datagram in sim.tick(dt) {
                    match outbound.try_send(datagram) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => dropped += 1,
                        Err(TrySendError::Closed(_)) => break 'run,
                    }
                }
                if dropped > 0 {
                    warn!(dropped, tick = sim.tick_count(), "Outbound queue full; datagrams dropped");
                }
                thread_ticks.store(sim.tick_count(), Ordering::Release);

                next += tick_interval;
                let now = Instant::now();
                match next.checked_duration_since(now) {
                    Some(wait) => thread::sleep(wait),
                    // Fell behind; resync instead of bursting to catch up.
                    None => next = now,
                }
            }
            info!(ticks = sim.tick_count(), "Simulation thread stopped");
        })?;

    Ok(SimulationHandle {
        shutdown,
        ticks,
        join: Some(join),
    })
}
