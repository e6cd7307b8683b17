//! Server wiring.
//!
//! Binds both sockets, starts the simulation thread and the transport tasks,
//! and connects them with two bounded queues:
//!
//! ```text
//! transport tasks --SimEvent--> simulation thread --Datagram--> UDP send loop
//! ```
//!
//! Determinism notes:
//! - The simulation steps with a fixed `dt` regardless of wall-clock jitter.
//! - Per tick, only the latest input of each player applies.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::{bail, Context};
use arena_shared::{config::ServerConfig, net::ControlListener};
use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};
use tracing::info;

use crate::{
    simulation::{self, Simulation, SimulationHandle},
    transport::{udp_send_loop, StatsSnapshot, Transport},
};

/// Running game server. Dropping it stops every task and the simulation.
pub struct GameServer {
    cfg: ServerConfig,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
    transport: Transport,
    sim: SimulationHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl GameServer {
    /// Binds sockets and starts serving immediately.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let tcp_bind: SocketAddr = cfg.tcp_addr.parse().context("parse tcp_addr")?;
        let udp_bind: SocketAddr = cfg.udp_addr.parse().context("parse udp_addr")?;

        let listener = ControlListener::bind(tcp_bind).await?;
        let udp = Arc::new(UdpSocket::bind(udp_bind).await.context("udp bind")?);
        let tcp_addr = listener.local_addr()?;
        let udp_addr = udp.local_addr().context("udp local addr")?;

        let (event_tx, event_rx) = mpsc::channel(cfg.input_queue);
        let (out_tx, out_rx) = mpsc::channel(cfg.outbound_queue);
        let sim = simulation::spawn(
            Simulation::new(&cfg),
            event_rx,
            out_tx,
            cfg.tick_interval(),
        )
        .context("spawn simulation thread")?;

        let transport = Transport::new(cfg.max_players, event_tx, udp_addr.port());
        let tasks = vec![
            tokio::spawn(transport.clone().accept_loop(listener)),
            tokio::spawn(transport.clone().udp_recv_loop(Arc::clone(&udp))),
            tokio::spawn(udp_send_loop(udp, out_rx, transport.stats())),
        ];

        info!(
            %tcp_addr,
            %udp_addr,
            tick_hz = cfg.tick_hz,
            broadcast_hz = cfg.broadcast_hz,
            max_players = cfg.max_players,
            "Server listening"
        );
        Ok(Self {
            cfg,
            tcp_addr,
            udp_addr,
            transport,
            sim,
            tasks,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    /// Control channel address (after binding).
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Gameplay datagram address (after binding).
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.transport.stats().snapshot()
    }

    /// Simulation ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.sim.ticks()
    }

    pub async fn session_count(&self) -> usize {
        self.transport.session_count().await
    }

    /// Waits until the simulation has completed `ticks` more ticks.
    pub async fn run_for_ticks(&self, ticks: u64) -> anyhow::Result<()> {
        let target = self.sim.ticks() + ticks;
        while self.sim.ticks() < target {
            if !self.sim.is_running() {
                bail!("simulation stopped at tick {}", self.sim.ticks());
            }
            tokio::time::sleep(self.cfg.tick_interval()).await;
        }
        Ok(())
    }

    /// Stops the transport tasks and the simulation thread.
    pub fn shutdown(mut self) {
        self.stop();
        info!(ticks = self.sim.ticks(), stats = ?self.stats(), "Server stopped");
    }

    fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.sim.stop();
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Helper for tests: bind both sockets to ephemeral localhost ports.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<GameServer> {
    let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let cfg = ServerConfig {
        tcp_addr: local.to_string(),
        udp_addr: local.to_string(),
        tick_hz,
        ..Default::default()
    };
    GameServer::bind(cfg).await
}
