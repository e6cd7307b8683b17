//! Client implementation.
//!
//! The client maintains:
//! - A control stream (handshake, join/leave notices, disconnect)
//! - An unreliable datagram socket (inputs out; spawns, batches, destroys in)
//! - A [`WorldMirror`] rebuilt from server packets

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use arena_shared::{
    control::{ControlMessage, RejectReason},
    net::{ControlConn, UnreliableConn},
    protocol::{Packet, Payload, PlayerInput},
};
use tracing::{debug, info, warn};

use crate::{
    input::{build_input, timestamp_ms, InputState},
    mirror::WorldMirror,
};

/// Version string sent in `CONNECT`.
pub const CLIENT_VERSION: &str = "1";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// The server refused the `CONNECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection rejected: {0}")]
pub struct ConnectRejected(pub RejectReason);

/// Something the client received during [`GameClient::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A datagram, already applied to the mirror.
    Packet(Payload),
    Control(ControlMessage),
}

/// Headless game client.
pub struct GameClient {
    player_id: u8,
    token: u32,
    username: String,

    control: ControlConn,
    control_open: bool,
    udp: UnreliableConn,

    mirror: WorldMirror,
    /// Other players announced over the control channel since we joined.
    roster: BTreeMap<u8, String>,
    ping_sent: Option<Instant>,
    last_rtt: Option<Duration>,
    inputs_sent: u64,
    recv_errors: u64,
}

impl GameClient {
    /// Connects the control channel, performs the handshake and announces the
    /// UDP endpoint with a first `PING`.
    ///
    /// A refusal surfaces as a [`ConnectRejected`] inside the error.
    pub async fn connect(tcp_addr: SocketAddr, username: &str) -> anyhow::Result<Self> {
        info!(server = %tcp_addr, %username, "Connecting to server");

        let mut control = ControlConn::connect(tcp_addr).await?;
        control
            .send(&ControlMessage::Connect {
                username: username.to_string(),
                version: CLIENT_VERSION.to_string(),
            })
            .await?;

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        let (player_id, token, udp_port) = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                bail!("handshake timed out");
            }
            match control.recv_timeout(remaining).await? {
                Some(ControlMessage::ConnectOk {
                    player_id,
                    session_token,
                    udp_port,
                }) => break (player_id, session_token, udp_port),
                Some(ControlMessage::ConnectError { reason }) => {
                    return Err(ConnectRejected(reason).into());
                }
                Some(other) => debug!(?other, "Ignoring control message during handshake"),
                None => bail!("no handshake reply from server"),
            }
        };

        let bind_ip = match tcp_addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let udp_peer = SocketAddr::new(tcp_addr.ip(), udp_port);
        let udp = UnreliableConn::connect(SocketAddr::new(bind_ip, 0), udp_peer).await?;

        info!(player_id, udp = %udp_peer, "Connected to server");

        let mut client = Self {
            player_id,
            token,
            username: username.to_string(),
            control,
            control_open: true,
            udp,
            mirror: WorldMirror::new(),
            roster: BTreeMap::new(),
            ping_sent: None,
            last_rtt: None,
            inputs_sent: 0,
            recv_errors: 0,
        };
        client.ping().await?;
        Ok(client)
    }

    pub fn player_id(&self) -> u8 {
        self.player_id
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn mirror(&self) -> &WorldMirror {
        &self.mirror
    }

    pub fn roster(&self) -> &BTreeMap<u8, String> {
        &self.roster
    }

    /// Round-trip time of the last answered `PING`.
    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }

    pub fn inputs_sent(&self) -> u64 {
        self.inputs_sent
    }

    pub fn recv_errors(&self) -> u64 {
        self.recv_errors
    }

    /// Sends one frame of input, stamped with the wall clock.
    pub async fn send_input(&mut self, input: InputState) -> anyhow::Result<PlayerInput> {
        let payload = build_input(self.player_id, timestamp_ms(), input);
        self.send_raw_input(payload).await?;
        Ok(payload)
    }

    /// Sends an already built input payload as-is.
    pub async fn send_raw_input(&mut self, input: PlayerInput) -> anyhow::Result<()> {
        self.udp
            .send(&Packet::new(self.token, Payload::PlayerInput(input)))
            .await?;
        self.inputs_sent += 1;
        Ok(())
    }

    pub async fn ping(&mut self) -> anyhow::Result<()> {
        self.udp.send(&Packet::new(self.token, Payload::Ping)).await?;
        self.ping_sent = Some(Instant::now());
        Ok(())
    }

    /// Waits up to `timeout` for one datagram or control message and applies
    /// it. `Ok(None)` on timeout or an undecodable datagram.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<Option<ClientEvent>> {
        tokio::select! {
            msg = self.control.recv(), if self.control_open => match msg? {
                Some(msg) => {
                    self.apply_control(&msg);
                    Ok(Some(ClientEvent::Control(msg)))
                }
                None => {
                    self.control_open = false;
                    bail!("server closed the control channel")
                }
            },
            packet = self.udp.recv_timeout(timeout) => match packet {
                Ok(Some(packet)) => {
                    self.apply_packet(&packet);
                    Ok(Some(ClientEvent::Packet(packet.payload)))
                }
                Ok(None) => Ok(None),
                Err(e) => {
                    self.recv_errors += 1;
                    debug!(error = %e, "Dropping datagram");
                    Ok(None)
                }
            },
        }
    }

    /// Polls until `window` elapses, returning everything received.
    pub async fn poll_for(&mut self, window: Duration) -> anyhow::Result<Vec<ClientEvent>> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(events);
            }
            if let Some(event) = self.poll(remaining).await? {
                events.push(event);
            }
        }
    }

    fn apply_packet(&mut self, packet: &Packet) {
        match &packet.payload {
            Payload::Pong => {
                if let Some(sent) = self.ping_sent.take() {
                    self.last_rtt = Some(sent.elapsed());
                }
            }
            payload => {
                if !self.mirror.apply(payload) {
                    debug!(msg_type = ?payload.message_type(), "Unexpected datagram");
                }
            }
        }
    }

    fn apply_control(&mut self, msg: &ControlMessage) {
        match msg {
            ControlMessage::PlayerJoin {
                player_id,
                username,
            } => {
                info!(player_id, %username, "Player joined");
                self.roster.insert(*player_id, username.clone());
            }
            ControlMessage::PlayerLeave { player_id } => {
                info!(player_id, "Player left");
                self.roster.remove(player_id);
            }
            other => debug!(?other, "Unhandled control message"),
        }
    }

    /// Sends `DISCONNECT` and waits for the acknowledgement.
    pub async fn disconnect(mut self) -> anyhow::Result<()> {
        if !self.control_open {
            return Ok(());
        }
        self.control.send(&ControlMessage::Disconnect).await?;

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(player_id = self.player_id, "No DISCONNECT_OK before timeout");
                return Ok(());
            }
            match self
                .control
                .recv_timeout(remaining)
                .await
                .context("wait for DISCONNECT_OK")?
            {
                Some(ControlMessage::DisconnectOk) | None => {
                    info!(player_id = self.player_id, "Disconnected");
                    return Ok(());
                }
                Some(other) => self.apply_control(&other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_survives_anyhow_and_reads_like_the_wire_reason() {
        let err: anyhow::Error = ConnectRejected(RejectReason::ServerFull).into();
        assert_eq!(err.to_string(), "connection rejected: server_full");
        assert_eq!(
            err.downcast_ref::<ConnectRejected>(),
            Some(&ConnectRejected(RejectReason::ServerFull))
        );
    }
}
