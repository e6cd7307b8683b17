//! Session/transport bridge.
//!
//! Three kinds of tokio tasks live here:
//! - the TCP accept loop, spawning one handshake task per control connection,
//! - the UDP receive loop (validate, authenticate by token, dispatch),
//! - the UDP send loop draining the simulation's outbound queue.
//!
//! They share the [`SessionTable`] among themselves and reach the simulation
//! only through the [`SimEvent`] queue. Lifecycle events for a session are
//! queued while the table lock is held, so the simulation always sees them in
//! the same order as the table changed.

use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::bail;
use arena_shared::{
    control::{ControlMessage, RejectReason},
    net::{ControlConn, ControlListener, ControlReader, ControlWriter},
    protocol::{validate_packet, Packet, Payload, MAX_PACKET_SIZE},
};
use async_trait::async_trait;
use tokio::{
    net::UdpSocket,
    sync::{broadcast, mpsc, Mutex},
};
use tracing::{debug, info, warn};

use crate::{
    replication::Datagram,
    session::{EndpointUpdate, Session, SessionTable},
    simulation::SimEvent,
};

/// Transport counters. Cheap to bump from any task.
#[derive(Debug, Default)]
pub struct TransportStats {
    pub datagrams_in: AtomicU64,
    pub malformed: AtomicU64,
    pub unauthenticated: AtomicU64,
    pub inputs: AtomicU64,
    pub inputs_dropped: AtomicU64,
    pub pings: AtomicU64,
    pub unexpected: AtomicU64,
    pub datagrams_out: AtomicU64,
    pub send_failures: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub datagrams_in: u64,
    pub malformed: u64,
    pub unauthenticated: u64,
    pub inputs: u64,
    pub inputs_dropped: u64,
    pub pings: u64,
    pub unexpected: u64,
    pub datagrams_out: u64,
    pub send_failures: u64,
}

impl TransportStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            datagrams_in: get(&self.datagrams_in),
            malformed: get(&self.malformed),
            unauthenticated: get(&self.unauthenticated),
            inputs: get(&self.inputs),
            inputs_dropped: get(&self.inputs_dropped),
            pings: get(&self.pings),
            unexpected: get(&self.unexpected),
            datagrams_out: get(&self.datagrams_out),
            send_failures: get(&self.send_failures),
        }
    }
}

/// Anything that can deliver a datagram to an address.
#[async_trait]
pub trait DatagramSink: Send + Sync {
    async fn send_datagram(&self, bytes: &[u8], to: SocketAddr) -> io::Result<usize>;
}

#[async_trait]
impl DatagramSink for UdpSocket {
    async fn send_datagram(&self, bytes: &[u8], to: SocketAddr) -> io::Result<usize> {
        self.send_to(bytes, to).await
    }
}

/// Control-channel notice fanned out to every other session.
#[derive(Debug, Clone)]
struct ControlNotice {
    about: u8,
    msg: ControlMessage,
}

/// State shared by all transport tasks.
#[derive(Clone)]
pub struct Transport {
    sessions: Arc<Mutex<SessionTable>>,
    events: mpsc::Sender<SimEvent>,
    notices: broadcast::Sender<ControlNotice>,
    stats: Arc<TransportStats>,
    udp_port: u16,
}

impl Transport {
    pub fn new(max_players: u8, events: mpsc::Sender<SimEvent>, udp_port: u16) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            sessions: Arc::new(Mutex::new(SessionTable::new(max_players))),
            events,
            notices,
            stats: Arc::new(TransportStats::default()),
            udp_port,
        }
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Accepts control connections forever, one task per connection.
    pub async fn accept_loop(self, listener: ControlListener) {
        loop {
            match listener.accept().await {
                Ok((conn, peer)) => {
                    debug!(%peer, "Control connection accepted");
                    let transport = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = transport.handle_control(conn).await {
                            debug!(%peer, error = %e, "Control connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Control accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn handle_control(&self, conn: ControlConn) -> anyhow::Result<()> {
        let peer = conn.peer_addr();
        let (mut reader, mut writer) = conn.into_split();

        let Some((session, notices)) = self.handshake(&mut reader, &mut writer).await? else {
            return Ok(());
        };
        info!(
            %peer,
            player_id = session.player_id,
            username = %session.username,
            "Player connected"
        );

        let result = self
            .serve_session(&session, &mut reader, &mut writer, notices)
            .await;
        self.close_session(&session).await;
        info!(%peer, player_id = session.player_id, "Player disconnected");
        result
    }

    /// Waits for a successful `CONNECT`. `None` if the peer left first.
    async fn handshake(
        &self,
        reader: &mut ControlReader,
        writer: &mut ControlWriter,
    ) -> anyhow::Result<Option<(Session, broadcast::Receiver<ControlNotice>)>> {
        loop {
            let Some(msg) = reader.recv().await? else {
                return Ok(None);
            };
            match msg {
                ControlMessage::Connect { username, version } => {
                    let mut table = self.sessions.lock().await;
                    let opened = table.open(&username, &mut rand::thread_rng());
                    let session = match opened {
                        Ok(session) => session,
                        Err(reason) => {
                            drop(table);
                            debug!(%username, %reason, "Connect rejected");
                            writer.send(&ControlMessage::ConnectError { reason }).await?;
                            continue;
                        }
                    };
                    debug!(%username, %version, player_id = session.player_id, "Connect accepted");
                    let notices = self.notices.subscribe();
                    let connected = SimEvent::PlayerConnected {
                        player_id: session.player_id,
                        username: session.username.clone(),
                    };
                    if self.events.send(connected).await.is_err() {
                        table.close(session.token);
                        bail!("simulation event queue closed");
                    }
                    let _ = self.notices.send(ControlNotice {
                        about: session.player_id,
                        msg: ControlMessage::PlayerJoin {
                            player_id: session.player_id,
                            username: session.username.clone(),
                        },
                    });
                    drop(table);

                    let ok = ControlMessage::ConnectOk {
                        player_id: session.player_id,
                        session_token: session.token,
                        udp_port: self.udp_port,
                    };
                    if let Err(e) = writer.send(&ok).await {
                        self.close_session(&session).await;
                        return Err(e);
                    }
                    return Ok(Some((session, notices)));
                }
                ControlMessage::Disconnect => {
                    writer.send(&ControlMessage::DisconnectOk).await?;
                    return Ok(None);
                }
                other => debug!(?other, "Unexpected control message before CONNECT"),
            }
        }
    }

    /// Relays notices until the session ends by `DISCONNECT` or EOF.
    async fn serve_session(
        &self,
        session: &Session,
        reader: &mut ControlReader,
        writer: &mut ControlWriter,
        mut notices: broadcast::Receiver<ControlNotice>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                msg = reader.recv() => match msg? {
                    Some(ControlMessage::Disconnect) => {
                        writer.send(&ControlMessage::DisconnectOk).await?;
                        return Ok(());
                    }
                    Some(ControlMessage::Connect { .. }) => {
                        let reason = RejectReason::AlreadyConnected;
                        writer.send(&ControlMessage::ConnectError { reason }).await?;
                    }
                    Some(other) => debug!(player_id = session.player_id, ?other, "Unexpected control message"),
                    None => return Ok(()),
                },
                notice = notices.recv() => match notice {
                    Ok(n) if n.about != session.player_id => writer.send(&n.msg).await?,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(player_id = session.player_id, skipped, "Control notices lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    async fn close_session(&self, session: &Session) {
        let mut table = self.sessions.lock().await;
        if table.close(session.token).is_none() {
            return;
        }
        let event = SimEvent::PlayerDisconnected {
            player_id: session.player_id,
        };
        if self.events.send(event).await.is_err() {
            warn!(player_id = session.player_id, "Simulation gone; disconnect not delivered");
        }
        let _ = self.notices.send(ControlNotice {
            about: session.player_id,
            msg: ControlMessage::PlayerLeave {
                player_id: session.player_id,
            },
        });
    }

    /// Receives, authenticates and dispatches datagrams forever.
    pub async fn udp_recv_loop(self, socket: Arc<UdpSocket>) {
        // One spare byte so oversize datagrams fail the size check.
        let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "UDP receive error");
                    continue;
                }
            };
            TransportStats::bump(&self.stats.datagrams_in);
            if let Some(reply) = self.on_datagram(&buf[..n], from).await {
                if let Err(e) = socket.send_to(&reply, from).await {
                    TransportStats::bump(&self.stats.send_failures);
                    warn!(%from, error = %e, "UDP reply failed");
                }
            }
        }
    }

    /// Handles one datagram; returns an immediate reply, if any.
    async fn on_datagram(&self, raw: &[u8], from: SocketAddr) -> Option<bytes::Bytes> {
        let header = match validate_packet(raw) {
            Ok(h) => h,
            Err(e) => {
                TransportStats::bump(&self.stats.malformed);
                debug!(%from, error = %e, "Malformed datagram dropped");
                return None;
            }
        };
        let token = header.session_token;

        let mut table = self.sessions.lock().await;
        let Some((player_id, update)) = table.touch(token, from) else {
            TransportStats::bump(&self.stats.unauthenticated);
            debug!(%from, token, "Unknown session token");
            return None;
        };
        let lifecycle = match update {
            EndpointUpdate::Established => Some(SimEvent::PlayerUdpReady {
                player_id,
                endpoint: from,
            }),
            EndpointUpdate::Moved => Some(SimEvent::EndpointChanged {
                player_id,
                endpoint: from,
            }),
            EndpointUpdate::Unchanged => None,
        };
        if let Some(event) = lifecycle {
            if self.events.send(event).await.is_err() {
                warn!(player_id, "Simulation gone; endpoint update not delivered");
            }
        }

        let packet = match Packet::decode(raw) {
            Ok(p) => p,
            Err(e) => {
                TransportStats::bump(&self.stats.malformed);
                debug!(%from, player_id, error = %e, "Malformed payload dropped");
                return None;
            }
        };
        match packet.payload {
            Payload::PlayerInput(input) => {
                // Authority comes from the session, never from the payload.
                let event = SimEvent::Input { player_id, input };
                match self.events.try_send(event) {
                    Ok(()) => TransportStats::bump(&self.stats.inputs),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        TransportStats::bump(&self.stats.inputs_dropped);
                        debug!(player_id, "Event queue full; input dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        warn!(player_id, "Simulation gone; input dropped");
                    }
                }
                None
            }
            Payload::Ping => {
                drop(table);
                TransportStats::bump(&self.stats.pings);
                Some(Packet::new(token, Payload::Pong).encode())
            }
            other => {
                TransportStats::bump(&self.stats.unexpected);
                debug!(player_id, msg_type = ?other.message_type(), "Unexpected datagram type");
                None
            }
        }
    }
}

/// Drains the outbound queue into `sink` until the queue closes.
///
/// Failures are counted and logged; nothing is retried.
pub async fn udp_send_loop<S>(
    sink: Arc<S>,
    mut outbound: mpsc::Receiver<Datagram>,
    stats: Arc<TransportStats>,
) where
    S: DatagramSink + ?Sized,
{
    while let Some(datagram) = outbound.recv().await {
        match sink.send_datagram(&datagram.bytes, datagram.to).await {
            Ok(_) => TransportStats::bump(&stats.datagrams_out),
            Err(e) => {
                TransportStats::bump(&stats.send_failures);
                warn!(to = %datagram.to, error = %e, "UDP send failed");
            }
        }
    }
    debug!("Outbound queue closed");
}
