//! Full socket-based integration tests for client ↔ server communication.

use std::time::Duration;

use arena_client::{input::InputState, ClientEvent, ConnectRejected, GameClient};
use arena_server::{bind_ephemeral, GameServer};
use arena_shared::{
    components::EntityKind,
    control::{ControlMessage, RejectReason},
    protocol::{Buttons, Packet, Payload, PlayerInput},
};
use arena_tests::{init_tracing, poll_until, wait_for};
use tokio::net::UdpSocket;

const WAIT: Duration = Duration::from_secs(3);

async fn join(server: &GameServer, name: &str) -> anyhow::Result<GameClient> {
    let mut client = GameClient::connect(server.tcp_addr(), name).await?;
    let id = client.player_id();
    poll_until(&mut client, WAIT, "own avatar", |c| c.mirror().player(id).is_some()).await?;
    Ok(client)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_joiner_sees_existing_world_before_own_avatar() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral(60).await?;

    let mut alice = join(&server, "alice").await?;
    assert_eq!(alice.player_id(), 1);
    let alice_avatar = alice.mirror().player(1).map(|e| e.network_id).unwrap();

    let mut bob = join(&server, "bob").await?;
    assert_eq!(bob.player_id(), 2);

    let bob_avatar = bob.mirror().player(2).unwrap();
    assert_eq!(bob_avatar.username, "bob");
    let log = bob.mirror().spawn_log();
    let alice_at = log.iter().position(|&id| id == alice_avatar);
    let own_at = log.iter().position(|&id| id == bob_avatar.network_id);
    assert!(alice_at.is_some(), "catch-up spawn missing: {log:?}");
    assert!(alice_at < own_at, "own avatar must come last: {log:?}");
    assert_eq!(bob.mirror().player(1).unwrap().username, "alice");

    // Existing players learn about the newcomer on both channels.
    poll_until(&mut alice, WAIT, "bob on alice's side", |c| {
        c.roster().get(&2).map(String::as_str) == Some("bob") && c.mirror().player(2).is_some()
    })
    .await?;

    bob.disconnect().await?;
    alice.disconnect().await?;
    server.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn input_moves_avatar_and_shooting_spawns_bullet() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral(60).await?;
    let mut client = join(&server, "mover").await?;
    let start_x = client.mirror().player(1).unwrap().position.x;

    for _ in 0..20 {
        client.send_input(InputState::moving(1, 0)).await?;
        client.poll_for(Duration::from_millis(15)).await?;
    }
    poll_until(&mut client, WAIT, "avatar moved right", |c| {
        c.mirror().player(1).is_some_and(|p| p.position.x > start_x + 10.0)
    })
    .await?;

    let fire = InputState {
        shoot: true,
        ..InputState::idle()
    };
    client.send_input(fire).await?;
    poll_until(&mut client, WAIT, "own bullet", |c| {
        c.mirror()
            .of_kind(EntityKind::PlayerBullet)
            .any(|b| b.owner_player == 1)
    })
    .await?;

    assert!(server.stats().inputs >= 21);
    client.disconnect().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn payload_player_id_is_ignored() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral(60).await?;
    let mut attacker = join(&server, "attacker").await?;
    let mut victim = join(&server, "victim").await?;
    let victim_start = victim.mirror().player(2).unwrap().position;

    let forged = PlayerInput {
        timestamp: 0,
        player_id: 2,
        buttons: Buttons::DOWN,
        move_x: 0,
        move_y: 1,
    };
    for _ in 0..20 {
        attacker.send_raw_input(forged).await?;
        attacker.poll_for(Duration::from_millis(15)).await?;
    }
    poll_until(&mut attacker, WAIT, "attacker moved down", |c| {
        c.mirror().player(1).is_some_and(|p| p.position.y > 310.0)
    })
    .await?;

    victim.poll_for(Duration::from_millis(200)).await?;
    assert_eq!(victim.mirror().player(2).unwrap().position, victim_start);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ping_is_answered_and_batches_flow() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral(60).await?;
    let mut client = join(&server, "pinger").await?;

    client.ping().await?;
    poll_until(&mut client, WAIT, "pong", |c| c.last_rtt().is_some()).await?;

    let before = client.mirror().batches_received();
    client.poll_for(Duration::from_secs(1)).await?;
    let batches = client.mirror().batches_received() - before;
    // One entity, 30 Hz broadcast.
    assert!((15..=40).contains(&batches), "batches in 1s: {batches}");
    assert!(server.stats().pings >= 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_rejections() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral(60).await?;

    let mut clients = Vec::new();
    for name in ["p1", "p2", "p3", "p4"] {
        clients.push(GameClient::connect(server.tcp_addr(), name).await?);
    }
    let ids: Vec<u8> = clients.iter().map(GameClient::player_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    let err = match GameClient::connect(server.tcp_addr(), "p5").await {
        Ok(_) => anyhow::bail!("fifth player admitted"),
        Err(e) => e,
    };
    assert_eq!(
        err.downcast_ref::<ConnectRejected>(),
        Some(&ConnectRejected(RejectReason::ServerFull))
    );

    // Freeing a slot hands out the lowest free id again.
    let second = clients.remove(1);
    second.disconnect().await?;
    wait_for(WAIT, "session closed", || async { server.session_count().await == 3 }).await?;

    let err = match GameClient::connect(server.tcp_addr(), "p1").await {
        Ok(_) => anyhow::bail!("duplicate username admitted"),
        Err(e) => e,
    };
    assert_eq!(
        err.downcast_ref::<ConnectRejected>(),
        Some(&ConnectRejected(RejectReason::AlreadyConnected))
    );

    let rejoin = GameClient::connect(server.tcp_addr(), "p2b").await?;
    assert_eq!(rejoin.player_id(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_destroys_avatar_for_others() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral(60).await?;
    let mut stayer = join(&server, "stayer").await?;
    let leaver = join(&server, "leaver").await?;
    poll_until(&mut stayer, WAIT, "leaver avatar", |c| c.mirror().player(2).is_some()).await?;
    let leaver_avatar = stayer.mirror().player(2).unwrap().network_id;

    leaver.disconnect().await?;

    let mut saw_leave = false;
    let mut saw_destroy = false;
    for event in stayer.poll_for(Duration::from_millis(500)).await? {
        match event {
            ClientEvent::Control(ControlMessage::PlayerLeave { player_id: 2 }) => saw_leave = true,
            ClientEvent::Packet(Payload::EntityDestroy { network_id }) if network_id == leaver_avatar => {
                saw_destroy = true;
            }
            _ => {}
        }
    }
    assert!(saw_leave, "no PLAYER_LEAVE");
    assert!(saw_destroy, "no ENTITY_DESTROY");
    assert!(stayer.mirror().player(2).is_none());
    assert!(!stayer.roster().contains_key(&2));
    assert_eq!(server.session_count().await, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stray_datagrams_are_counted_and_dropped() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral(60).await?;
    let raw = UdpSocket::bind("127.0.0.1:0").await?;

    raw.send_to(b"not a packet", server.udp_addr()).await?;
    let unknown = Packet::new(0xDEAD_BEEF, Payload::Ping).encode();
    raw.send_to(&unknown, server.udp_addr()).await?;

    wait_for(WAIT, "drop counters", || async {
        let stats = server.stats();
        stats.malformed >= 1 && stats.unauthenticated >= 1
    })
    .await?;

    let mut buf = [0u8; 64];
    let reply = tokio::time::timeout(Duration::from_millis(200), raw.recv_from(&mut buf)).await;
    assert!(reply.is_err(), "stray sender got a reply");
    Ok(())
}
