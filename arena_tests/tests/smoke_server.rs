use arena_server::{bind_ephemeral, GameServer};
use arena_shared::config::ServerConfig;

/// Smoke test: server can run a few ticks without panicking.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let server = bind_ephemeral(64).await?;
    server.run_for_ticks(3).await?;
    server.shutdown();
    Ok(())
}

/// A server started from JSON config keeps the overridden values.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_from_json_config() -> anyhow::Result<()> {
    let cfg = ServerConfig::from_json_str(
        r#"{
            "tcp_addr": "127.0.0.1:0",
            "udp_addr": "127.0.0.1:0",
            "tick_hz": 120,
            "max_players": 2,
            "game": { "rng_seed": 7 }
        }"#,
    )?;
    let server = GameServer::bind(cfg).await?;
    assert_eq!(server.config().max_players, 2);
    assert_eq!(server.config().game.rng_seed, Some(7));
    server.run_for_ticks(12).await?;
    assert_eq!(server.stats().datagrams_out, 0);
    Ok(())
}
