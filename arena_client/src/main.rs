//! Standalone client binary: a bot that strafes up and down and fires.
//!
//! Usage:
//!   cargo run -p arena_client -- [--server 127.0.0.1:4242] [--name Bot] [--input-hz 60]
//!
//! Ctrl-C disconnects cleanly.

use std::{env, net::SocketAddr, time::Duration};

use anyhow::Context;
use arena_client::{input::InputState, GameClient};
use arena_shared::config::ClientConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<ClientConfig> {
    let mut cfg = ClientConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.username = args[i + 1].clone();
                i += 2;
            }
            "--input-hz" if i + 1 < args.len() => {
                cfg.input_hz = args[i + 1].parse().context("--input-hz")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    anyhow::ensure!(cfg.input_hz > 0, "--input-hz must be positive");
    Ok(cfg)
}

/// Bot steering: sweep vertically, reversing every two seconds, and keep the
/// trigger held.
fn bot_input(frame: u64, input_hz: u32) -> InputState {
    let half_period = u64::from(input_hz) * 2;
    let dir = if (frame / half_period) % 2 == 0 { 1 } else { -1 };
    InputState {
        move_y: dir,
        shoot: true,
        ..InputState::idle()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    let server: SocketAddr = cfg.server_addr.parse().context("parse --server")?;
    info!(%server, username = %cfg.username, "Starting client");

    let mut client = GameClient::connect(server, &cfg.username)
        .await
        .context("connect")?;

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(cfg.input_hz)));
    let mut frame: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        client.send_input(bot_input(frame, cfg.input_hz)).await?;
        // Drain whatever arrived since the last frame.
        while client.poll(Duration::from_millis(1)).await?.is_some() {}

        if frame % u64::from(cfg.input_hz * 5) == 0 {
            client.ping().await?;
            info!(
                frame,
                entities = client.mirror().len(),
                batches = client.mirror().batches_received(),
                rtt_ms = client.last_rtt().map(|d| d.as_secs_f64() * 1000.0),
                "Status"
            );
        }
        frame += 1;
    }

    info!("Disconnecting");
    client.disconnect().await
}
