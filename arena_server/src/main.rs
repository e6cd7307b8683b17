//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arena_server -- [--config server.json] [--tcp 0.0.0.0:4242]
//!       [--udp 0.0.0.0:4243] [--tick-hz 60] [--broadcast-hz 30] [--seed 7]
//!
//! Flags override values loaded from `--config`. Logging follows `RUST_LOG`
//! (default `info`); set `LOG_FORMAT=json` for JSON lines.

use std::{env, path::Path};

use anyhow::Context;
use arena_server::GameServer;
use arena_shared::config::ServerConfig;
use tracing::info;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ServerConfig::from_file(Path::new(&args[i + 1]))?,
        _ => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config", Some(_)) => {}
            ("--tcp", Some(v)) => cfg.tcp_addr = v.clone(),
            ("--udp", Some(v)) => cfg.udp_addr = v.clone(),
            ("--tick-hz", Some(v)) => cfg.tick_hz = v.parse().context("--tick-hz")?,
            ("--broadcast-hz", Some(v)) => {
                cfg.broadcast_hz = v.parse().context("--broadcast-hz")?;
            }
            ("--seed", Some(v)) => cfg.game.rng_seed = Some(v.parse().context("--seed")?),
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = parse_args()?;
    info!(tcp = %cfg.tcp_addr, udp = %cfg.udp_addr, tick_hz = cfg.tick_hz, "Starting server");

    let server = GameServer::bind(cfg).await.context("start server")?;

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("Shutdown requested");
    server.shutdown();
    Ok(())
}
