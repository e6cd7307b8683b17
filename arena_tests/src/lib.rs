//! Helpers shared by the socket-level tests.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use anyhow::bail;
use arena_client::GameClient;

/// Installs a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Polls `client` until `pred` holds or `timeout` elapses.
pub async fn poll_until<F>(client: &mut GameClient, timeout: Duration, what: &str, pred: F) -> anyhow::Result<()>
where
    F: Fn(&GameClient) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if pred(client) {
            return Ok(());
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            bail!("timed out waiting for {what}");
        }
        client.poll(remaining.min(Duration::from_millis(20))).await?;
    }
}

/// Re-evaluates `check` every few milliseconds until it returns true.
pub async fn wait_for<F, Fut>(timeout: Duration, what: &str, mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while !check().await {
        if Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
