//! Hub client demo.
//!
//! Drives a `ConnectionManager` over the loopback transport the way a game
//! loop would: drain inbound buffers and enqueue outbound updates once per
//! tick, survive a dropped connection, then shut down.
//!
//! Usage: `hublink-demo [options.toml]`

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use hublink_connection::{ClientOptions, ConnectionManager, HubError, LoopbackTransport};

const DEFAULT_ENDPOINT: &str = "http://localhost:5000/hubs/game";
const TICK: Duration = Duration::from_millis(500);
const TICKS: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CountUpdate {
    count: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting hub client demo");

    let options = match std::env::args().nth(1) {
        Some(path) => ClientOptions::load(&path)?,
        None => ClientOptions::new(DEFAULT_ENDPOINT)?,
    };
    tracing::info!(
        endpoint = %options.endpoint(),
        backoff_min_ms = options.backoff_min().as_millis() as u64,
        backoff_max_ms = options.backoff_max().as_millis() as u64,
        "options loaded"
    );

    let transport = Arc::new(LoopbackTransport::new());
    let manager = ConnectionManager::new(options, transport.clone())?;
    let cancel = CancellationToken::new();

    manager.register_handler("Notify", |message: String| {
        tracing::info!(%message, "notification");
    });
    let mut counts = manager.register_buffered::<CountUpdate>("CountUpdated");
    let updates = manager.create_outgoing_queue::<CountUpdate>("UpdateCount");

    manager.ensure_started(&cancel).await?;

    let mut local = 0;
    for tick in 1..=TICKS {
        // Stand-in for the remote hub pushing to us.
        transport.push("CountUpdated", json!({ "count": tick * 10 }));
        if tick == 1 {
            transport.push("Notify", json!("welcome"));
        }
        if tick == 3 {
            transport.close(Some(HubError::transport("simulated network drop")));
        }

        for update in counts.drain() {
            tracing::info!(tick, count = update.count, "count update");
        }

        local += 1;
        updates.enqueue(CountUpdate { count: local });

        tokio::time::sleep(TICK).await;
        tracing::info!(tick, state = %manager.state(), pending = updates.pending(), "tick");
    }

    manager.stop(&cancel).await?;
    manager.dispose().await;

    tracing::info!(
        sent = transport.sent().len(),
        attempts = transport.send_attempts(),
        connects = transport.connect_calls(),
        "demo finished"
    );
    Ok(())
}
