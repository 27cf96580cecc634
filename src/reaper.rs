use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::Engine;

/// Background task that periodically expires overdue holds.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                engine.sweep_expired().await;
            }
            _ = shutdown.cancelled() => {
                info!("reaper stopped");
                return;
            }
        }
    }
}

/// Background task that compacts the ledger log once enough appends pile up.
pub async fn run_compactor(
    engine: Arc<Engine>,
    threshold: u64,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let appends = engine.wal_appends_since_compact().await;
                if appends < threshold {
                    continue;
                }
                match engine.compact_wal().await {
                    Ok(()) => info!("compacted ledger log after {appends} appends"),
                    Err(e) => tracing::error!("ledger log compaction failed: {e}"),
                }
            }
            _ = shutdown.cancelled() => return,
        }
    }
}
