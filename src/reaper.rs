use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic housekeeping: drop exception dates that have passed and notify
/// channels nobody listens to. The first tick fires at once, so a freshly
/// loaded restaurant is pruned immediately.
pub async fn run_maintenance(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    loop {
        interval.tick().await;
        maintain(&engine).await;
    }
}

async fn maintain(engine: &Engine) {
    match engine.prune_past_exceptions(engine.today()).await {
        Ok(0) => {}
        Ok(n) => info!("pruned {n} past exception dates"),
        Err(e) => tracing::warn!("exception pruning failed: {e}"),
    }
    engine.notify.prune_idle();
}

/// Rewrite the WAL once enough appends have piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}
