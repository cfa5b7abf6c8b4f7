use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::observability;

/// Background task that cancels holds whose payment window has lapsed.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(engine.config().sweep_seconds));
    loop {
        interval.tick().await;
        let sweep_start = std::time::Instant::now();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        for id in engine.collect_expired_holds(now) {
            match engine.cancel_expired_hold(id, now).await {
                Ok(()) => info!("expired hold {id} cancelled"),
                Err(e) => {
                    // Usually paid or cancelled between scan and lock — fine
                    tracing::debug!("sweeper skip {id}: {e}");
                }
            }
        }
        metrics::histogram!(observability::SWEEP_DURATION_SECONDS)
            .record(sweep_start.elapsed().as_secs_f64());
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("WAL compacted after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
