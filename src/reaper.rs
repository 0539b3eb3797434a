use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::observability;

/// Background task that auto-rejects pending bookings older than `ttl_ms`.
/// Only spawned when an approval deadline is configured.
pub async fn run_pending_expirer(engine: Arc<Engine>, ttl_ms: i64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let stale = engine.collect_stale_pending(now - ttl_ms);
        for id in stale {
            match engine
                .reject_booking(id, "system", Some("approval window elapsed".to_string()))
                .await
            {
                Ok(_) => {
                    metrics::counter!(observability::PENDING_EXPIRED_TOTAL).increment(1);
                    info!("expired pending booking {id}");
                }
                Err(e) => {
                    // May have been approved or cancelled since collection
                    tracing::debug!("expirer skip {id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
