use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// One compaction check. Returns whether the WAL was rewritten.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!(tenant = engine.tenant(), appends, "WAL compacted");
            true
        }
        Err(e) => {
            error!(tenant = engine.tenant(), "WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CalendarCache;
    use crate::model::*;
    use crate::wal::Wal;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tablecap_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(path: PathBuf) -> Arc<Engine> {
        let cache = Arc::new(CalendarCache::new(Duration::from_secs(20)));
        Arc::new(Engine::new(path, "compactor", cache).unwrap())
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = engine(path.clone());
        let date = NaiveDate::from_ymd_opt(2026, 10, 24).unwrap();

        for limit in 1..=5 {
            engine.set_daily_limit(date, Ceiling::Booking, limit).await.unwrap();
        }
        assert!(!compact_if_due(&engine, 10).await);
        assert!(compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(
            replayed,
            vec![Event::DailyLimitSet { date, ceiling: Ceiling::Booking, limit: 5 }]
        );
    }
}
