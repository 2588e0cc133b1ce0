//! Retention pruning
//!
//! Storage growth is bounded by an explicit pruning task the host spawns;
//! watchers never trigger retention themselves. Pruning deletes oldest
//! entries first and leaves the sequence counter untouched.

use super::EntryStore;
use crate::config::RetentionConfig;
use crate::error::CoreError;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::time;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PruneStats {
    pub removed_by_count: u64,
    pub removed_by_age: u64,
}

impl PruneStats {
    pub fn total(&self) -> u64 {
        self.removed_by_count + self.removed_by_age
    }
}

/// Spawn the periodic pruning task.
pub fn spawn_prune_task(
    store: Arc<EntryStore>,
    config: RetentionConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        prune_loop(store, config).await;
    })
}

async fn prune_loop(store: Arc<EntryStore>, config: RetentionConfig) {
    let mut interval = time::interval(config.check_interval());
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        match run_prune_now(&store, &config).await {
            Ok(stats) if stats.total() > 0 => {
                tracing::info!(
                    removed_by_count = stats.removed_by_count,
                    removed_by_age = stats.removed_by_age,
                    "Pruned telemetry entries"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Telemetry pruning failed");
            }
        }
    }
}

/// Run one pruning pass immediately.
pub async fn run_prune_now(
    store: &EntryStore,
    config: &RetentionConfig,
) -> Result<PruneStats, CoreError> {
    let mut stats = PruneStats::default();

    if let Some(max_entries) = config.max_entries {
        stats.removed_by_count = prune_over_count(store, max_entries).await?;
    }

    if let Some(max_age_hours) = config.max_age_hours {
        let cutoff = Utc::now().timestamp_millis() - (max_age_hours as i64) * 3_600_000;
        stats.removed_by_age = prune_older_than(store, cutoff).await?;
    }

    if stats.total() > 0 {
        crate::metrics::record_pruned(stats.total());
    }

    Ok(stats)
}

async fn prune_over_count(store: &EntryStore, max_entries: u64) -> Result<u64, CoreError> {
    let mut tx = store.pool().begin().await.map_err(CoreError::from)?;

    sqlx::query(
        "DELETE FROM telemetry_tags WHERE sequence IN \
         (SELECT sequence FROM telemetry_entries ORDER BY sequence DESC LIMIT -1 OFFSET ?)",
    )
    .bind(max_entries as i64)
    .execute(&mut *tx)
    .await
    .map_err(CoreError::from)?;

    let result = sqlx::query(
        "DELETE FROM telemetry_entries WHERE sequence IN \
         (SELECT sequence FROM telemetry_entries ORDER BY sequence DESC LIMIT -1 OFFSET ?)",
    )
    .bind(max_entries as i64)
    .execute(&mut *tx)
    .await
    .map_err(CoreError::from)?;

    tx.commit().await.map_err(CoreError::from)?;
    Ok(result.rows_affected())
}

async fn prune_older_than(store: &EntryStore, cutoff_millis: i64) -> Result<u64, CoreError> {
    let mut tx = store.pool().begin().await.map_err(CoreError::from)?;

    sqlx::query(
        "DELETE FROM telemetry_tags WHERE sequence IN \
         (SELECT sequence FROM telemetry_entries WHERE created_at < ?)",
    )
    .bind(cutoff_millis)
    .execute(&mut *tx)
    .await
    .map_err(CoreError::from)?;

    let result = sqlx::query("DELETE FROM telemetry_entries WHERE created_at < ?")
        .bind(cutoff_millis)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::from)?;

    tx.commit().await.map_err(CoreError::from)?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryKind, NewEntry};
    use serde_json::json;

    #[tokio::test]
    async fn test_prune_over_count_keeps_newest() {
        let store = EntryStore::in_memory().await.unwrap();

        for i in 0..10 {
            store
                .append(NewEntry::new(EntryKind::Query, json!({"n": i})))
                .await
                .unwrap();
        }

        let config = RetentionConfig {
            max_entries: Some(4),
            max_age_hours: None,
            check_interval_secs: 300,
        };
        let stats = run_prune_now(&store, &config).await.unwrap();
        assert_eq!(stats.removed_by_count, 6);

        let page = store
            .get_entries_with_cursor(
                None,
                crate::store::Direction::Forward,
                50,
                &crate::store::EntryFilter::default(),
            )
            .await
            .unwrap();
        let sequences: Vec<u64> = page.entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn test_prune_leaves_sequence_counter() {
        let store = EntryStore::in_memory().await.unwrap();

        for i in 0..5 {
            store
                .append(NewEntry::new(EntryKind::Cache, json!({"n": i})))
                .await
                .unwrap();
        }

        let config = RetentionConfig {
            max_entries: Some(0),
            max_age_hours: None,
            check_interval_secs: 300,
        };
        run_prune_now(&store, &config).await.unwrap();
        assert_eq!(store.latest_sequence().await.unwrap(), None);

        let next = store
            .append(NewEntry::new(EntryKind::Cache, json!({"n": 99})))
            .await
            .unwrap();
        assert_eq!(next, 6);
    }

    #[tokio::test]
    async fn test_prune_without_limits_is_noop() {
        let store = EntryStore::in_memory().await.unwrap();
        store
            .append(NewEntry::new(EntryKind::Mail, json!({})))
            .await
            .unwrap();

        let config = RetentionConfig {
            max_entries: None,
            max_age_hours: None,
            check_interval_secs: 300,
        };
        let stats = run_prune_now(&store, &config).await.unwrap();
        assert_eq!(stats.total(), 0);
        assert_eq!(store.latest_sequence().await.unwrap(), Some(1));
    }
}
