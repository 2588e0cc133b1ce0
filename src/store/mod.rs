//! Sequenced entry log backed by sqlite
//!
//! The store owns sequence assignment (delegated to sqlite
//! `AUTOINCREMENT`, which is linearizable and never reuses a number, even
//! across deletes), retention, filtering, and cursor reads. Watchers only
//! ever touch it through [`EntryStore::append`].

pub mod filter;
pub mod prune;

pub use filter::{EntryFilter, StatusCodeFilter};
pub use prune::{run_prune_now, spawn_prune_task, PruneStats};

use crate::config::StorageConfig;
use crate::entry::{EntryKind, NewEntry, TelemetryEntry};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

/// Server-enforced page bounds for cursor reads.
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Read direction relative to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "forward" => Some(Self::Forward),
            "backward" => Some(Self::Backward),
            _ => None,
        }
    }
}

/// One page of a cursor read. Forward pages ascend by sequence, backward
/// pages descend; `newest_sequence`/`oldest_sequence` bound the page itself.
#[derive(Debug, Clone, Serialize)]
pub struct EntryPage {
    pub entries: Vec<TelemetryEntry>,
    pub newest_sequence: Option<u64>,
    pub oldest_sequence: Option<u64>,
    pub has_more: bool,
}

/// Cheap polling probe: how much matching material exists past a cursor.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NewEntriesProbe {
    pub count: u64,
    pub newest_sequence: Option<u64>,
}

/// Aggregate counts over the filtered set.
#[derive(Debug, Clone, Serialize)]
pub struct LogStats {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
}

/// Entry log handle; cheap to clone through an `Arc`.
pub struct EntryStore {
    pool: SqlitePool,
}

impl EntryStore {
    /// Open (or create) the backing database and run migrations.
    ///
    /// In-memory URLs are pinned to a single connection so every query sees
    /// the same database.
    pub async fn new(storage: &StorageConfig) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(&storage.database_url)
            .map_err(CoreError::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(storage.busy_timeout_secs))
            .pragma("temp_store", "memory")
            .pragma("synchronous", "NORMAL");

        let max_connections = if storage.database_url.contains(":memory:") {
            1
        } else {
            storage.max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(storage.busy_timeout_secs))
            .connect_with(options)
            .await
            .map_err(CoreError::from)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)
            .map_err(CoreError::from)?;

        Ok(Self { pool })
    }

    /// Open an in-memory store with default settings.
    pub async fn in_memory() -> Result<Self, CoreError> {
        Self::new(&StorageConfig::default()).await
    }

    /// Append one entry, returning its sequence number.
    ///
    /// The row and its tags commit in a single transaction, so readers
    /// never observe a torn entry. A failed insert may burn a sequence
    /// number, but never hands the same number to two callers.
    pub async fn append(&self, entry: NewEntry) -> Result<u64, CoreError> {
        let payload = serde_json::to_string(&entry.payload)?;
        let created_at = Utc::now().timestamp_millis();
        // Exception entries start unresolved; other kinds never carry the flag.
        let resolved: Option<i64> = match entry.kind {
            EntryKind::Exception => Some(0),
            _ => None,
        };

        let mut tx = self.pool.begin().await.map_err(CoreError::from)?;

        let result = sqlx::query(
            "INSERT INTO telemetry_entries \
             (kind, name, method, status, status_code, duration_ms, payload, resolved, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.kind.as_str())
        .bind(&entry.name)
        .bind(&entry.method)
        .bind(&entry.status)
        .bind(entry.status_code)
        .bind(entry.duration_ms)
        .bind(&payload)
        .bind(resolved)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::from)?;

        let sequence = result.last_insert_rowid();

        for tag in &entry.tags {
            sqlx::query("INSERT OR IGNORE INTO telemetry_tags (sequence, tag) VALUES (?, ?)")
                .bind(sequence)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(CoreError::from)?;
        }

        tx.commit().await.map_err(CoreError::from)?;

        Ok(sequence as u64)
    }

    /// Fetch a single entry by sequence.
    pub async fn get_by_id(&self, sequence: u64) -> Result<TelemetryEntry, CoreError> {
        let row = sqlx::query(
            "SELECT sequence, kind, payload, resolved, created_at \
             FROM telemetry_entries WHERE sequence = ?",
        )
        .bind(sequence as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)?
        .ok_or(CoreError::NotFound(sequence))?;

        let tags = self.load_tags(&[sequence as i64]).await?;
        entry_from_row(&row, &tags)
    }

    /// Cursor read: strictly after the cursor going forward (ascending),
    /// strictly before it going backward (descending). A `None` cursor
    /// means the beginning (forward) or the most recent entry (backward).
    pub async fn get_entries_with_cursor(
        &self,
        cursor: Option<u64>,
        direction: Direction,
        limit: usize,
        filter: &EntryFilter,
    ) -> Result<EntryPage, CoreError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT sequence, kind, payload, resolved, created_at \
             FROM telemetry_entries WHERE 1=1",
        );
        match (direction, cursor) {
            (Direction::Forward, Some(c)) => {
                qb.push(" AND sequence > ");
                qb.push_bind(c as i64);
            }
            (Direction::Backward, Some(c)) => {
                qb.push(" AND sequence < ");
                qb.push_bind(c as i64);
            }
            _ => {}
        }
        filter::push_predicates(filter, &mut qb);
        qb.push(match direction {
            Direction::Forward => " ORDER BY sequence ASC",
            Direction::Backward => " ORDER BY sequence DESC",
        });
        qb.push(" LIMIT ");
        qb.push_bind((limit + 1) as i64);

        let mut rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;

        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let sequences: Vec<i64> = rows.iter().map(|r| r.get::<i64, _>("sequence")).collect();
        let tags = self.load_tags(&sequences).await?;

        let entries = rows
            .iter()
            .map(|row| entry_from_row(row, &tags))
            .collect::<Result<Vec<_>, _>>()?;

        let newest_sequence = entries.iter().map(|e| e.sequence).max();
        let oldest_sequence = entries.iter().map(|e| e.sequence).min();

        Ok(EntryPage {
            entries,
            newest_sequence,
            oldest_sequence,
            has_more,
        })
    }

    /// Count matching entries past `since` without materializing them.
    pub async fn check_new_entries(
        &self,
        since: u64,
        filter: &EntryFilter,
    ) -> Result<NewEntriesProbe, CoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) AS count, MAX(sequence) AS newest \
             FROM telemetry_entries WHERE sequence > ",
        );
        qb.push_bind(since as i64);
        filter::push_predicates(filter, &mut qb);

        let row = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::from)?;

        Ok(NewEntriesProbe {
            count: row.get::<i64, _>("count") as u64,
            newest_sequence: row.get::<Option<i64>, _>("newest").map(|s| s as u64),
        })
    }

    /// Highest sequence currently present, `None` on an empty log.
    pub async fn latest_sequence(&self) -> Result<Option<u64>, CoreError> {
        let newest: Option<i64> = sqlx::query_scalar("SELECT MAX(sequence) FROM telemetry_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(CoreError::from)?;

        Ok(newest.map(|s| s as u64))
    }

    /// Mark an exception entry resolved. Idempotent.
    pub async fn resolve_entry(&self, sequence: u64) -> Result<(), CoreError> {
        self.set_resolved(sequence, true).await
    }

    /// Clear the resolved flag on an exception entry. Idempotent.
    pub async fn unresolve_entry(&self, sequence: u64) -> Result<(), CoreError> {
        self.set_resolved(sequence, false).await
    }

    async fn set_resolved(&self, sequence: u64, resolved: bool) -> Result<(), CoreError> {
        let kind: Option<String> =
            sqlx::query_scalar("SELECT kind FROM telemetry_entries WHERE sequence = ?")
                .bind(sequence as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(CoreError::from)?;

        let kind = kind.ok_or(CoreError::NotFound(sequence))?;
        if kind != EntryKind::Exception.as_str() {
            return Err(CoreError::InvalidOperation(format!(
                "cannot change resolution of {} entry {}",
                kind, sequence
            )));
        }

        sqlx::query("UPDATE telemetry_entries SET resolved = ? WHERE sequence = ?")
            .bind(if resolved { 1i64 } else { 0i64 })
            .bind(sequence as i64)
            .execute(&self.pool)
            .await
            .map_err(CoreError::from)?;

        Ok(())
    }

    /// Remove matching entries (all, with no filter). Sequence numbering is
    /// never reset: future appends continue past the historical maximum.
    pub async fn clear_entries(&self, filter: Option<&EntryFilter>) -> Result<u64, CoreError> {
        let mut tx = self.pool.begin().await.map_err(CoreError::from)?;

        let mut tag_qb = QueryBuilder::<Sqlite>::new(
            "DELETE FROM telemetry_tags WHERE sequence IN \
             (SELECT sequence FROM telemetry_entries WHERE 1=1",
        );
        if let Some(f) = filter {
            filter::push_predicates(f, &mut tag_qb);
        }
        tag_qb.push(")");
        tag_qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;

        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM telemetry_entries WHERE 1=1");
        if let Some(f) = filter {
            filter::push_predicates(f, &mut qb);
        }
        let result = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(CoreError::from)?;

        tx.commit().await.map_err(CoreError::from)?;

        let removed = result.rows_affected();
        crate::metrics::record_cleared(removed);
        Ok(removed)
    }

    /// Aggregate counts per kind and per status over the filtered set.
    pub async fn stats(&self, filter: Option<&EntryFilter>) -> Result<LogStats, CoreError> {
        let empty = EntryFilter::default();
        let filter = filter.unwrap_or(&empty);

        let mut kind_qb = QueryBuilder::<Sqlite>::new(
            "SELECT kind, COUNT(*) AS count FROM telemetry_entries WHERE 1=1",
        );
        filter::push_predicates(filter, &mut kind_qb);
        kind_qb.push(" GROUP BY kind");

        let kind_rows = kind_qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;

        let mut by_kind = BTreeMap::new();
        let mut total = 0u64;
        for row in kind_rows {
            let count = row.get::<i64, _>("count") as u64;
            total += count;
            by_kind.insert(row.get::<String, _>("kind"), count);
        }

        let mut status_qb = QueryBuilder::<Sqlite>::new(
            "SELECT status, COUNT(*) AS count FROM telemetry_entries \
             WHERE status IS NOT NULL",
        );
        filter::push_predicates(filter, &mut status_qb);
        status_qb.push(" GROUP BY status");

        let status_rows = status_qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;

        let by_status = status_rows
            .into_iter()
            .map(|row| {
                (
                    row.get::<String, _>("status"),
                    row.get::<i64, _>("count") as u64,
                )
            })
            .collect();

        Ok(LogStats {
            total,
            by_kind,
            by_status,
        })
    }

    async fn load_tags(&self, sequences: &[i64]) -> Result<HashMap<i64, Vec<String>>, CoreError> {
        if sequences.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT sequence, tag FROM telemetry_tags WHERE sequence IN (",
        );
        let mut separated = qb.separated(", ");
        for sequence in sequences {
            separated.push_bind(*sequence);
        }
        qb.push(") ORDER BY tag ASC");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::from)?;

        let mut tags: HashMap<i64, Vec<String>> = HashMap::new();
        for row in rows {
            tags.entry(row.get::<i64, _>("sequence"))
                .or_default()
                .push(row.get::<String, _>("tag"));
        }
        Ok(tags)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn entry_from_row(
    row: &sqlx::sqlite::SqliteRow,
    tags: &HashMap<i64, Vec<String>>,
) -> Result<TelemetryEntry, CoreError> {
    let sequence = row.get::<i64, _>("sequence");
    let kind_str = row.get::<String, _>("kind");
    let kind = EntryKind::parse(&kind_str)
        .ok_or_else(|| CoreError::Internal(format!("unknown entry kind '{}' in store", kind_str)))?;
    let payload = serde_json::from_str(&row.get::<String, _>("payload"))?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(row.get::<i64, _>("created_at"))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let resolved = match kind {
        EntryKind::Exception => Some(row.get::<Option<i64>, _>("resolved").unwrap_or(0) != 0),
        _ => None,
    };

    Ok(TelemetryEntry {
        sequence: sequence as u64,
        kind,
        payload,
        tags: tags.get(&sequence).cloned().unwrap_or_default(),
        created_at,
        resolved,
    })
}
