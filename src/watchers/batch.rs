//! Batch watcher
//!
//! The fully worked instance of the watcher template: wrap, measure,
//! extract, submit. Other watchers follow the same shape with different
//! extraction rules.

use super::outcome::BatchOutcome;
use super::{CancellationGuard, Recorder};
use crate::config::BatchWatcherConfig;
use crate::entry::{EntryKind, NewEntry, OutcomeStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// One batch of work handed to the target.
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Correlation id; every entry recorded for this job carries it as a tag.
    pub id: Uuid,
    pub name: String,
    pub operation: String,
    pub items: Vec<Value>,
    pub batch_size_hint: Option<usize>,
}

impl BatchJob {
    pub fn new(name: impl Into<String>, operation: impl Into<String>, items: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            operation: operation.into(),
            items,
            batch_size_hint: None,
        }
    }

    pub fn with_size_hint(mut self, hint: usize) -> Self {
        self.batch_size_hint = Some(hint);
        self
    }
}

/// Capability trait the host's batch subsystem is adapted to. The result
/// shape is deliberately open; extraction copes with whatever comes back.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, job: &BatchJob) -> anyhow::Result<Value>;
}

/// Structured fields for manual tracking, mirroring the recorded payload.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub name: String,
    pub operation: String,
    pub total_items: u64,
    pub processed_items: u64,
    pub failed_items: u64,
    pub duration_ms: i64,
    pub batch_size_hint: Option<usize>,
    pub errors: Vec<String>,
    pub memory_delta_bytes: Option<i64>,
}

#[derive(Clone)]
pub struct BatchWatcher {
    recorder: Recorder,
    config: BatchWatcherConfig,
}

impl BatchWatcher {
    pub fn new(recorder: Recorder, config: BatchWatcherConfig) -> Self {
        Self { recorder, config }
    }

    /// Wrap a target once; the returned processor is substituted for the
    /// original at setup time.
    pub fn wrap(&self, target: Arc<dyn BatchProcessor>) -> Arc<dyn BatchProcessor> {
        Arc::new(InstrumentedBatchProcessor {
            inner: target,
            watcher: self.clone(),
        })
    }

    /// Manual entry point for batches observed out-of-band (no target
    /// wrapped, or work done outside the instrumented seam).
    pub async fn track(&self, record: BatchRecord) -> Option<u64> {
        let outcome = BatchOutcome {
            processed: record.processed_items,
            failed: record.failed_items,
            errors: record.errors.clone(),
        };
        let status = outcome.status();
        let entry = build_entry(
            &record.name,
            &record.operation,
            record.total_items,
            record.batch_size_hint,
            &outcome,
            status,
            record.duration_ms,
            record.memory_delta_bytes,
            None,
        );
        self.recorder.record(entry).await
    }
}

struct InstrumentedBatchProcessor {
    inner: Arc<dyn BatchProcessor>,
    watcher: BatchWatcher,
}

#[async_trait]
impl BatchProcessor for InstrumentedBatchProcessor {
    async fn process(&self, job: &BatchJob) -> anyhow::Result<Value> {
        let total = job.items.len() as u64;
        let started = Instant::now();
        let memory_before = if self.watcher.config.track_memory {
            resident_bytes()
        } else {
            None
        };

        let cancelled = BatchOutcome::from_failure("call cancelled".to_string(), total);
        let guard = CancellationGuard::arm(
            &self.watcher.recorder,
            build_entry(
                &job.name,
                &job.operation,
                total,
                job.batch_size_hint,
                &cancelled,
                OutcomeStatus::Failed,
                0,
                None,
                Some(job.id),
            ),
        );

        let result = self.inner.process(job).await;
        guard.disarm();

        let duration_ms = started.elapsed().as_millis() as i64;
        let memory_delta = match (memory_before, self.watcher.config.track_memory) {
            (Some(before), true) => resident_bytes().map(|after| after - before),
            _ => None,
        };

        let outcome = match &result {
            Ok(value) => BatchOutcome::from_result(value, total),
            Err(err) => BatchOutcome::from_failure(err.to_string(), total),
        };
        let status = outcome.status();

        self.watcher
            .recorder
            .record(build_entry(
                &job.name,
                &job.operation,
                total,
                job.batch_size_hint,
                &outcome,
                status,
                duration_ms,
                memory_delta,
                Some(job.id),
            ))
            .await;

        result
    }
}

#[allow(clippy::too_many_arguments)]
fn build_entry(
    name: &str,
    operation: &str,
    total_items: u64,
    batch_size_hint: Option<usize>,
    outcome: &BatchOutcome,
    status: OutcomeStatus,
    duration_ms: i64,
    memory_delta_bytes: Option<i64>,
    job_id: Option<Uuid>,
) -> NewEntry {
    let mut payload = json!({
        "name": name,
        "operation": operation,
        "totalItems": total_items,
        "processedItems": outcome.processed,
        "failedItems": outcome.failed,
        "durationMs": duration_ms,
        "status": status,
    });
    let map = payload.as_object_mut().expect("payload is an object");
    if let Some(hint) = batch_size_hint {
        map.insert("batchSizeHint".to_string(), json!(hint));
    }
    if !outcome.errors.is_empty() {
        map.insert("errors".to_string(), json!(outcome.errors));
    }
    if let Some(delta) = memory_delta_bytes {
        map.insert("memoryDeltaBytes".to_string(), json!(delta));
    }

    let mut entry = NewEntry::new(EntryKind::Batch, payload)
        .with_name(name)
        .with_method(operation)
        .with_status(status)
        .with_duration_ms(duration_ms);
    if let Some(id) = job_id {
        entry = entry.with_tag(format!("batch:{}", id));
    }
    entry
}

/// Best-effort process RSS. Process-wide, so concurrent allocation skews
/// any delta computed from two readings.
#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<i64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: i64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> Option<i64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntryStore;

    struct FixedProcessor {
        result: Value,
    }

    #[async_trait]
    impl BatchProcessor for FixedProcessor {
        async fn process(&self, _job: &BatchJob) -> anyhow::Result<Value> {
            Ok(self.result.clone())
        }
    }

    struct FailingProcessor;

    #[async_trait]
    impl BatchProcessor for FailingProcessor {
        async fn process(&self, _job: &BatchJob) -> anyhow::Result<Value> {
            anyhow::bail!("boom")
        }
    }

    async fn watcher() -> (Arc<BatchWatcher>, Arc<EntryStore>) {
        let store = Arc::new(EntryStore::in_memory().await.unwrap());
        let recorder = Recorder::new(store.clone());
        let watcher = Arc::new(BatchWatcher::new(recorder, BatchWatcherConfig::default()));
        (watcher, store)
    }

    fn items(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({"row": i})).collect()
    }

    #[tokio::test]
    async fn test_success_payload_and_transparency() {
        let (watcher, store) = watcher().await;
        let wrapped = watcher.wrap(Arc::new(FixedProcessor {
            result: json!({"processed": 10, "failed": 0}),
        }));

        let job = BatchJob::new("imports", "process", items(5));
        let result = wrapped.process(&job).await.unwrap();
        assert_eq!(result, json!({"processed": 10, "failed": 0}));

        let entry = store.get_by_id(1).await.unwrap();
        assert_eq!(entry.kind, EntryKind::Batch);
        assert_eq!(entry.payload["totalItems"], json!(5));
        assert_eq!(entry.payload["processedItems"], json!(10));
        assert_eq!(entry.payload["failedItems"], json!(0));
        assert_eq!(entry.payload["status"], json!("completed"));
        assert!(entry.tags.iter().any(|t| t.starts_with("batch:")));
    }

    #[tokio::test]
    async fn test_partial_status() {
        let (watcher, store) = watcher().await;
        let wrapped = watcher.wrap(Arc::new(FixedProcessor {
            result: json!({"processed": 8, "failed": 2}),
        }));

        wrapped
            .process(&BatchJob::new("imports", "process", items(10)))
            .await
            .unwrap();

        let entry = store.get_by_id(1).await.unwrap();
        assert_eq!(entry.payload["status"], json!("partial"));
    }

    #[tokio::test]
    async fn test_failure_recorded_and_reraised() {
        let (watcher, store) = watcher().await;
        let wrapped = watcher.wrap(Arc::new(FailingProcessor));

        let err = wrapped
            .process(&BatchJob::new("imports", "process", items(3)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let entry = store.get_by_id(1).await.unwrap();
        assert_eq!(entry.payload["totalItems"], json!(3));
        assert_eq!(entry.payload["processedItems"], json!(0));
        assert_eq!(entry.payload["failedItems"], json!(3));
        assert_eq!(entry.payload["status"], json!("failed"));
        assert_eq!(entry.payload["errors"], json!(["boom"]));

        // exactly one entry for the failed call
        assert_eq!(store.latest_sequence().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_non_record_result_assumed_successful() {
        let (watcher, store) = watcher().await;
        let wrapped = watcher.wrap(Arc::new(FixedProcessor {
            result: json!("ok"),
        }));

        let result = wrapped
            .process(&BatchJob::new("imports", "process", items(5)))
            .await
            .unwrap();
        assert_eq!(result, json!("ok"));

        let entry = store.get_by_id(1).await.unwrap();
        assert_eq!(entry.payload["totalItems"], json!(5));
        assert_eq!(entry.payload["processedItems"], json!(5));
        assert_eq!(entry.payload["failedItems"], json!(0));
    }

    #[tokio::test]
    async fn test_manual_track() {
        let (watcher, store) = watcher().await;

        let sequence = watcher
            .track(BatchRecord {
                name: "exports".to_string(),
                operation: "bulk".to_string(),
                total_items: 100,
                processed_items: 90,
                failed_items: 10,
                duration_ms: 1_200,
                batch_size_hint: Some(25),
                errors: vec!["row 7 invalid".to_string()],
                memory_delta_bytes: None,
            })
            .await
            .unwrap();

        let entry = store.get_by_id(sequence).await.unwrap();
        assert_eq!(entry.payload["status"], json!("partial"));
        assert_eq!(entry.payload["batchSizeHint"], json!(25));
        assert_eq!(entry.payload["errors"], json!(["row 7 invalid"]));
    }
}
