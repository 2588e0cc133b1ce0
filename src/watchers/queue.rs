//! Queue watcher
//!
//! Records job dispatches: name, queue, assigned job id, duration.

use super::Recorder;
use crate::config::QueueWatcherConfig;
use crate::entry::{EntryKind, NewEntry, OutcomeStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub name: String,
    pub queue: String,
    pub payload: Value,
}

impl QueuedJob {
    pub fn new(name: impl Into<String>, queue: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            payload,
        }
    }
}

/// Capability trait the host's queue is adapted to; returns the backend's
/// job id.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn dispatch(&self, job: &QueuedJob) -> anyhow::Result<String>;
}

/// Structured fields for manual tracking.
#[derive(Debug, Clone)]
pub struct QueueRecord {
    pub name: String,
    pub queue: String,
    pub job_id: Option<String>,
    pub duration_ms: i64,
}

#[derive(Clone)]
pub struct QueueWatcher {
    recorder: Recorder,
    #[allow(dead_code)]
    config: QueueWatcherConfig,
}

impl QueueWatcher {
    pub fn new(recorder: Recorder, config: QueueWatcherConfig) -> Self {
        Self { recorder, config }
    }

    pub fn wrap(&self, target: Arc<dyn JobQueue>) -> Arc<dyn JobQueue> {
        Arc::new(InstrumentedJobQueue {
            inner: target,
            watcher: self.clone(),
        })
    }

    pub async fn track(&self, record: QueueRecord) -> Option<u64> {
        let entry = build_entry(
            &record.name,
            &record.queue,
            record.job_id.as_deref(),
            OutcomeStatus::Completed,
            record.duration_ms,
            None,
        );
        self.recorder.record(entry).await
    }
}

struct InstrumentedJobQueue {
    inner: Arc<dyn JobQueue>,
    watcher: QueueWatcher,
}

#[async_trait]
impl JobQueue for InstrumentedJobQueue {
    async fn dispatch(&self, job: &QueuedJob) -> anyhow::Result<String> {
        let started = Instant::now();
        let result = self.inner.dispatch(job).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let entry = match &result {
            Ok(job_id) => build_entry(
                &job.name,
                &job.queue,
                Some(job_id),
                OutcomeStatus::Completed,
                duration_ms,
                None,
            ),
            Err(err) => build_entry(
                &job.name,
                &job.queue,
                None,
                OutcomeStatus::Failed,
                duration_ms,
                Some(err.to_string()),
            ),
        };
        self.watcher.recorder.record(entry).await;

        result
    }
}

fn build_entry(
    name: &str,
    queue: &str,
    job_id: Option<&str>,
    status: OutcomeStatus,
    duration_ms: i64,
    error: Option<String>,
) -> NewEntry {
    let mut payload = json!({
        "name": name,
        "queue": queue,
        "durationMs": duration_ms,
        "status": status,
    });
    let map = payload.as_object_mut().expect("payload is an object");
    if let Some(id) = job_id {
        map.insert("jobId".to_string(), json!(id));
    }
    if let Some(error) = error {
        map.insert("errors".to_string(), json!([error]));
    }

    NewEntry::new(EntryKind::Job, payload)
        .with_name(name)
        .with_status(status)
        .with_duration_ms(duration_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntryStore;
    use uuid::Uuid;

    struct MemoryQueue;

    #[async_trait]
    impl JobQueue for MemoryQueue {
        async fn dispatch(&self, _job: &QueuedJob) -> anyhow::Result<String> {
            Ok(Uuid::new_v4().to_string())
        }
    }

    #[tokio::test]
    async fn test_dispatch_recorded_with_job_id() {
        let store = Arc::new(EntryStore::in_memory().await.unwrap());
        let watcher = Arc::new(QueueWatcher::new(
            Recorder::new(store.clone()),
            QueueWatcherConfig::default(),
        ));
        let queue = watcher.wrap(Arc::new(MemoryQueue));

        let job_id = queue
            .dispatch(&QueuedJob::new("SendWelcomeEmail", "emails", json!({"user": 7})))
            .await
            .unwrap();
        assert!(!job_id.is_empty());

        let entry = store.get_by_id(1).await.unwrap();
        assert_eq!(entry.kind, EntryKind::Job);
        assert_eq!(entry.payload["name"], json!("SendWelcomeEmail"));
        assert_eq!(entry.payload["queue"], json!("emails"));
        assert_eq!(entry.payload["jobId"], json!(job_id));
    }
}
