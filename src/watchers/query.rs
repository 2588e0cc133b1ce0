//! Query watcher
//!
//! Records executed statements with duration; statements at or above the
//! configured threshold are tagged `slow`.

use super::Recorder;
use crate::config::QueryWatcherConfig;
use crate::entry::{EntryKind, NewEntry, OutcomeStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

/// Capability trait the host's query engine is adapted to.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, statement: &str, bindings: &[Value]) -> anyhow::Result<Value>;
}

/// Structured fields for manual tracking.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub statement: String,
    pub bindings: Vec<Value>,
    pub duration_ms: i64,
}

#[derive(Clone)]
pub struct QueryWatcher {
    recorder: Recorder,
    config: QueryWatcherConfig,
}

impl QueryWatcher {
    pub fn new(recorder: Recorder, config: QueryWatcherConfig) -> Self {
        Self { recorder, config }
    }

    pub fn wrap(&self, target: Arc<dyn QueryExecutor>) -> Arc<dyn QueryExecutor> {
        Arc::new(InstrumentedQueryExecutor {
            inner: target,
            watcher: self.clone(),
        })
    }

    pub async fn track(&self, record: QueryRecord) -> Option<u64> {
        let entry = self.build_entry(
            &record.statement,
            &record.bindings,
            OutcomeStatus::Completed,
            record.duration_ms,
            None,
        );
        self.recorder.record(entry).await
    }

    fn build_entry(
        &self,
        statement: &str,
        bindings: &[Value],
        status: OutcomeStatus,
        duration_ms: i64,
        error: Option<String>,
    ) -> NewEntry {
        let slow = duration_ms >= self.config.slow_threshold_ms as i64;
        let mut payload = json!({
            "statement": statement,
            "bindings": bindings,
            "durationMs": duration_ms,
            "slow": slow,
            "status": status,
        });
        if let Some(error) = error {
            payload
                .as_object_mut()
                .expect("payload is an object")
                .insert("errors".to_string(), json!([error]));
        }

        let mut entry = NewEntry::new(EntryKind::Query, payload)
            .with_status(status)
            .with_duration_ms(duration_ms);
        if let Some(verb) = statement.split_whitespace().next() {
            entry = entry.with_method(verb.to_uppercase());
        }
        if slow {
            entry = entry.with_tag("slow");
        }
        entry
    }
}

struct InstrumentedQueryExecutor {
    inner: Arc<dyn QueryExecutor>,
    watcher: QueryWatcher,
}

#[async_trait]
impl QueryExecutor for InstrumentedQueryExecutor {
    async fn execute(&self, statement: &str, bindings: &[Value]) -> anyhow::Result<Value> {
        let started = Instant::now();
        let result = self.inner.execute(statement, bindings).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (status, error) = match &result {
            Ok(_) => (OutcomeStatus::Completed, None),
            Err(err) => (OutcomeStatus::Failed, Some(err.to_string())),
        };
        let entry = self
            .watcher
            .build_entry(statement, bindings, status, duration_ms, error);
        self.watcher.recorder.record(entry).await;

        result
    }
}
