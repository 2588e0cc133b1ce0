//! Cache watcher
//!
//! Records one entry per cache interaction: hit, missed, set, forget.

use super::Recorder;
use crate::config::CacheWatcherConfig;
use crate::entry::{EntryKind, NewEntry, OutcomeStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Capability trait the host's cache client is adapted to.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> anyhow::Result<()>;
    async fn forget(&self, key: &str) -> anyhow::Result<bool>;
}

/// Structured fields for manual tracking.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub operation: String,
    pub key: String,
    pub value: Option<Value>,
    pub duration_ms: i64,
}

#[derive(Clone)]
pub struct CacheWatcher {
    recorder: Recorder,
    config: CacheWatcherConfig,
}

impl CacheWatcher {
    pub fn new(recorder: Recorder, config: CacheWatcherConfig) -> Self {
        Self { recorder, config }
    }

    pub fn wrap(&self, target: Arc<dyn CacheStore>) -> Arc<dyn CacheStore> {
        Arc::new(InstrumentedCacheStore {
            inner: target,
            watcher: self.clone(),
        })
    }

    pub async fn track(&self, record: CacheRecord) -> Option<u64> {
        let entry = self.build_entry(
            &record.operation,
            &record.key,
            record.value.as_ref(),
            OutcomeStatus::Completed,
            record.duration_ms,
            None,
        );
        self.recorder.record(entry).await
    }

    fn build_entry(
        &self,
        operation: &str,
        key: &str,
        value: Option<&Value>,
        status: OutcomeStatus,
        duration_ms: i64,
        error: Option<String>,
    ) -> NewEntry {
        let mut payload = json!({
            "operation": operation,
            "key": key,
            "durationMs": duration_ms,
            "status": status,
        });
        let map = payload.as_object_mut().expect("payload is an object");
        if self.config.record_values {
            if let Some(value) = value {
                map.insert("value".to_string(), value.clone());
            }
        }
        if let Some(error) = error {
            map.insert("errors".to_string(), json!([error]));
        }

        NewEntry::new(EntryKind::Cache, payload)
            .with_name(key)
            .with_method(operation)
            .with_status(status)
            .with_duration_ms(duration_ms)
    }

    async fn observe(
        &self,
        operation: &str,
        key: &str,
        value: Option<&Value>,
        started: Instant,
        error: Option<&anyhow::Error>,
    ) {
        let duration_ms = started.elapsed().as_millis() as i64;
        let status = if error.is_some() {
            OutcomeStatus::Failed
        } else {
            OutcomeStatus::Completed
        };
        let entry = self.build_entry(
            operation,
            key,
            value,
            status,
            duration_ms,
            error.map(|e| e.to_string()),
        );
        self.recorder.record(entry).await;
    }
}

struct InstrumentedCacheStore {
    inner: Arc<dyn CacheStore>,
    watcher: CacheWatcher,
}

#[async_trait]
impl CacheStore for InstrumentedCacheStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let started = Instant::now();
        let result = self.inner.get(key).await;
        match &result {
            Ok(Some(value)) => {
                self.watcher
                    .observe("hit", key, Some(value), started, None)
                    .await
            }
            Ok(None) => self.watcher.observe("missed", key, None, started, None).await,
            Err(err) => {
                self.watcher
                    .observe("get", key, None, started, Some(err))
                    .await
            }
        }
        result
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = self.inner.put(key, value.clone(), ttl).await;
        match &result {
            Ok(()) => {
                self.watcher
                    .observe("set", key, Some(&value), started, None)
                    .await
            }
            Err(err) => {
                self.watcher
                    .observe("set", key, Some(&value), started, Some(err))
                    .await
            }
        }
        result
    }

    async fn forget(&self, key: &str) -> anyhow::Result<bool> {
        let started = Instant::now();
        let result = self.inner.forget(key).await;
        match &result {
            Ok(_) => self.watcher.observe("forget", key, None, started, None).await,
            Err(err) => {
                self.watcher
                    .observe("forget", key, None, started, Some(err))
                    .await
            }
        }
        result
    }
}
