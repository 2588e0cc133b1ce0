//! Watcher registry
//!
//! Activates watchers from configuration at startup: for each kind, build
//! the watcher handle if enabled and wrap the target if one is present.
//! Absent targets are legal and degrade to manual tracking; disabled
//! watchers pass the original target through untouched. Install is
//! idempotent — a second call returns the already-built set instead of
//! wrapping wrappers.

use super::batch::{BatchProcessor, BatchWatcher};
use super::cache::{CacheStore, CacheWatcher};
use super::exception::ExceptionWatcher;
use super::http_client::{HttpClientWatcher, HttpDispatcher};
use super::log::LogWatcherLayer;
use super::mail::{Mailer, MailWatcher};
use super::query::{QueryExecutor, QueryWatcher};
use super::queue::{JobQueue, QueueWatcher};
use super::Recorder;
use crate::config::WatchersConfig;
use std::sync::{Arc, Mutex};

/// Optional targets resolved from the host's dependency pool.
#[derive(Default)]
pub struct TargetPool {
    pub batch: Option<Arc<dyn BatchProcessor>>,
    pub cache: Option<Arc<dyn CacheStore>>,
    pub query: Option<Arc<dyn QueryExecutor>>,
    pub http_client: Option<Arc<dyn HttpDispatcher>>,
    pub queue: Option<Arc<dyn JobQueue>>,
    pub mail: Option<Arc<dyn Mailer>>,
}

/// Result of installation. For each kind: the watcher handle (`None` when
/// disabled) and the target the host should use from now on — instrumented
/// when enabled and present, the original when disabled, `None` when absent.
pub struct InstalledWatchers {
    pub batch: Option<Arc<BatchWatcher>>,
    pub batch_processor: Option<Arc<dyn BatchProcessor>>,
    pub cache: Option<Arc<CacheWatcher>>,
    pub cache_store: Option<Arc<dyn CacheStore>>,
    pub query: Option<Arc<QueryWatcher>>,
    pub query_executor: Option<Arc<dyn QueryExecutor>>,
    pub http_client: Option<Arc<HttpClientWatcher>>,
    pub http_dispatcher: Option<Arc<dyn HttpDispatcher>>,
    pub queue: Option<Arc<QueueWatcher>>,
    pub job_queue: Option<Arc<dyn JobQueue>>,
    pub mail: Option<Arc<MailWatcher>>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub exception: Option<Arc<ExceptionWatcher>>,
    pub log_layer: Option<LogWatcherLayer>,
}

pub struct WatcherRegistry {
    recorder: Recorder,
    config: WatchersConfig,
    installed: Mutex<Option<Arc<InstalledWatchers>>>,
}

impl WatcherRegistry {
    pub fn new(recorder: Recorder, config: WatchersConfig) -> Self {
        Self {
            recorder,
            config,
            installed: Mutex::new(None),
        }
    }

    /// Install watchers over the supplied targets. Must be called from
    /// within a tokio runtime (the log watcher spawns its forwarding task).
    pub fn install(&self, targets: &TargetPool) -> Arc<InstalledWatchers> {
        let mut slot = self.installed.lock().expect("registry lock poisoned");
        if let Some(existing) = slot.as_ref() {
            tracing::debug!("Watchers already installed; returning existing set");
            return Arc::clone(existing);
        }

        let (batch, batch_processor) = if self.config.batch.enabled {
            let watcher = Arc::new(BatchWatcher::new(
                self.recorder.clone(),
                self.config.batch.clone(),
            ));
            let wrapped = match &targets.batch {
                Some(target) => Some(watcher.wrap(Arc::clone(target))),
                None => {
                    warn_absent("batch");
                    None
                }
            };
            (Some(watcher), wrapped)
        } else {
            (None, targets.batch.clone())
        };

        let (cache, cache_store) = if self.config.cache.enabled {
            let watcher = Arc::new(CacheWatcher::new(
                self.recorder.clone(),
                self.config.cache.clone(),
            ));
            let wrapped = match &targets.cache {
                Some(target) => Some(watcher.wrap(Arc::clone(target))),
                None => {
                    warn_absent("cache");
                    None
                }
            };
            (Some(watcher), wrapped)
        } else {
            (None, targets.cache.clone())
        };

        let (query, query_executor) = if self.config.query.enabled {
            let watcher = Arc::new(QueryWatcher::new(
                self.recorder.clone(),
                self.config.query.clone(),
            ));
            let wrapped = match &targets.query {
                Some(target) => Some(watcher.wrap(Arc::clone(target))),
                None => {
                    warn_absent("query");
                    None
                }
            };
            (Some(watcher), wrapped)
        } else {
            (None, targets.query.clone())
        };

        let (http_client, http_dispatcher) = if self.config.http_client.enabled {
            let watcher = Arc::new(HttpClientWatcher::new(
                self.recorder.clone(),
                self.config.http_client.clone(),
            ));
            let wrapped = match &targets.http_client {
                Some(target) => Some(watcher.wrap(Arc::clone(target))),
                None => {
                    warn_absent("http-client");
                    None
                }
            };
            (Some(watcher), wrapped)
        } else {
            (None, targets.http_client.clone())
        };

        let (queue, job_queue) = if self.config.queue.enabled {
            let watcher = Arc::new(QueueWatcher::new(
                self.recorder.clone(),
                self.config.queue.clone(),
            ));
            let wrapped = match &targets.queue {
                Some(target) => Some(watcher.wrap(Arc::clone(target))),
                None => {
                    warn_absent("queue");
                    None
                }
            };
            (Some(watcher), wrapped)
        } else {
            (None, targets.queue.clone())
        };

        let (mail, mailer) = if self.config.mail.enabled {
            let watcher = Arc::new(MailWatcher::new(
                self.recorder.clone(),
                self.config.mail.clone(),
            ));
            let wrapped = match &targets.mail {
                Some(target) => Some(watcher.wrap(Arc::clone(target))),
                None => {
                    warn_absent("mail");
                    None
                }
            };
            (Some(watcher), wrapped)
        } else {
            (None, targets.mail.clone())
        };

        let exception = self
            .config
            .exception
            .enabled
            .then(|| Arc::new(ExceptionWatcher::new(self.recorder.clone())));

        let log_layer = self
            .config
            .log
            .enabled
            .then(|| LogWatcherLayer::spawn(self.recorder.clone(), &self.config.log));

        let installed = Arc::new(InstalledWatchers {
            batch,
            batch_processor,
            cache,
            cache_store,
            query,
            query_executor,
            http_client,
            http_dispatcher,
            queue,
            job_queue,
            mail,
            mailer,
            exception,
            log_layer,
        });
        *slot = Some(Arc::clone(&installed));
        installed
    }
}

fn warn_absent(kind: &str) {
    tracing::warn!(
        watcher = kind,
        "Target not present; automatic tracking unavailable, manual tracking only"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntryStore;
    use crate::watchers::batch::BatchJob;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoProcessor;

    #[async_trait]
    impl BatchProcessor for EchoProcessor {
        async fn process(&self, _job: &BatchJob) -> anyhow::Result<Value> {
            Ok(json!("done"))
        }
    }

    async fn registry() -> (WatcherRegistry, Arc<EntryStore>) {
        let store = Arc::new(EntryStore::in_memory().await.unwrap());
        let registry = WatcherRegistry::new(Recorder::new(store.clone()), WatchersConfig::default());
        (registry, store)
    }

    #[tokio::test]
    async fn test_absent_targets_keep_manual_tracking() {
        let (registry, _store) = registry().await;
        let installed = registry.install(&TargetPool::default());

        assert!(installed.batch.is_some());
        assert!(installed.batch_processor.is_none());
        assert!(installed.exception.is_some());
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let (registry, _store) = registry().await;
        let pool = TargetPool {
            batch: Some(Arc::new(EchoProcessor)),
            ..Default::default()
        };

        let first = registry.install(&pool);
        let second = registry.install(&pool);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_disabled_watcher_passes_target_through() {
        let store = Arc::new(EntryStore::in_memory().await.unwrap());
        let mut config = WatchersConfig::default();
        config.batch.enabled = false;
        let registry = WatcherRegistry::new(Recorder::new(store.clone()), config);

        let pool = TargetPool {
            batch: Some(Arc::new(EchoProcessor)),
            ..Default::default()
        };
        let installed = registry.install(&pool);

        assert!(installed.batch.is_none());
        let processor = installed.batch_processor.as_ref().unwrap();
        processor
            .process(&BatchJob::new("noop", "process", vec![]))
            .await
            .unwrap();

        // nothing recorded through the pass-through target
        assert_eq!(store.latest_sequence().await.unwrap(), None);
    }
}
