pub mod api;
pub mod config;
pub mod entry;
pub mod error;
pub mod metrics;
pub mod store;
pub mod watchers;

use config::Config;
use error::CoreError;
use std::sync::Arc;
use store::EntryStore;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watchers::{Recorder, WatcherRegistry};

/// Initialize tracing/logging for hosts that don't set up their own
/// subscriber. Call once at startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Assembled telemetry runtime: the store, the shared recorder, and the
/// watcher registry, built from one immutable [`Config`].
pub struct Telemetry {
    pub config: Config,
    pub store: Arc<EntryStore>,
    pub recorder: Recorder,
    pub registry: WatcherRegistry,
}

impl Telemetry {
    /// Open the store, run migrations, and prepare the registry. With
    /// collection globally disabled the store still opens (the read API
    /// stays serviceable) but no watcher will activate.
    pub async fn initialize(config: Config) -> Result<Self, CoreError> {
        config::validate_config(&config).map_err(|e| CoreError::Validation(e.to_string()))?;

        metrics::init_metric_descriptions();

        let store = Arc::new(EntryStore::new(&config.storage).await?);
        let recorder = Recorder::new(Arc::clone(&store));

        let mut watchers_config = config.watchers.clone();
        if !config.enabled {
            watchers_config.disable_all();
        }
        let registry = WatcherRegistry::new(recorder.clone(), watchers_config);

        Ok(Self {
            config,
            store,
            recorder,
            registry,
        })
    }

    /// Router serving the dashboard read API.
    pub fn router(&self) -> axum::Router {
        let state = api::ApiState::new(
            Arc::clone(&self.store),
            self.config.runtime_mode,
            &self.config.api,
        );
        api::telemetry_router(state)
    }

    /// Spawn the retention pruning task with the configured policy.
    pub fn spawn_pruning(&self) -> tokio::task::JoinHandle<()> {
        store::spawn_prune_task(Arc::clone(&self.store), self.config.retention.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchers::TargetPool;

    #[tokio::test]
    async fn test_initialize_with_defaults() {
        let telemetry = Telemetry::initialize(Config::default()).await.unwrap();
        assert_eq!(telemetry.store.latest_sequence().await.unwrap(), None);

        let installed = telemetry.registry.install(&TargetPool::default());
        assert!(installed.batch.is_some());
    }

    #[tokio::test]
    async fn test_globally_disabled_activates_no_watchers() {
        let config = Config {
            enabled: false,
            ..Config::default()
        };
        let telemetry = Telemetry::initialize(config).await.unwrap();

        let installed = telemetry.registry.install(&TargetPool::default());
        assert!(installed.batch.is_none());
        assert!(installed.exception.is_none());
        assert!(installed.log_layer.is_none());
    }
}
