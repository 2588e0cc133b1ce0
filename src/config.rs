use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime mode, decided once at startup and threaded into the boundary
/// layer. Development mode includes error detail chains in API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Development,
    Production,
}

impl Default for RuntimeMode {
    fn default() -> Self {
        Self::Production
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub runtime_mode: RuntimeMode,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub watchers: WatchersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            runtime_mode: RuntimeMode::default(),
            storage: StorageConfig::default(),
            retention: RetentionConfig::default(),
            api: ApiConfig::default(),
            watchers: WatchersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Sqlite URL; `sqlite::memory:` keeps the log for the process lifetime
    /// only, a file path makes it outlive the process.
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 5,
            busy_timeout_secs: 30,
        }
    }
}

/// Retention bounds enforced by the pruning task. Both limits optional;
/// with neither set the task is a no-op.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    pub max_entries: Option<u64>,
    pub max_age_hours: Option<u64>,
    #[serde(default = "default_prune_interval_secs")]
    pub check_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_entries: Some(10_000),
            max_age_hours: Some(24),
            check_interval_secs: default_prune_interval_secs(),
        }
    }
}

impl RetentionConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Per-client request budget for the polling endpoints; `None` disables
    /// limiting.
    pub rate_limit_per_minute: Option<u32>,
}

/// Per-watcher configuration. An absent block means enabled with defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WatchersConfig {
    #[serde(default)]
    pub batch: BatchWatcherConfig,
    #[serde(default)]
    pub cache: CacheWatcherConfig,
    #[serde(default)]
    pub query: QueryWatcherConfig,
    #[serde(default)]
    pub http_client: HttpClientWatcherConfig,
    #[serde(default)]
    pub queue: QueueWatcherConfig,
    #[serde(default)]
    pub mail: MailWatcherConfig,
    #[serde(default)]
    pub log: LogWatcherConfig,
    #[serde(default)]
    pub exception: ExceptionWatcherConfig,
}

impl WatchersConfig {
    /// Force every watcher off, used when collection is globally disabled.
    pub fn disable_all(&mut self) {
        self.batch.enabled = false;
        self.cache.enabled = false;
        self.query.enabled = false;
        self.http_client.enabled = false;
        self.queue.enabled = false;
        self.mail.enabled = false;
        self.log.enabled = false;
        self.exception.enabled = false;
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Record a best-effort process RSS delta per batch. The reading is
    /// process-wide, so concurrent allocation skews it.
    #[serde(default)]
    pub track_memory: bool,
}

impl Default for BatchWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            track_memory: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Include cached values in payloads. Off by default; values can be
    /// large or sensitive.
    #[serde(default)]
    pub record_values: bool,
}

impl Default for CacheWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            record_values: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Statements at or above this duration get the `slow` tag.
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
}

impl Default for QueryWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slow_threshold_ms: default_slow_threshold_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpClientWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for HttpClientWatcherConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for QueueWatcherConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MailWatcherConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum level recorded as log-line entries.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExceptionWatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ExceptionWatcherConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

fn default_prune_interval_secs() -> u64 {
    300
}

fn default_slow_threshold_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from `periscope.toml` (optional) layered with
/// `PERISCOPE__`-prefixed environment variables.
pub fn load_config() -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::with_name("periscope").required(false))
        .add_source(config::Environment::with_prefix("PERISCOPE").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.storage.database_url.is_empty() {
        anyhow::bail!("storage.database_url cannot be empty");
    }

    if cfg.storage.max_connections == 0 {
        anyhow::bail!("storage.max_connections must be at least 1");
    }

    if cfg.watchers.query.slow_threshold_ms == 0 {
        anyhow::bail!("watchers.query.slow_threshold_ms must be positive");
    }

    if cfg.retention.check_interval_secs == 0 {
        anyhow::bail!("retention.check_interval_secs must be positive");
    }

    if cfg.watchers.log.enabled
        && cfg
            .watchers
            .log
            .level
            .parse::<tracing::Level>()
            .is_err()
    {
        anyhow::bail!(
            "watchers.log.level '{}' is not a valid level",
            cfg.watchers.log.level
        );
    }

    if let Some(limit) = cfg.api.rate_limit_per_minute {
        if limit == 0 {
            anyhow::bail!("api.rate_limit_per_minute must be positive when set");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_every_watcher() {
        let cfg = Config::default();
        assert!(cfg.enabled);
        assert!(cfg.watchers.batch.enabled);
        assert!(cfg.watchers.cache.enabled);
        assert!(cfg.watchers.query.enabled);
        assert!(cfg.watchers.http_client.enabled);
        assert!(cfg.watchers.queue.enabled);
        assert!(cfg.watchers.mail.enabled);
        assert!(cfg.watchers.log.enabled);
        assert!(cfg.watchers.exception.enabled);
        assert!(!cfg.watchers.batch.track_memory);
        assert_eq!(cfg.runtime_mode, RuntimeMode::Production);
    }

    #[test]
    fn test_absent_watcher_block_means_enabled() {
        let cfg: Config = serde_json::from_str(r#"{"watchers": {}}"#).unwrap();
        assert!(cfg.watchers.batch.enabled);
        assert!(cfg.watchers.exception.enabled);
    }

    #[test]
    fn test_explicit_disable() {
        let cfg: Config =
            serde_json::from_str(r#"{"watchers": {"batch": {"enabled": false}}}"#).unwrap();
        assert!(!cfg.watchers.batch.enabled);
        assert!(cfg.watchers.cache.enabled);
    }

    #[test]
    fn test_validate_rejects_zero_connections() {
        let mut cfg = Config::default();
        cfg.storage.max_connections = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut cfg = Config::default();
        cfg.watchers.log.level = "chatty".to_string();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(validate_config(&Config::default()).is_ok());
    }
}
