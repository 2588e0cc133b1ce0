//! Telemetry entry data model
//!
//! Entries are the unit of storage: one recorded observation of a call or
//! event, positioned in the log by a monotonically increasing sequence
//! number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of entry kinds.
///
/// The kind is fixed at write time and determines the shape of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Request,
    Query,
    Cache,
    Batch,
    Job,
    Mail,
    Notification,
    RedisCommand,
    Schedule,
    ViewRender,
    GraphqlOperation,
    FeatureGate,
    ModelEvent,
    DomainEvent,
    LogLine,
    Exception,
    HttpClientCall,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Query => "query",
            Self::Cache => "cache",
            Self::Batch => "batch",
            Self::Job => "job",
            Self::Mail => "mail",
            Self::Notification => "notification",
            Self::RedisCommand => "redis-command",
            Self::Schedule => "schedule",
            Self::ViewRender => "view-render",
            Self::GraphqlOperation => "graphql-operation",
            Self::FeatureGate => "feature-gate",
            Self::ModelEvent => "model-event",
            Self::DomainEvent => "domain-event",
            Self::LogLine => "log-line",
            Self::Exception => "exception",
            Self::HttpClientCall => "http-client-call",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value {
            "request" => Self::Request,
            "query" => Self::Query,
            "cache" => Self::Cache,
            "batch" => Self::Batch,
            "job" => Self::Job,
            "mail" => Self::Mail,
            "notification" => Self::Notification,
            "redis-command" => Self::RedisCommand,
            "schedule" => Self::Schedule,
            "view-render" => Self::ViewRender,
            "graphql-operation" => Self::GraphqlOperation,
            "feature-gate" => Self::FeatureGate,
            "model-event" => Self::ModelEvent,
            "domain-event" => Self::DomainEvent,
            "log-line" => Self::LogLine,
            "exception" => Self::Exception,
            "http-client-call" => Self::HttpClientCall,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an instrumented call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Partial,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// A stored telemetry entry.
///
/// Everything except `resolved` is immutable once written; `resolved` is
/// meaningful only for [`EntryKind::Exception`] entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEntry {
    pub sequence: u64,
    pub kind: EntryKind,
    pub payload: serde_json::Value,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
}

/// An entry about to be appended.
///
/// Besides the kind-specific payload, watchers may set indexed fields
/// (`name`, `method`, `status`, `status_code`, `duration_ms`) so the store
/// can filter without opening the payload JSON.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub kind: EntryKind,
    pub payload: serde_json::Value,
    pub tags: Vec<String>,
    pub name: Option<String>,
    pub method: Option<String>,
    pub status: Option<String>,
    pub status_code: Option<i64>,
    pub duration_ms: Option<i64>,
}

impl NewEntry {
    pub fn new(kind: EntryKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            tags: Vec::new(),
            name: None,
            method: None,
            status: None,
            status_code: None,
            duration_ms: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_status(mut self, status: OutcomeStatus) -> Self {
        self.status = Some(status.as_str().to_string());
        self
    }

    pub fn with_status_code(mut self, code: i64) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
