//! Outbound HTTP watcher
//!
//! Wraps an HTTP dispatcher: one entry per outbound call with method, URI,
//! status code and duration. Transport failures (no response at all) are
//! recorded as failed with no numeric code.

use super::Recorder;
use crate::config::HttpClientWatcherConfig;
use crate::entry::{EntryKind, NewEntry, OutcomeStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// Capability trait the host's HTTP client is adapted to.
#[async_trait]
pub trait HttpDispatcher: Send + Sync {
    async fn dispatch(&self, request: &OutboundRequest) -> anyhow::Result<OutboundResponse>;
}

/// Dispatcher backed by a shared `reqwest::Client`.
pub struct ReqwestDispatcher {
    client: reqwest::Client,
}

impl ReqwestDispatcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestDispatcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpDispatcher for ReqwestDispatcher {
    async fn dispatch(&self, request: &OutboundRequest) -> anyhow::Result<OutboundResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())?;
        let mut builder = self.client.request(method, &request.uri);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response.json::<Value>().await.ok();

        Ok(OutboundResponse {
            status,
            headers,
            body,
        })
    }
}

/// Structured fields for manual tracking.
#[derive(Debug, Clone)]
pub struct HttpClientRecord {
    pub method: String,
    pub uri: String,
    pub status_code: Option<u16>,
    pub duration_ms: i64,
}

#[derive(Clone)]
pub struct HttpClientWatcher {
    recorder: Recorder,
    #[allow(dead_code)]
    config: HttpClientWatcherConfig,
}

impl HttpClientWatcher {
    pub fn new(recorder: Recorder, config: HttpClientWatcherConfig) -> Self {
        Self { recorder, config }
    }

    pub fn wrap(&self, target: Arc<dyn HttpDispatcher>) -> Arc<dyn HttpDispatcher> {
        Arc::new(InstrumentedDispatcher {
            inner: target,
            watcher: self.clone(),
        })
    }

    pub async fn track(&self, record: HttpClientRecord) -> Option<u64> {
        let entry = build_entry(
            &record.method,
            &record.uri,
            record.status_code,
            record.duration_ms,
            None,
        );
        self.recorder.record(entry).await
    }
}

struct InstrumentedDispatcher {
    inner: Arc<dyn HttpDispatcher>,
    watcher: HttpClientWatcher,
}

#[async_trait]
impl HttpDispatcher for InstrumentedDispatcher {
    async fn dispatch(&self, request: &OutboundRequest) -> anyhow::Result<OutboundResponse> {
        let started = Instant::now();
        let result = self.inner.dispatch(request).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let entry = match &result {
            Ok(response) => build_entry(
                &request.method,
                &request.uri,
                Some(response.status),
                duration_ms,
                None,
            ),
            Err(err) => build_entry(
                &request.method,
                &request.uri,
                None,
                duration_ms,
                Some(err.to_string()),
            ),
        };
        self.watcher.recorder.record(entry).await;

        result
    }
}

fn build_entry(
    method: &str,
    uri: &str,
    status_code: Option<u16>,
    duration_ms: i64,
    error: Option<String>,
) -> NewEntry {
    // 4xx/5xx responses are failures with a code; transport errors are
    // failures with no code.
    let status = match status_code {
        Some(code) if code < 400 => OutcomeStatus::Completed,
        _ => OutcomeStatus::Failed,
    };

    let mut payload = json!({
        "method": method.to_uppercase(),
        "uri": uri,
        "durationMs": duration_ms,
        "status": status,
    });
    let map = payload.as_object_mut().expect("payload is an object");
    if let Some(code) = status_code {
        map.insert("statusCode".to_string(), json!(code));
    }
    if let Some(error) = error {
        map.insert("errors".to_string(), json!([error]));
    }

    let mut entry = NewEntry::new(EntryKind::HttpClientCall, payload)
        .with_name(uri)
        .with_method(method.to_uppercase())
        .with_status(status)
        .with_duration_ms(duration_ms);
    if let Some(code) = status_code {
        entry = entry.with_status_code(code as i64);
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntryStore;

    struct FixedDispatcher {
        status: u16,
    }

    #[async_trait]
    impl HttpDispatcher for FixedDispatcher {
        async fn dispatch(&self, _request: &OutboundRequest) -> anyhow::Result<OutboundResponse> {
            Ok(OutboundResponse {
                status: self.status,
                headers: BTreeMap::new(),
                body: None,
            })
        }
    }

    struct BrokenDispatcher;

    #[async_trait]
    impl HttpDispatcher for BrokenDispatcher {
        async fn dispatch(&self, _request: &OutboundRequest) -> anyhow::Result<OutboundResponse> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_response_status_recorded() {
        let store = Arc::new(EntryStore::in_memory().await.unwrap());
        let watcher = Arc::new(HttpClientWatcher::new(
            Recorder::new(store.clone()),
            HttpClientWatcherConfig::default(),
        ));
        let dispatcher = watcher.wrap(Arc::new(FixedDispatcher { status: 201 }));

        let response = dispatcher
            .dispatch(&OutboundRequest::new("post", "https://api.example.com/users"))
            .await
            .unwrap();
        assert_eq!(response.status, 201);

        let entry = store.get_by_id(1).await.unwrap();
        assert_eq!(entry.kind, EntryKind::HttpClientCall);
        assert_eq!(entry.payload["method"], json!("POST"));
        assert_eq!(entry.payload["statusCode"], json!(201));
        assert_eq!(entry.payload["status"], json!("completed"));
    }

    #[tokio::test]
    async fn test_transport_error_has_no_code() {
        let store = Arc::new(EntryStore::in_memory().await.unwrap());
        let watcher = Arc::new(HttpClientWatcher::new(
            Recorder::new(store.clone()),
            HttpClientWatcherConfig::default(),
        ));
        let dispatcher = watcher.wrap(Arc::new(BrokenDispatcher));

        let err = dispatcher
            .dispatch(&OutboundRequest::new("get", "https://unreachable.example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "connection refused");

        let entry = store.get_by_id(1).await.unwrap();
        assert_eq!(entry.payload["status"], json!("failed"));
        assert!(entry.payload.get("statusCode").is_none());
    }
}
