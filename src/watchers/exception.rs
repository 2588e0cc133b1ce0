//! Exception watcher
//!
//! Manual-only: errors are reported by the host, not intercepted. Entries
//! start unresolved and are the only kind the store accepts resolution
//! changes for.

use super::Recorder;
use crate::entry::{EntryKind, NewEntry, OutcomeStatus};
use serde_json::json;

pub struct ExceptionWatcher {
    recorder: Recorder,
}

impl ExceptionWatcher {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }

    /// Record an error with its full source chain.
    pub async fn track(
        &self,
        error: &(dyn std::error::Error + 'static),
        tags: &[String],
    ) -> Option<u64> {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        let entry = NewEntry::new(
            EntryKind::Exception,
            json!({
                "message": error.to_string(),
                "chain": chain,
                "status": OutcomeStatus::Failed,
            }),
        )
        .with_name(error.to_string())
        .with_status(OutcomeStatus::Failed)
        .with_tags(tags.iter().cloned());

        self.recorder.record(entry).await
    }

    /// Record a plain error message observed out-of-band.
    pub async fn report(&self, message: &str, tags: &[String]) -> Option<u64> {
        let entry = NewEntry::new(
            EntryKind::Exception,
            json!({
                "message": message,
                "chain": [],
                "status": OutcomeStatus::Failed,
            }),
        )
        .with_name(message)
        .with_status(OutcomeStatus::Failed)
        .with_tags(tags.iter().cloned());

        self.recorder.record(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntryStore;
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("request handling failed")]
    struct OuterError {
        #[source]
        cause: InnerError,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("connection reset")]
    struct InnerError;

    #[tokio::test]
    async fn test_source_chain_captured() {
        let store = Arc::new(EntryStore::in_memory().await.unwrap());
        let watcher = ExceptionWatcher::new(Recorder::new(store.clone()));

        let error = OuterError { cause: InnerError };
        let sequence = watcher
            .track(&error, &["request:abc".to_string()])
            .await
            .unwrap();

        let entry = store.get_by_id(sequence).await.unwrap();
        assert_eq!(entry.kind, EntryKind::Exception);
        assert_eq!(entry.payload["message"], json!("request handling failed"));
        assert_eq!(entry.payload["chain"], json!(["connection reset"]));
        assert_eq!(entry.resolved, Some(false));
        assert_eq!(entry.tags, vec!["request:abc".to_string()]);
    }

    #[tokio::test]
    async fn test_reported_exception_is_resolvable() {
        let store = Arc::new(EntryStore::in_memory().await.unwrap());
        let watcher = ExceptionWatcher::new(Recorder::new(store.clone()));

        let sequence = watcher.report("panic in worker", &[]).await.unwrap();
        store.resolve_entry(sequence).await.unwrap();

        let entry = store.get_by_id(sequence).await.unwrap();
        assert_eq!(entry.resolved, Some(true));
    }
}
