//! Mail watcher

use super::Recorder;
use crate::config::MailWatcherConfig;
use crate::entry::{EntryKind, NewEntry, OutcomeStatus};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    /// Name of the host-side mailable that produced this message.
    pub mailable: String,
}

/// Capability trait the host's mailer is adapted to.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()>;
}

/// Structured fields for manual tracking.
#[derive(Debug, Clone)]
pub struct MailRecord {
    pub mailable: String,
    pub to: Vec<String>,
    pub subject: String,
    pub duration_ms: i64,
}

#[derive(Clone)]
pub struct MailWatcher {
    recorder: Recorder,
    #[allow(dead_code)]
    config: MailWatcherConfig,
}

impl MailWatcher {
    pub fn new(recorder: Recorder, config: MailWatcherConfig) -> Self {
        Self { recorder, config }
    }

    pub fn wrap(&self, target: Arc<dyn Mailer>) -> Arc<dyn Mailer> {
        Arc::new(InstrumentedMailer {
            inner: target,
            watcher: self.clone(),
        })
    }

    pub async fn track(&self, record: MailRecord) -> Option<u64> {
        let entry = build_entry(
            &record.mailable,
            &record.to,
            &record.subject,
            OutcomeStatus::Completed,
            record.duration_ms,
            None,
        );
        self.recorder.record(entry).await
    }
}

struct InstrumentedMailer {
    inner: Arc<dyn Mailer>,
    watcher: MailWatcher,
}

#[async_trait]
impl Mailer for InstrumentedMailer {
    async fn send(&self, mail: &OutgoingMail) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = self.inner.send(mail).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (status, error) = match &result {
            Ok(()) => (OutcomeStatus::Completed, None),
            Err(err) => (OutcomeStatus::Failed, Some(err.to_string())),
        };
        let entry = build_entry(
            &mail.mailable,
            &mail.to,
            &mail.subject,
            status,
            duration_ms,
            error,
        );
        self.watcher.recorder.record(entry).await;

        result
    }
}

fn build_entry(
    mailable: &str,
    to: &[String],
    subject: &str,
    status: OutcomeStatus,
    duration_ms: i64,
    error: Option<String>,
) -> NewEntry {
    let mut payload = json!({
        "mailable": mailable,
        "to": to,
        "subject": subject,
        "durationMs": duration_ms,
        "status": status,
    });
    if let Some(error) = error {
        payload
            .as_object_mut()
            .expect("payload is an object")
            .insert("errors".to_string(), json!([error]));
    }

    NewEntry::new(EntryKind::Mail, payload)
        .with_name(mailable)
        .with_status(status)
        .with_duration_ms(duration_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntryStore;

    struct NullMailer;

    #[async_trait]
    impl Mailer for NullMailer {
        async fn send(&self, _mail: &OutgoingMail) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_recorded() {
        let store = Arc::new(EntryStore::in_memory().await.unwrap());
        let watcher = Arc::new(MailWatcher::new(
            Recorder::new(store.clone()),
            MailWatcherConfig::default(),
        ));
        let mailer = watcher.wrap(Arc::new(NullMailer));

        mailer
            .send(&OutgoingMail {
                to: vec!["user@example.com".to_string()],
                subject: "Welcome".to_string(),
                mailable: "WelcomeEmail".to_string(),
            })
            .await
            .unwrap();

        let entry = store.get_by_id(1).await.unwrap();
        assert_eq!(entry.kind, EntryKind::Mail);
        assert_eq!(entry.payload["mailable"], json!("WelcomeEmail"));
        assert_eq!(entry.payload["to"], json!(["user@example.com"]));
    }
}
