//! Log watcher
//!
//! A `tracing_subscriber` layer that turns emitted events into log-line
//! entries. Events are forwarded through an unbounded channel to a
//! background append task, so `on_event` never blocks the emitting code.

use super::Recorder;
use crate::config::LogWatcherConfig;
use crate::entry::{EntryKind, NewEntry};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

#[derive(Clone)]
pub struct LogWatcherLayer {
    sender: mpsc::UnboundedSender<NewEntry>,
    min_level: Level,
}

impl LogWatcherLayer {
    /// Build the layer and spawn its forwarding task. Must be called from
    /// within a tokio runtime.
    pub fn spawn(recorder: Recorder, config: &LogWatcherConfig) -> Self {
        let min_level = config.level.parse().unwrap_or(Level::INFO);
        let (sender, mut receiver) = mpsc::unbounded_channel::<NewEntry>();

        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                recorder.record(entry).await;
            }
        });

        Self { sender, min_level }
    }
}

impl<S> Layer<S> for LogWatcherLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.min_level {
            return;
        }
        // Never capture this crate's own diagnostics: a failed append logs
        // a warning, which must not feed back into the log.
        if metadata.target().starts_with(env!("CARGO_PKG_NAME")) {
            return;
        }

        struct FieldVisitor {
            message: Option<String>,
            fields: serde_json::Map<String, serde_json::Value>,
        }

        impl tracing::field::Visit for FieldVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                let rendered = format!("{:?}", value);
                if field.name() == "message" {
                    self.message = Some(rendered.trim_matches('"').to_string());
                } else {
                    self.fields.insert(
                        field.name().to_string(),
                        serde_json::Value::String(rendered),
                    );
                }
            }

            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                } else {
                    self.fields.insert(
                        field.name().to_string(),
                        serde_json::Value::String(value.to_string()),
                    );
                }
            }
        }

        let mut visitor = FieldVisitor {
            message: None,
            fields: serde_json::Map::new(),
        };
        event.record(&mut visitor);

        let entry = NewEntry::new(
            EntryKind::LogLine,
            json!({
                "level": metadata.level().to_string(),
                "target": metadata.target(),
                "message": visitor.message.unwrap_or_default(),
                "fields": visitor.fields,
            }),
        )
        .with_name(metadata.target());

        let _ = self.sender.send(entry);
    }
}
