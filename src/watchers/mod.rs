//! Watchers: transparent instrumentation of host subsystems
//!
//! Each watcher wraps one subsystem's capability trait with a decorator
//! that measures the call, extracts a payload, and appends exactly one
//! entry — returning the original result unchanged. Wrapping happens once
//! at setup time; targets are optional and their absence degrades to
//! manual tracking.

pub mod batch;
pub mod cache;
pub mod exception;
pub mod http_client;
pub mod log;
pub mod mail;
pub mod outcome;
pub mod query;
pub mod queue;
pub mod registry;

pub use batch::{BatchJob, BatchProcessor, BatchRecord, BatchWatcher};
pub use cache::{CacheRecord, CacheStore, CacheWatcher};
pub use exception::ExceptionWatcher;
pub use http_client::{
    HttpClientRecord, HttpClientWatcher, HttpDispatcher, OutboundRequest, OutboundResponse,
    ReqwestDispatcher,
};
pub use log::LogWatcherLayer;
pub use mail::{Mailer, MailRecord, MailWatcher, OutgoingMail};
pub use outcome::BatchOutcome;
pub use query::{QueryExecutor, QueryRecord, QueryWatcher};
pub use queue::{JobQueue, QueuedJob, QueueRecord, QueueWatcher};
pub use registry::{InstalledWatchers, TargetPool, WatcherRegistry};

use crate::entry::NewEntry;
use crate::store::EntryStore;
use std::sync::Arc;
use std::time::Instant;

/// The single write path shared by all watchers.
///
/// Append failures are swallowed here: the instrumented call must never see
/// a telemetry failure. They are logged and counted instead.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<EntryStore>,
}

impl Recorder {
    pub fn new(store: Arc<EntryStore>) -> Self {
        Self { store }
    }

    /// Append an entry, returning its sequence on success.
    pub async fn record(&self, entry: NewEntry) -> Option<u64> {
        let kind = entry.kind;
        match self.store.append(entry).await {
            Ok(sequence) => {
                crate::metrics::record_entry_appended(kind.as_str());
                Some(sequence)
            }
            Err(err) => {
                tracing::warn!(kind = %kind, error = %err, "Failed to record telemetry entry");
                crate::metrics::record_append_failure(kind.as_str());
                None
            }
        }
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }
}

/// Records a failure entry if the instrumented future is dropped before
/// completion (host-side cancellation). The wrapper disarms it on the
/// normal paths; on drop the pending entry is finalized with the elapsed
/// time and recorded from a spawned task.
pub(crate) struct CancellationGuard {
    recorder: Recorder,
    started: Instant,
    entry: Option<NewEntry>,
}

impl CancellationGuard {
    pub(crate) fn arm(recorder: &Recorder, entry: NewEntry) -> Self {
        Self {
            recorder: recorder.clone(),
            started: Instant::now(),
            entry: Some(entry),
        }
    }

    pub(crate) fn disarm(mut self) {
        self.entry = None;
    }
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        if let Some(mut entry) = self.entry.take() {
            entry.duration_ms = Some(self.started.elapsed().as_millis() as i64);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let recorder = self.recorder.clone();
                handle.spawn(async move {
                    recorder.record(entry).await;
                });
            }
        }
    }
}
