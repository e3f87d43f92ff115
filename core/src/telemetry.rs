// Logging setup and pipeline counters
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG` (default `info`). Returns `false` when a subscriber was
/// already installed, which is harmless.
pub fn init_tracing() -> bool {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
        .is_ok()
}

/// Counters shared by every stage of the pipeline
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    messages_received: AtomicU64,
    parse_failures: AtomicU64,
    reconnects: AtomicU64,
    events_ingested: AtomicU64,
    batches_flushed: AtomicU64,
    events_archived: AtomicU64,
    archive_failures: AtomicU64,
    records_pruned: AtomicU64,
    rebuilds: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub parse_failures: u64,
    pub reconnects: u64,
    pub events_ingested: u64,
    pub batches_flushed: u64,
    pub events_archived: u64,
    pub archive_failures: u64,
    pub records_pruned: u64,
    pub rebuilds: u64,
}

impl PipelineMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, events: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.events_ingested.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_archived(&self, events: usize) {
        self.events_archived.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_archive_failure(&self) {
        self.archive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pruned(&self, records: usize) {
        self.records_pruned.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_rebuild(&self) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            events_archived: self.events_archived.load(Ordering::Relaxed),
            archive_failures: self.archive_failures.load(Ordering::Relaxed),
            records_pruned: self.records_pruned.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
        }
    }
}
