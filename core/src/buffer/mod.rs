// Bounded event buffer with overflow archival
//
// The buffer keeps events in arrival order. Once it holds
// `capacity * eviction_multiplier` events the oldest `capacity` are cut off
// and handed to a background archiver. Archival is best effort: the cut
// happens whether or not the write later succeeds.

mod archive;
mod rocks;

pub use archive::{ArchiveBatch, ArchiveMeta, ArchiveRecord, ArchiveStore, InMemoryArchiveStore};
pub use rocks::RocksArchiveStore;

#[cfg(test)]
pub use archive::MockArchiveStore;

use crate::config::BufferConfig;
use crate::event::SharedEvent;
use crate::ingest::Batch;
use crate::telemetry::PipelineMetrics;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum ArchiveJob {
    Write(ArchiveBatch),
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Serializes archive writes in eviction order on a single task
struct Archiver {
    jobs: mpsc::UnboundedSender<ArchiveJob>,
    task: JoinHandle<()>,
}

impl Archiver {
    fn spawn(store: Arc<dyn ArchiveStore>, retention: usize, metrics: Arc<PipelineMetrics>) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    ArchiveJob::Write(batch) => {
                        write_and_prune(store.as_ref(), batch, retention, &metrics).await
                    }
                    ArchiveJob::Clear => {
                        if let Err(e) = store.clear_all().await {
                            warn!(target: "archive", error = %e, "Archive wipe failed");
                        } else {
                            info!(target: "archive", "Archive cleared");
                        }
                    }
                    ArchiveJob::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { jobs, task }
    }

    fn submit(&self, job: ArchiveJob) {
        if self.jobs.send(job).is_err() {
            warn!(target: "archive", "Archiver stopped; job dropped");
        }
    }
}

impl Drop for Archiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write_and_prune(
    store: &dyn ArchiveStore,
    batch: ArchiveBatch,
    retention: usize,
    metrics: &PipelineMetrics,
) {
    let count = batch.events.len();
    let id = match store.append_record(batch).await {
        Ok(id) => id,
        Err(e) => {
            metrics.record_archive_failure();
            error!(target: "archive", error = %e, count, "Archive write failed; evicted events dropped");
            return;
        }
    };
    metrics.record_archived(count);
    debug!(target: "archive", id, count, "Archived evicted events");

    let metas = match store.list_record_metadata().await {
        Ok(metas) => metas,
        Err(e) => {
            warn!(target: "archive", error = %e, "Archive listing failed; prune skipped");
            return;
        }
    };
    if metas.len() <= retention {
        return;
    }
    let excess = metas.len() - retention;
    let mut pruned = 0;
    for meta in metas.iter().take(excess) {
        match store.delete_record(meta.id).await {
            Ok(()) => pruned += 1,
            Err(e) => warn!(target: "archive", id = meta.id, error = %e, "Archive prune failed"),
        }
    }
    metrics.record_pruned(pruned);
    debug!(target: "archive", pruned, "Pruned archive records");
}

/// The canonical in-memory event log.
///
/// Readers get cheap `Arc` snapshots; appending copies the backing vector only
/// while a snapshot is still held elsewhere.
pub struct EventBuffer {
    events: Arc<Vec<SharedEvent>>,
    capacity: usize,
    eviction_multiplier: usize,
    store: Option<Arc<dyn ArchiveStore>>,
    archiver: Option<Archiver>,
    metrics: Arc<PipelineMetrics>,
}

impl EventBuffer {
    /// Buffer without an archive: evicted events are discarded
    pub fn new(config: &BufferConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            events: Arc::new(Vec::new()),
            capacity: config.capacity.max(1),
            eviction_multiplier: config.eviction_multiplier.max(2),
            store: None,
            archiver: None,
            metrics,
        }
    }

    /// Buffer that archives evicted events to `store`. Must be called inside
    /// a tokio runtime.
    pub fn with_archive(
        config: &BufferConfig,
        store: Arc<dyn ArchiveStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let archiver = Archiver::spawn(
            Arc::clone(&store),
            config.archive_retention.max(1),
            Arc::clone(&metrics),
        );
        Self {
            store: Some(store),
            archiver: Some(archiver),
            ..Self::new(config, metrics)
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length at which an eviction fires
    pub fn eviction_threshold(&self) -> usize {
        self.capacity * self.eviction_multiplier
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Snapshot of the buffer in arrival order
    pub fn get_all(&self) -> Arc<Vec<SharedEvent>> {
        Arc::clone(&self.events)
    }

    /// Append a batch, evicting as needed. Returns the number of events evicted.
    pub fn append(&mut self, batch: Batch) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let events = Arc::make_mut(&mut self.events);
        events.extend(batch.into_events());

        let threshold = self.capacity * self.eviction_multiplier;
        let mut evicted = 0;
        while events.len() >= threshold {
            let oldest: Vec<SharedEvent> = events.drain(..self.capacity).collect();
            evicted += oldest.len();
            match &self.archiver {
                Some(archiver) => archiver.submit(ArchiveJob::Write(ArchiveBatch {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    events: oldest,
                })),
                None => debug!(count = oldest.len(), "Evicted events discarded"),
            }
        }
        if evicted > 0 {
            info!(evicted, remaining = events.len(), "Buffer over threshold; oldest events evicted");
        }
        evicted
    }

    /// Empty the buffer and wipe the archive (best effort)
    pub fn clear(&mut self) {
        self.events = Arc::new(Vec::new());
        if let Some(archiver) = &self.archiver {
            archiver.submit(ArchiveJob::Clear);
        }
        info!("Event buffer cleared");
    }

    /// Wait until every archive job submitted so far has been processed
    pub async fn flush_archive(&self) {
        if let Some(archiver) = &self.archiver {
            let (done, wait) = oneshot::channel();
            archiver.submit(ArchiveJob::Flush(done));
            let _ = wait.await;
        }
    }

    /// Full history: every archived record oldest-first, then the live buffer.
    ///
    /// Reflects only writes that have completed; call
    /// [`EventBuffer::flush_archive`] first for an exact view.
    pub async fn history(&self) -> Result<Vec<SharedEvent>> {
        let mut history = Vec::new();
        if let Some(store) = &self.store {
            for meta in store.list_record_metadata().await? {
                if let Some(record) = store.load_record(meta.id).await? {
                    history.extend(record.events);
                }
            }
        }
        history.extend(self.events.iter().cloned());
        Ok(history)
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKind};
    use crate::FlowscopeError;

    fn config(capacity: usize, retention: usize) -> BufferConfig {
        BufferConfig {
            capacity,
            eviction_multiplier: 2,
            archive_retention: retention,
            archive_path: None,
        }
    }

    fn batch(start: usize, count: usize) -> Batch {
        (start..start + count)
            .map(|i| Event::new(format!("e{}", i), EventKind::Request, i as i64, "/a"))
            .collect()
    }

    #[test]
    fn never_exceeds_threshold_without_archive() {
        let mut buffer = EventBuffer::new(&config(10, 5), PipelineMetrics::shared());
        let mut next = 0;
        for size in [3, 7, 9, 1, 25, 4, 13] {
            buffer.append(batch(next, size));
            next += size;
            assert!(buffer.len() < buffer.eviction_threshold());
        }
        // newest event is always the last appended
        assert_eq!(buffer.get_all().last().unwrap().id, format!("e{}", next - 1));
    }

    #[test]
    fn snapshots_are_unaffected_by_later_appends() {
        let mut buffer = EventBuffer::new(&config(100, 5), PipelineMetrics::shared());
        buffer.append(batch(0, 5));
        let snapshot = buffer.get_all();
        buffer.append(batch(5, 5));
        assert_eq!(snapshot.len(), 5);
        assert_eq!(buffer.len(), 10);
    }

    #[tokio::test]
    async fn eviction_archives_oldest_slice() {
        let store = Arc::new(InMemoryArchiveStore::new());
        let mut buffer = EventBuffer::with_archive(&config(4, 10), store.clone(), PipelineMetrics::shared());

        assert_eq!(buffer.append(batch(0, 7)), 0);
        assert_eq!(buffer.append(batch(7, 1)), 4);
        buffer.flush_archive().await;

        let metas = store.list_record_metadata().await.unwrap();
        assert_eq!(metas.len(), 1);
        let record = store.load_record(metas[0].id).await.unwrap().unwrap();
        let ids: Vec<_> = record.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e0", "e1", "e2", "e3"]);
        assert_eq!(buffer.get_all()[0].id, "e4");
    }

    #[tokio::test]
    async fn prunes_to_retention() {
        let store = Arc::new(InMemoryArchiveStore::new());
        let metrics = PipelineMetrics::shared();
        let mut buffer = EventBuffer::with_archive(&config(2, 3), store.clone(), metrics.clone());
        for i in 0..10 {
            buffer.append(batch(i * 2, 2));
        }
        buffer.flush_archive().await;

        let metas = store.list_record_metadata().await.unwrap();
        assert_eq!(metas.len(), 3);
        // survivors are the newest records
        assert!(metas.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(metrics.snapshot().records_pruned, 6);
    }

    #[tokio::test]
    async fn archive_failure_does_not_block_truncation() {
        let mut store = MockArchiveStore::new();
        store
            .expect_append_record()
            .returning(|_| Err(FlowscopeError::Archive("disk full".into())));
        store.expect_list_record_metadata().never();

        let metrics = PipelineMetrics::shared();
        let mut buffer = EventBuffer::with_archive(&config(5, 3), Arc::new(store), metrics.clone());
        buffer.append(batch(0, 10));
        buffer.append(batch(10, 10));
        buffer.flush_archive().await;

        assert!(buffer.len() < buffer.eviction_threshold());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.archive_failures, 3);
        assert_eq!(snapshot.events_archived, 0);
    }

    #[tokio::test]
    async fn clear_wipes_buffer_and_archive() {
        let store = Arc::new(InMemoryArchiveStore::new());
        let mut buffer = EventBuffer::with_archive(&config(2, 5), store.clone(), PipelineMetrics::shared());
        buffer.append(batch(0, 5));
        buffer.clear();
        buffer.flush_archive().await;

        assert!(buffer.is_empty());
        assert!(store.list_record_metadata().await.unwrap().is_empty());
    }
}
