// Buffer & Archive Tests
// Eviction bound, archive completeness and retention against both archive
// backends.

use flowscope_core::buffer::{ArchiveStore, EventBuffer, InMemoryArchiveStore, RocksArchiveStore};
use flowscope_core::config::BufferConfig;
use flowscope_core::event::{Event, EventKind, SharedEvent};
use flowscope_core::ingest::Batch;
use flowscope_core::telemetry::PipelineMetrics;
use std::sync::Arc;
use tempfile::tempdir;

fn events(count: usize) -> Vec<SharedEvent> {
    (0..count)
        .map(|i| {
            Arc::new(
                Event::new(format!("evt-{:04}", i), EventKind::Request, i as i64, format!("/route/{}", i % 4))
                    .with_status(200),
            )
        })
        .collect()
}

fn config(capacity: usize, retention: usize) -> BufferConfig {
    BufferConfig {
        capacity,
        eviction_multiplier: 2,
        archive_retention: retention,
        archive_path: None,
    }
}

fn ids(events: &[SharedEvent]) -> Vec<String> {
    events.iter().map(|e| e.id.clone()).collect()
}

async fn assert_history_complete(store: Arc<dyn ArchiveStore>) {
    let mut buffer = EventBuffer::with_archive(&config(10, 1_000), store, PipelineMetrics::shared());
    let all = events(137);

    for chunk in all.chunks(7) {
        buffer.append(Batch::new(chunk.to_vec()));
        assert!(buffer.len() < buffer.eviction_threshold());
    }
    buffer.flush_archive().await;

    let history = buffer.history().await.unwrap();
    assert_eq!(ids(&history), ids(&all));
}

#[tokio::test]
async fn test_history_complete_in_memory() {
    assert_history_complete(Arc::new(InMemoryArchiveStore::new())).await;
}

#[tokio::test]
async fn test_history_complete_rocksdb() {
    let dir = tempdir().unwrap();
    let store = RocksArchiveStore::open(dir.path()).unwrap();
    assert_history_complete(store).await;
}

#[tokio::test]
async fn test_each_record_is_oldest_contiguous_slice() {
    let store = Arc::new(InMemoryArchiveStore::new());
    let mut buffer = EventBuffer::with_archive(&config(25, 100), store.clone(), PipelineMetrics::shared());
    let all = events(120);
    buffer.append(Batch::new(all.clone()));
    buffer.flush_archive().await;

    let metas = store.list_record_metadata().await.unwrap();
    assert_eq!(metas.len(), 3);
    for (n, meta) in metas.iter().enumerate() {
        assert_eq!(meta.count, 25);
        let record = store.load_record(meta.id).await.unwrap().unwrap();
        assert_eq!(ids(&record.events), ids(&all[n * 25..(n + 1) * 25]));
    }
    assert_eq!(ids(&buffer.get_all()), ids(&all[75..]));
}

#[tokio::test]
async fn test_retention_bounds_rocksdb_records() {
    let dir = tempdir().unwrap();
    let metrics = PipelineMetrics::shared();
    let store = RocksArchiveStore::open(dir.path()).unwrap();
    let mut buffer = EventBuffer::with_archive(&config(5, 3), store.clone(), Arc::clone(&metrics));

    // The first chunk evicts 5, every later one 10: 11 records in total
    for chunk in events(60).chunks(10) {
        buffer.append(Batch::new(chunk.to_vec()));
    }
    buffer.flush_archive().await;

    let metas = store.list_record_metadata().await.unwrap();
    assert_eq!(metas.len(), 3);
    assert!(metas.windows(2).all(|w| w[0].id < w[1].id));

    let history = buffer.history().await.unwrap();
    assert_eq!(ids(&history), ids(&events(60)[40..]));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.events_archived, 55);
    assert_eq!(snapshot.records_pruned, 8);
}

#[tokio::test]
async fn test_clear_wipes_archive_and_buffer() {
    let dir = tempdir().unwrap();
    let store = RocksArchiveStore::open(dir.path()).unwrap();
    let mut buffer = EventBuffer::with_archive(&config(5, 10), store.clone(), PipelineMetrics::shared());
    buffer.append(Batch::new(events(30)));
    buffer.clear();
    buffer.flush_archive().await;

    assert!(buffer.is_empty());
    assert!(store.list_record_metadata().await.unwrap().is_empty());
    assert!(buffer.history().await.unwrap().is_empty());
}
