//! Durable archive of evicted event batches.
//!
//! Records are addressed by a monotonically increasing `u64`, so ordering by
//! id is ordering by eviction time. Listing metadata never loads payloads.

use crate::event::SharedEvent;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

/// A batch evicted from memory, waiting to be written
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveBatch {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub events: Vec<SharedEvent>,
}

/// A stored archive record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: u64,
    pub timestamp: i64,
    pub events: Vec<SharedEvent>,
}

/// Cheap summary of a stored record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub id: u64,
    pub timestamp: i64,
    pub count: usize,
}

/// Durable log collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Persist a batch and return its new id
    async fn append_record(&self, batch: ArchiveBatch) -> Result<u64>;

    /// Metadata of every record, oldest first
    async fn list_record_metadata(&self) -> Result<Vec<ArchiveMeta>>;

    async fn load_record(&self, id: u64) -> Result<Option<ArchiveRecord>>;

    async fn delete_record(&self, id: u64) -> Result<()>;

    async fn clear_all(&self) -> Result<()>;
}

/// In-memory archive. Suitable for tests and deployments without disk.
#[derive(Default)]
pub struct InMemoryArchiveStore {
    records: RwLock<BTreeMap<u64, ArchiveRecord>>,
    next_id: AtomicU64,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
    async fn append_record(&self, batch: ArchiveBatch) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        trace!(id, count = batch.events.len(), "Archiving batch in memory");
        self.records.write().await.insert(
            id,
            ArchiveRecord {
                id,
                timestamp: batch.timestamp,
                events: batch.events,
            },
        );
        Ok(id)
    }

    async fn list_record_metadata(&self) -> Result<Vec<ArchiveMeta>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .map(|record| ArchiveMeta {
                id: record.id,
                timestamp: record.timestamp,
                count: record.events.len(),
            })
            .collect())
    }

    async fn load_record(&self, id: u64) -> Result<Option<ArchiveRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn delete_record(&self, id: u64) -> Result<()> {
        self.records.write().await.remove(&id);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }
}
