//! RocksDB-backed archive store.
//!
//! Column families:
//! - `records`: id -> full record (JSON)
//! - `record_meta`: id -> metadata (JSON), so listing skips payloads
//!
//! Keys are big-endian ids, so iteration order is insertion order.

use super::archive::{ArchiveBatch, ArchiveMeta, ArchiveRecord, ArchiveStore};
use crate::{FlowscopeError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const CF_RECORDS: &str = "records";
const CF_META: &str = "record_meta";

pub struct RocksArchiveStore {
    db: DB,
    next_id: AtomicU64,
}

impl RocksArchiveStore {
    /// Open (or create) the archive at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_RECORDS, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| FlowscopeError::Storage(e.to_string()))?;

        let next_id = {
            let cf = db
                .cf_handle(CF_META)
                .ok_or_else(|| FlowscopeError::Storage(format!("Missing CF: {}", CF_META)))?;
            let last = db.iterator_cf(cf, IteratorMode::End).next();
            match last {
                Some(Ok((key, _))) => decode_key(&key)? + 1,
                Some(Err(e)) => return Err(FlowscopeError::Storage(e.to_string())),
                None => 0,
            }
        };

        info!(next_id, "RocksArchiveStore initialized");
        Ok(Arc::new(Self {
            db,
            next_id: AtomicU64::new(next_id),
        }))
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| FlowscopeError::Storage(format!("Missing CF: {}", name)))
    }
}

fn decode_key(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| FlowscopeError::Archive(format!("bad record key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl ArchiveStore for RocksArchiveStore {
    async fn append_record(&self, batch: ArchiveBatch) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let meta = ArchiveMeta {
            id,
            timestamp: batch.timestamp,
            count: batch.events.len(),
        };
        let record = ArchiveRecord {
            id,
            timestamp: batch.timestamp,
            events: batch.events,
        };

        let key = id.to_be_bytes();
        let mut write = WriteBatch::default();
        write.put_cf(self.cf(CF_RECORDS)?, key, serde_json::to_vec(&record)?);
        write.put_cf(self.cf(CF_META)?, key, serde_json::to_vec(&meta)?);
        self.db
            .write(write)
            .map_err(|e| FlowscopeError::Storage(e.to_string()))?;

        debug!(id, count = meta.count, "Stored archive record");
        Ok(id)
    }

    async fn list_record_metadata(&self) -> Result<Vec<ArchiveMeta>> {
        let cf = self.cf(CF_META)?;
        let mut metas = Vec::new();
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = entry.map_err(|e| FlowscopeError::Storage(e.to_string()))?;
            metas.push(serde_json::from_slice(&value)?);
        }
        Ok(metas)
    }

    async fn load_record(&self, id: u64) -> Result<Option<ArchiveRecord>> {
        match self.db.get_cf(self.cf(CF_RECORDS)?, id.to_be_bytes()) {
            Ok(Some(data)) => Ok(Some(serde_json::from_slice(&data)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(FlowscopeError::Storage(e.to_string())),
        }
    }

    async fn delete_record(&self, id: u64) -> Result<()> {
        let key = id.to_be_bytes();
        let mut write = WriteBatch::default();
        write.delete_cf(self.cf(CF_RECORDS)?, key);
        write.delete_cf(self.cf(CF_META)?, key);
        self.db
            .write(write)
            .map_err(|e| FlowscopeError::Storage(e.to_string()))
    }

    async fn clear_all(&self) -> Result<()> {
        let meta_cf = self.cf(CF_META)?;
        let records_cf = self.cf(CF_RECORDS)?;
        let mut write = WriteBatch::default();
        for entry in self.db.iterator_cf(meta_cf, IteratorMode::Start) {
            let (key, _) = entry.map_err(|e| FlowscopeError::Storage(e.to_string()))?;
            write.delete_cf(records_cf, &key);
            write.delete_cf(meta_cf, &key);
        }
        self.db
            .write(write)
            .map_err(|e| FlowscopeError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKind};
    use tempfile::tempdir;

    fn batch(prefix: &str, count: usize) -> ArchiveBatch {
        ArchiveBatch {
            timestamp: 42,
            events: (0..count)
                .map(|i| Arc::new(Event::new(format!("{}-{}", prefix, i), EventKind::Request, i as i64, "/r")))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let dir = tempdir().unwrap();
        let store = RocksArchiveStore::open(dir.path()).unwrap();

        let id = store.append_record(batch("a", 3)).await.unwrap();
        let record = store.load_record(id).await.unwrap().expect("record");
        assert_eq!(record.events.len(), 3);
        assert_eq!(record.events[2].id, "a-2");
        assert!(store.load_record(id + 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksArchiveStore::open(dir.path()).unwrap();
            store.append_record(batch("a", 1)).await.unwrap();
            store.append_record(batch("b", 1)).await.unwrap();
        }

        let store = RocksArchiveStore::open(dir.path()).unwrap();
        let id = store.append_record(batch("c", 1)).await.unwrap();
        assert_eq!(id, 2);

        let metas = store.list_record_metadata().await.unwrap();
        assert_eq!(metas.iter().map(|m| m.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = tempdir().unwrap();
        let store = RocksArchiveStore::open(dir.path()).unwrap();
        for i in 0..4 {
            store.append_record(batch(&format!("b{}", i), 2)).await.unwrap();
        }

        store.delete_record(0).await.unwrap();
        let metas = store.list_record_metadata().await.unwrap();
        assert_eq!(metas.len(), 3);
        assert_eq!(metas[0].id, 1);

        store.clear_all().await.unwrap();
        assert!(store.list_record_metadata().await.unwrap().is_empty());
        assert!(store.load_record(2).await.unwrap().is_none());
    }
}
