//! RocksDB-backed collections
//!
//! All collections share one database. Keys are `<collection>:<id>`, values are
//! JSON records carrying the version and insertion sequence. Writes run under a
//! per-collection mutex, which makes the version check and the put one step
//! for this process.

use super::{Collection, Document, SortOrder, Versioned};
use crate::errors::{StoreError, StoreResult};
use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Open (or create) the database shared by every collection
pub fn open_database<P: AsRef<Path>>(path: P) -> StoreResult<Arc<DB>> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

    let db = DB::open(&opts, path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
    Ok(Arc::new(db))
}

#[derive(Serialize, Deserialize)]
struct StoredRecord<D> {
    version: u64,
    seq: u64,
    document: D,
}

pub struct RocksCollection<D: Document> {
    db: Arc<DB>,
    sequence: AtomicU64,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> D>,
}

impl<D: Document> RocksCollection<D> {
    /// Resumes the insertion sequence from the records already stored
    pub fn new(db: Arc<DB>) -> StoreResult<Self> {
        let collection = Self {
            db,
            sequence: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        };
        let next = collection
            .scan()?
            .iter()
            .map(|record| record.seq + 1)
            .max()
            .unwrap_or(0);
        collection.sequence.store(next, Ordering::SeqCst);
        Ok(collection)
    }

    fn prefix() -> Vec<u8> {
        format!("{}:", D::COLLECTION).into_bytes()
    }

    fn key(id: &D::Id) -> Vec<u8> {
        format!("{}:{}", D::COLLECTION, id).into_bytes()
    }

    fn decode(bytes: &[u8]) -> StoreResult<StoredRecord<D>> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Codec(e.to_string()))
    }

    fn encode(record: &StoredRecord<D>) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| StoreError::Codec(e.to_string()))
    }

    fn read(&self, id: &D::Id) -> StoreResult<Option<StoredRecord<D>>> {
        match self
            .db
            .get(Self::key(id))
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, id: &D::Id, record: &StoredRecord<D>) -> StoreResult<()> {
        self.db
            .put(Self::key(id), Self::encode(record)?)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn scan(&self) -> StoreResult<Vec<StoredRecord<D>>> {
        let prefix = Self::prefix();
        let mut records = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            records.push(Self::decode(&value)?);
        }
        Ok(records)
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable(format!("{} write lock poisoned", D::COLLECTION)))
    }
}

#[async_trait]
impl<D: Document> Collection<D> for RocksCollection<D> {
    async fn get(&self, id: &D::Id) -> StoreResult<Option<Versioned<D>>> {
        Ok(self.read(id)?.map(|record| Versioned {
            version: record.version,
            document: record.document,
        }))
    }

    async fn find_many(
        &self,
        filter: &D::Filter,
        sort: Option<SortOrder>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Versioned<D>>> {
        let mut hits: Vec<StoredRecord<D>> = self
            .scan()?
            .into_iter()
            .filter(|record| record.document.matches(filter))
            .collect();

        match sort {
            Some(SortOrder::OldestFirst) => hits.sort_by(|a, b| {
                a.document
                    .created_at()
                    .cmp(&b.document.created_at())
                    .then(a.seq.cmp(&b.seq))
            }),
            Some(SortOrder::NewestFirst) => hits.sort_by(|a, b| {
                b.document
                    .created_at()
                    .cmp(&a.document.created_at())
                    .then(b.seq.cmp(&a.seq))
            }),
            None => hits.sort_by_key(|record| record.seq),
        }

        if let Some(limit) = limit {
            hits.truncate(limit);
        }

        Ok(hits
            .into_iter()
            .map(|record| Versioned {
                version: record.version,
                document: record.document,
            })
            .collect())
    }

    async fn insert(&self, document: D) -> StoreResult<D::Id> {
        let _guard = self.lock()?;

        let id = document.id().clone();
        if self.read(&id)?.is_some() {
            return Err(StoreError::Duplicate {
                collection: D::COLLECTION,
                id: id.to_string(),
            });
        }

        let record = StoredRecord {
            version: 1,
            seq: self.sequence.fetch_add(1, Ordering::SeqCst),
            document,
        };
        self.write(&id, &record)?;
        Ok(id)
    }

    async fn update_one(
        &self,
        id: &D::Id,
        patch: D::Patch,
        expected_version: Option<u64>,
    ) -> StoreResult<Versioned<D>> {
        let _guard = self.lock()?;

        let mut record = self.read(id)?.ok_or_else(|| StoreError::NotFound {
            collection: D::COLLECTION,
            id: id.to_string(),
        })?;

        if let Some(expected) = expected_version {
            if record.version != expected {
                return Err(StoreError::VersionConflict {
                    expected,
                    found: record.version,
                });
            }
        }

        record.document.apply(patch);
        record.version += 1;
        self.write(id, &record)?;

        Ok(Versioned {
            version: record.version,
            document: record.document,
        })
    }
}
