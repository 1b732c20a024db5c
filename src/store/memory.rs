//! In-memory collections backed by DashMap
//!
//! `update_one` runs under the shard write lock for the key, so the version
//! check and the patch are one atomic step.

use super::{Collection, Document, SortOrder, Versioned};
use crate::errors::{StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

struct Slot<D> {
    /// Insertion order, breaks created_at ties
    seq: u64,
    record: Versioned<D>,
}

pub struct MemoryCollection<D: Document> {
    records: DashMap<D::Id, Slot<D>>,
    sequence: AtomicU64,
    available: AtomicBool,
}

impl<D: Document> MemoryCollection<D> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            sequence: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a backend outage; every operation fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "{} collection is offline",
                D::COLLECTION
            )))
        }
    }
}

impl<D: Document> Default for MemoryCollection<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<D: Document> Collection<D> for MemoryCollection<D> {
    async fn get(&self, id: &D::Id) -> StoreResult<Option<Versioned<D>>> {
        self.check_available()?;
        Ok(self.records.get(id).map(|slot| slot.record.clone()))
    }

    async fn find_many(
        &self,
        filter: &D::Filter,
        sort: Option<SortOrder>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Versioned<D>>> {
        self.check_available()?;

        let mut hits: Vec<(u64, Versioned<D>)> = self
            .records
            .iter()
            .filter(|slot| slot.record.document.matches(filter))
            .map(|slot| (slot.seq, slot.record.clone()))
            .collect();

        match sort {
            Some(SortOrder::OldestFirst) => hits.sort_by(|(sa, a), (sb, b)| {
                a.document
                    .created_at()
                    .cmp(&b.document.created_at())
                    .then(sa.cmp(sb))
            }),
            Some(SortOrder::NewestFirst) => hits.sort_by(|(sa, a), (sb, b)| {
                b.document
                    .created_at()
                    .cmp(&a.document.created_at())
                    .then(sb.cmp(sa))
            }),
            None => hits.sort_by_key(|(seq, _)| *seq),
        }

        if let Some(limit) = limit {
            hits.truncate(limit);
        }

        Ok(hits.into_iter().map(|(_, record)| record).collect())
    }

    async fn insert(&self, document: D) -> StoreResult<D::Id> {
        self.check_available()?;

        let id = document.id().clone();
        match self.records.entry(id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                collection: D::COLLECTION,
                id: id.to_string(),
            }),
            Entry::Vacant(vacant) => {
                let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
                vacant.insert(Slot {
                    seq,
                    record: Versioned {
                        version: 1,
                        document,
                    },
                });
                Ok(id)
            }
        }
    }

    async fn update_one(
        &self,
        id: &D::Id,
        patch: D::Patch,
        expected_version: Option<u64>,
    ) -> StoreResult<Versioned<D>> {
        self.check_available()?;

        let mut slot = self.records.get_mut(id).ok_or_else(|| StoreError::NotFound {
            collection: D::COLLECTION,
            id: id.to_string(),
        })?;

        if let Some(expected) = expected_version {
            if slot.record.version != expected {
                return Err(StoreError::VersionConflict {
                    expected,
                    found: slot.record.version,
                });
            }
        }

        slot.record.document.apply(patch);
        slot.record.version += 1;
        Ok(slot.record.clone())
    }
}
