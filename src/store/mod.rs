//! Document store interface
//!
//! The core never talks to a database directly. Each entity type is persisted
//! through a `Collection<D>`, injected at construction time via [`Stores`].
//! Updates are partial (`D::Patch`) and may carry an expected version, which is
//! how callers get optimistic concurrency control that also holds across
//! processes sharing one backend.

pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;

use crate::errors::StoreResult;
use crate::models::{Lobby, Match, Transaction, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt::Display, hash::Hash, sync::Arc};

pub use memory::MemoryCollection;
#[cfg(feature = "rocksdb")]
pub use rocks::{open_database, RocksCollection};

/// A record type that can live in a collection
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Display + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Filter: Send + Sync;
    type Patch: Send + Sync;

    /// Collection name, also the key prefix for key-value backends
    const COLLECTION: &'static str;

    fn id(&self) -> &Self::Id;

    fn created_at(&self) -> DateTime<Utc>;

    fn matches(&self, filter: &Self::Filter) -> bool;

    fn apply(&mut self, patch: Self::Patch);
}

/// A document together with its optimistic-lock version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Versioned<D> {
    pub version: u64,
    pub document: D,
}

impl<D> Versioned<D> {
    pub fn into_inner(self) -> D {
        self.document
    }
}

/// Ordering by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    OldestFirst,
    NewestFirst,
}

#[async_trait]
pub trait Collection<D: Document>: Send + Sync {
    /// Direct lookup by primary key
    async fn get(&self, id: &D::Id) -> StoreResult<Option<Versioned<D>>>;

    async fn find_many(
        &self,
        filter: &D::Filter,
        sort: Option<SortOrder>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Versioned<D>>>;

    /// Fails with `Duplicate` if the id is already taken. Version starts at 1.
    async fn insert(&self, document: D) -> StoreResult<D::Id>;

    /// Apply a partial update. With `expected_version`, fails with
    /// `VersionConflict` unless the stored version matches.
    async fn update_one(
        &self,
        id: &D::Id,
        patch: D::Patch,
        expected_version: Option<u64>,
    ) -> StoreResult<Versioned<D>>;

    /// Oldest matching document
    async fn find_one(&self, filter: &D::Filter) -> StoreResult<Option<Versioned<D>>> {
        let mut found = self
            .find_many(filter, Some(SortOrder::OldestFirst), Some(1))
            .await?;
        Ok(found.pop())
    }
}

/// The set of collections the core depends on
#[derive(Clone)]
pub struct Stores {
    pub lobbies: Arc<dyn Collection<Lobby>>,
    pub matches: Arc<dyn Collection<Match>>,
    pub wallets: Arc<dyn Collection<Wallet>>,
    pub transactions: Arc<dyn Collection<Transaction>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            lobbies: Arc::new(MemoryCollection::<Lobby>::new()),
            matches: Arc::new(MemoryCollection::<Match>::new()),
            wallets: Arc::new(MemoryCollection::<Wallet>::new()),
            transactions: Arc::new(MemoryCollection::<Transaction>::new()),
        }
    }

    #[cfg(feature = "rocksdb")]
    pub fn rocksdb(path: &str) -> crate::errors::StoreResult<Self> {
        let db = open_database(path)?;
        Ok(Self {
            lobbies: Arc::new(RocksCollection::<Lobby>::new(db.clone())?),
            matches: Arc::new(RocksCollection::<Match>::new(db.clone())?),
            wallets: Arc::new(RocksCollection::<Wallet>::new(db.clone())?),
            transactions: Arc::new(RocksCollection::<Transaction>::new(db)?),
        })
    }
}
