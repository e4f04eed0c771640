//! drydock-storage: persistent storage layer using the fjall LSM-tree
//!
//! This crate provides the durable key/value layer under the drydock
//! control plane. Data lives in named fjall partitions ("collections"),
//! values are opaque bytes, and writes are staged in a transaction that
//! commits through a single atomic keyspace batch.
//!
//! # Collection organization
//! - jobs: serialized job records keyed by raw job id
//!
//! Secondary structure (state and queue-time orderings) is deliberately
//! not persisted; the scheduler rebuilds it in memory on startup from a
//! full scan of the jobs collection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use fjall::{Config as FjallConfig, Keyspace, PartitionHandle, PersistMode};

/// Job records keyed by raw job id.
pub const COL_JOBS: &str = "jobs";

/// Errors that can occur during storage operations
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Storage engine error: {0}")]
    Engine(#[from] fjall::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Store {
    keyspace: Keyspace,
    collections: HashMap<&'static str, PartitionHandle>,
    // Keeps temp-dir backed stores alive for the lifetime of the handle.
    _tempdir: Option<Arc<tempfile::TempDir>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        tracing::debug!(path = %path.as_ref().display(), "opening keyspace");
        let keyspace = FjallConfig::new(path).open()?;

        let mut collections = HashMap::new();
        collections.insert(
            COL_JOBS,
            keyspace.open_partition(COL_JOBS, Default::default())?,
        );

        Ok(Self {
            keyspace,
            collections,
            _tempdir: None,
        })
    }

    /// Open a store backed by a temporary directory. The directory is
    /// removed when the last clone of the store is dropped.
    pub fn in_memory() -> Result<Self> {
        let tempdir = tempfile::tempdir()?;
        let mut store = Self::open(tempdir.path().join("drydock"))?;
        store._tempdir = Some(Arc::new(tempdir));
        Ok(store)
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn collection(&self, name: &str) -> Result<&PartitionHandle> {
        self.collections
            .get(name)
            .ok_or_else(|| anyhow::anyhow!(StorageError::CollectionNotFound(name.to_string())))
    }

    /// Flush all buffered writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

/// Transaction wrapper for read operations.
///
/// Fjall reads are internally consistent, so this is a marker that keeps
/// call sites symmetrical with the write path.
pub struct ReadTransaction {}

impl ReadTransaction {
    pub fn new() -> Self {
        Self {}
    }

    pub fn get(&self, store: &Store, collection: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let partition = store.collection(collection)?;
        Ok(partition.get(key)?.map(|slice| slice.to_vec()))
    }

    /// Scan all entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix(
        &self,
        store: &Store,
        collection: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let partition = store.collection(collection)?;
        let mut out = Vec::new();
        for item in partition.prefix(prefix) {
            let (key, value) = item?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }
}

impl Default for ReadTransaction {
    fn default() -> Self {
        Self::new()
    }
}

enum StagedOp {
    Set(Vec<u8>),
    Delete,
}

/// Staged write transaction committed through one atomic keyspace batch.
pub struct WriteTransaction {
    ops: Vec<(&'static str, Vec<u8>, StagedOp)>,
}

impl WriteTransaction {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn set(&mut self, collection: &'static str, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push((collection, key, StagedOp::Set(value)));
    }

    pub fn delete(&mut self, collection: &'static str, key: Vec<u8>) {
        self.ops.push((collection, key, StagedOp::Delete));
    }

    /// Read through the staged ops, falling back to the store.
    pub fn get(&self, store: &Store, collection: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for (col, staged_key, op) in self.ops.iter().rev() {
            if *col == collection && staged_key.as_slice() == key {
                return Ok(match op {
                    StagedOp::Set(value) => Some(value.clone()),
                    StagedOp::Delete => None,
                });
            }
        }
        ReadTransaction::new().get(store, collection, key)
    }

    pub fn commit(self, store: &Store) -> Result<()> {
        let mut batch = store.keyspace.batch();
        for (collection, key, op) in self.ops {
            let partition = store.collection(collection)?;
            match op {
                StagedOp::Set(value) => batch.insert(partition, key, value),
                StagedOp::Delete => batch.remove(partition, key),
            }
        }
        batch.commit()?;
        Ok(())
    }
}

impl Default for WriteTransaction {
    fn default() -> Self {
        Self::new()
    }
}
