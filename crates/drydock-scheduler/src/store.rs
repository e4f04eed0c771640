//! Persistent store adapter for job records.

use std::path::Path;
use std::sync::Arc;

use drydock_storage::{ReadTransaction, Store, WriteTransaction, COL_JOBS};

use crate::error::{Result, SchedulerError};
use crate::job::Job;

/// Durable job records: one collection, key = raw job id bytes, value =
/// the serialized record. All secondary structure lives in memory and is
/// rebuilt from a full scan at startup.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<Store>,
}

impl JobStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Store::open(path)?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Temp-dir backed store for tests and ephemeral control planes.
    pub fn in_memory() -> Result<Self> {
        let store = Store::in_memory()?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let tx = ReadTransaction::new();
        match tx.get(&self.store, COL_JOBS, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, job: &Job) -> Result<()> {
        let bytes = serde_json::to_vec(job)?;
        let mut tx = WriteTransaction::new();
        tx.set(COL_JOBS, job.id.as_bytes().to_vec(), bytes);
        tx.commit(&self.store)?;
        Ok(())
    }

    /// Atomic read-modify-write of one record. Returns the updated record.
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let mut tx = WriteTransaction::new();
        let bytes = tx
            .get(&self.store, COL_JOBS, id.as_bytes())?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        let mut job: Job = serde_json::from_slice(&bytes)?;

        mutate(&mut job)?;

        tx.set(COL_JOBS, id.as_bytes().to_vec(), serde_json::to_vec(&job)?);
        tx.commit(&self.store)?;
        Ok(job)
    }

    /// Visit every persisted record, in key order. Startup index rebuild.
    pub fn for_each<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(Job) -> Result<()>,
    {
        let tx = ReadTransaction::new();
        for (_key, bytes) in tx.scan_prefix(&self.store, COL_JOBS, b"")? {
            let job: Job = serde_json::from_slice(&bytes)?;
            visit(job)?;
        }
        Ok(())
    }

    /// Flush buffered writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.store.persist()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AppRef, JobState, Operation, TargetRunner};
    use serde_json::json;

    fn job(id: &str) -> Job {
        Job::new(
            id,
            AppRef::new("proj", "web"),
            "default",
            TargetRunner::Any,
            Operation::Build(json!({})),
        )
    }

    #[test]
    fn put_get_roundtrip() -> Result<()> {
        let store = JobStore::in_memory()?;
        store.put(&job("a"))?;

        let loaded = store.get("a")?.expect("job exists");
        assert_eq!(loaded.id, "a");
        assert_eq!(loaded.state, JobState::Queued);
        assert!(store.get("missing")?.is_none());
        Ok(())
    }

    #[test]
    fn update_mutates_atomically() -> Result<()> {
        let store = JobStore::in_memory()?;
        store.put(&job("a"))?;

        let updated = store.update("a", |j| {
            j.state = JobState::Waiting;
            Ok(())
        })?;
        assert_eq!(updated.state, JobState::Waiting);
        assert_eq!(store.get("a")?.unwrap().state, JobState::Waiting);
        Ok(())
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = JobStore::in_memory().unwrap();
        let err = store.update("ghost", |_| Ok(())).unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[test]
    fn for_each_scans_all_records() -> Result<()> {
        let store = JobStore::in_memory()?;
        store.put(&job("a"))?;
        store.put(&job("b"))?;

        let mut seen = Vec::new();
        store.for_each(|j| {
            seen.push(j.id);
            Ok(())
        })?;
        assert_eq!(seen, vec!["a", "b"]);
        Ok(())
    }
}
