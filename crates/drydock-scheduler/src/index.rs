//! In-memory secondary index over persisted jobs.
//!
//! The index answers the multi-key queries assignment needs (by id, by
//! state and queue time, by targeted runner) and carries the live handles
//! the persisted form cannot: state timers, the output buffer, and change
//! notifiers. It is guarded by a single `RwLock` in the scheduler: many
//! concurrent readers, exactly one writer, with every state-changing verb
//! persisting first and applying the index mutation second.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use drydock_logbuffer::Buffer;

use crate::error::{Result, SchedulerError};
use crate::job::{AppRef, Job, JobState, OpKind, TargetRunner};
use crate::runner::Runner;
use crate::scope::{ScopeKey, ScopeTracker};
use crate::timer::StateTimer;
use crate::watch::{WatchSet, WatchTrigger};

/// Composite key of the queue-time table: (state, queue nanos, id).
/// The id widens the tuple so identical queue stamps cannot collide.
pub(crate) type QueueKey = (u8, i64, String);

/// Composite key of the target table: (state, lowercased runner id,
/// queue nanos, id).
pub(crate) type TargetKey = (u8, String, i64, String);

/// Encode a timestamp for index ordering. Out-of-range timestamps cannot
/// come from any clock we run under, so this fails loudly.
pub(crate) fn clock_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().expect("timestamp out of range")
}

/// In-memory descriptor for one job.
pub(crate) struct JobIndexEntry {
    pub id: String,
    pub op_kind: OpKind,
    pub application: AppRef,
    pub workspace: String,
    pub queue_time: DateTime<Utc>,
    pub queue_nanos: i64,
    /// True when the job may run on any untargeted-capable runner.
    pub target_any: bool,
    /// Runner id the job is pinned to, when targeted.
    pub target_runner_id: Option<String>,
    pub state: JobState,
    /// Timeout on the current state; live only in Waiting or Running.
    pub state_timer: Option<StateTimer>,
    /// Absolute expiry; armed at creation, stopped at terminal cleanup.
    pub expire_timer: Option<StateTimer>,
    /// Terminal output, created when the job first starts running.
    pub output: Option<Buffer>,
    /// Fires on every change to this record.
    pub changed: WatchTrigger,
}

impl JobIndexEntry {
    pub(crate) fn from_job(job: &Job) -> Result<Self> {
        let (target_any, target_runner_id) = match &job.target_runner {
            Some(TargetRunner::Any) => (true, None),
            Some(TargetRunner::Id(id)) => (false, Some(id.clone())),
            None => {
                return Err(SchedulerError::InvalidArgument(
                    "job target runner must be set".to_string(),
                ))
            }
        };

        let queue_time = job.queue_time.ok_or_else(|| {
            SchedulerError::Internal(anyhow!("job {} has no queue time", job.id))
        })?;

        Ok(Self {
            id: job.id.clone(),
            op_kind: job.operation.kind(),
            application: job.application.clone(),
            workspace: job.workspace.clone(),
            queue_time,
            queue_nanos: clock_nanos(queue_time),
            target_any,
            target_runner_id,
            state: job.state,
            state_timer: None,
            expire_timer: None,
            output: None,
            changed: WatchTrigger::new(),
        })
    }

    pub(crate) fn scope_key(&self) -> ScopeKey {
        ScopeKey {
            application: self.application.clone(),
            workspace: self.workspace.clone(),
        }
    }

    fn queue_key(&self) -> QueueKey {
        (self.state.rank(), self.queue_nanos, self.id.clone())
    }

    fn target_key(&self) -> Option<TargetKey> {
        self.target_runner_id.as_ref().map(|runner_id| {
            (
                self.state.rank(),
                runner_id.to_lowercase(),
                self.queue_nanos,
                self.id.clone(),
            )
        })
    }
}

/// All index tables plus the scope tracker, mutated as one unit under the
/// scheduler's write guard.
pub(crate) struct IndexState {
    /// Primary: unique by id, ordered for stable listing.
    pub jobs: BTreeMap<String, JobIndexEntry>,
    by_queue_time: BTreeSet<QueueKey>,
    by_target_id: BTreeSet<TargetKey>,
    pub scopes: ScopeTracker,
    /// Fires whenever membership of the queued set changes.
    pub queued: WatchTrigger,
}

impl IndexState {
    pub(crate) fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            by_queue_time: BTreeSet::new(),
            by_target_id: BTreeSet::new(),
            scopes: ScopeTracker::new(),
            queued: WatchTrigger::new(),
        }
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub(crate) fn entry(&self, id: &str) -> Result<&JobIndexEntry> {
        self.jobs
            .get(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    pub(crate) fn entry_mut(&mut self, id: &str) -> Result<&mut JobIndexEntry> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    /// Insert a fresh entry and its secondary keys.
    pub(crate) fn insert(&mut self, entry: JobIndexEntry) {
        self.by_queue_time.insert(entry.queue_key());
        if let Some(key) = entry.target_key() {
            self.by_target_id.insert(key);
        }
        let notify_queued = entry.state == JobState::Queued;
        self.jobs.insert(entry.id.clone(), entry);
        if notify_queued {
            self.queued.notify();
        }
    }

    /// Move an entry to a new state, rewriting its secondary keys and
    /// waking the relevant watchers.
    pub(crate) fn set_state(&mut self, id: &str, state: JobState) -> Result<()> {
        let old_queue_key;
        let old_target_key;
        let old_state;
        {
            let entry = self.entry(id)?;
            old_queue_key = entry.queue_key();
            old_target_key = entry.target_key();
            old_state = entry.state;
        }

        self.by_queue_time.remove(&old_queue_key);
        if let Some(key) = old_target_key {
            self.by_target_id.remove(&key);
        }

        let entry = self.entry_mut(id)?;
        entry.state = state;
        let new_queue_key = entry.queue_key();
        let new_target_key = entry.target_key();
        entry.changed.notify();

        self.by_queue_time.insert(new_queue_key);
        if let Some(key) = new_target_key {
            self.by_target_id.insert(key);
        }

        if old_state == JobState::Queued || state == JobState::Queued {
            self.queued.notify();
        }
        Ok(())
    }

    /// Wake watchers of a record whose persisted fields changed without a
    /// state transition (e.g. a cancellation request was marked).
    pub(crate) fn touch(&self, id: &str) -> Result<()> {
        self.entry(id)?.changed.notify();
        Ok(())
    }

    /// Stop every timer on a terminal entry.
    pub(crate) fn end_entry(&mut self, id: &str) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.state_timer = None;
        entry.expire_timer = None;
        Ok(())
    }

    pub(crate) fn assign_scope(&mut self, id: &str) -> Result<()> {
        let entry = self
            .jobs
            .get(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        self.scopes.set_assigned(entry, true);
        Ok(())
    }

    pub(crate) fn release_scope(&mut self, id: &str) -> Result<()> {
        let entry = self
            .jobs
            .get(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        self.scopes.set_assigned(entry, false);
        Ok(())
    }

    /// Earliest queued job pinned to this runner whose scope is free.
    pub(crate) fn candidate_by_id(
        &self,
        runner: &Runner,
        ws: &mut WatchSet,
    ) -> Option<(i64, String)> {
        let runner_lower = runner.id.to_lowercase();
        let start: TargetKey = (
            JobState::Queued.rank(),
            runner_lower.clone(),
            i64::MIN,
            String::new(),
        );

        for (rank, target_lower, nanos, id) in self.by_target_id.range(start..) {
            if *rank != JobState::Queued.rank() || *target_lower != runner_lower {
                break;
            }
            let Some(entry) = self.jobs.get(id) else {
                continue;
            };
            if entry.state != JobState::Queued
                || entry.target_runner_id.as_deref() != Some(runner.id.as_str())
            {
                continue;
            }
            if self.scopes.is_blocked(entry, Some(&mut *ws)) {
                continue;
            }
            return Some((*nanos, id.clone()));
        }
        None
    }

    /// Earliest queued any-target job whose scope is free.
    pub(crate) fn candidate_any(&self, ws: &mut WatchSet) -> Option<(i64, String)> {
        let start: QueueKey = (JobState::Queued.rank(), i64::MIN, String::new());

        for (rank, nanos, id) in self.by_queue_time.range(start..) {
            if *rank != JobState::Queued.rank() {
                break;
            }
            let Some(entry) = self.jobs.get(id) else {
                continue;
            };
            if entry.state != JobState::Queued || !entry.target_any {
                continue;
            }
            if self.scopes.is_blocked(entry, Some(&mut *ws)) {
                continue;
            }
            return Some((*nanos, id.clone()));
        }
        None
    }

    /// Count of jobs per state, for health reporting.
    pub(crate) fn state_counts(&self) -> BTreeMap<JobState, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.jobs.values() {
            *counts.entry(entry.state).or_insert(0) += 1;
        }
        counts
    }

    /// Queue time of the oldest still-queued job.
    pub(crate) fn oldest_queued(&self) -> Option<DateTime<Utc>> {
        let start: QueueKey = (JobState::Queued.rank(), i64::MIN, String::new());
        self.by_queue_time
            .range(start..)
            .take_while(|(rank, _, _)| *rank == JobState::Queued.rank())
            .next()
            .and_then(|(_, _, id)| self.jobs.get(id))
            .map(|entry| entry.queue_time)
    }
}
