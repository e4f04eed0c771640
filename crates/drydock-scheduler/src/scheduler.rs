//! The scheduler façade: lifecycle verbs, timers, and startup recovery.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use drydock_common::{JobMetrics, QueueStats};
use drydock_logbuffer::Buffer;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};
use crate::index::{clock_nanos, IndexState, JobIndexEntry};
use crate::job::{Job, JobDetail, JobFailure, JobState, TargetRunner};
use crate::runner::{Runner, RunnerRegistry};
use crate::store::JobStore;
use crate::timer::StateTimer;
use crate::watch::WatchSet;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long an assigned job may sit unacknowledged before it is
    /// requeued.
    pub waiting_timeout: Duration,
    /// How long a running job may go without a heartbeat before it is
    /// force-canceled.
    pub heartbeat_timeout: Duration,
    /// Retention window of each job's output buffer.
    pub output_buffer_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            waiting_timeout: Duration::from_secs(120),
            heartbeat_timeout: Duration::from_secs(120),
            output_buffer_capacity: drydock_logbuffer::DEFAULT_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    pub fn with_waiting_timeout(mut self, timeout: Duration) -> Self {
        self.waiting_timeout = timeout;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_output_buffer_capacity(mut self, capacity: usize) -> Self {
        self.output_buffer_capacity = capacity;
        self
    }
}

/// Handle to the scheduler core. Cloning is cheap; all clones share the
/// same store, index, and timers.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Arc<SchedulerInner>,
}

pub(crate) struct SchedulerInner {
    pub(crate) weak: Weak<SchedulerInner>,
    pub(crate) store: JobStore,
    pub(crate) runners: Arc<RunnerRegistry>,
    pub(crate) config: SchedulerConfig,
    pub(crate) index: RwLock<IndexState>,
    pub(crate) metrics: RwLock<Option<Arc<dyn JobMetrics>>>,
    queue_clock: Mutex<QueueClock>,
}

/// Queue stamps must be strictly increasing within a process so index
/// ordering agrees with creation order even when the wall clock stalls
/// or steps backwards.
#[derive(Default)]
struct QueueClock {
    last_nanos: i64,
}

impl QueueClock {
    fn next(&mut self) -> DateTime<Utc> {
        let mut nanos = clock_nanos(Utc::now());
        if nanos <= self.last_nanos {
            nanos = self.last_nanos + 1;
        }
        self.last_nanos = nanos;
        DateTime::from_timestamp_nanos(nanos)
    }

    fn observe(&mut self, nanos: i64) {
        if nanos > self.last_nanos {
            self.last_nanos = nanos;
        }
    }
}

impl Scheduler {
    /// Open the scheduler over a job store, rebuilding the in-memory
    /// index from persisted records and re-arming timers.
    ///
    /// Must be called within a Tokio runtime (timers are spawned tasks).
    /// The store's directory lock keeps a second scheduler from opening
    /// the same data.
    pub fn open(
        store: JobStore,
        runners: Arc<RunnerRegistry>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let inner = Arc::new_cyclic(|weak| SchedulerInner {
            weak: weak.clone(),
            store,
            runners,
            config,
            index: RwLock::new(IndexState::new()),
            metrics: RwLock::new(None),
            queue_clock: Mutex::new(QueueClock::default()),
        });
        inner.restore()?;
        Ok(Self { inner })
    }

    pub fn with_metrics(self, metrics: Arc<dyn JobMetrics>) -> Self {
        *self.inner.metrics.write() = Some(metrics);
        self
    }

    /// Queue a job. The job's state and queue time are assigned here.
    pub fn create(&self, job: Job) -> Result<()> {
        self.inner.create(job)
    }

    /// Snapshot of every job, in id order.
    pub fn list(&self) -> Result<Vec<Job>> {
        self.inner.list()
    }

    /// Look up one job. Returns a deep copy plus live handles; `None` if
    /// the id is unknown. A watch set, when given, subscribes to changes
    /// of the record.
    pub fn get(&self, id: &str, ws: Option<&mut WatchSet>) -> Result<Option<JobDetail>> {
        self.inner.get(id, ws)
    }

    /// Wait for and assign a job to `runner`. Blocks until a job is
    /// available or `cancel` fires.
    pub async fn assign(&self, runner: &Runner, cancel: &CancellationToken) -> Result<JobDetail> {
        self.inner.assign(runner, cancel).await
    }

    /// Acknowledge (`true`) or reject (`false`) an assignment.
    pub fn ack(&self, id: &str, ack: bool) -> Result<JobDetail> {
        self.inner.ack(id, ack)
    }

    /// Reset a running job's heartbeat deadline. No-op when the job is
    /// not running; `NotFound` when the id is unknown.
    pub fn heartbeat(&self, id: &str) -> Result<()> {
        self.inner.heartbeat(id)
    }

    /// Finish a running job, successfully or with a stored failure.
    pub fn complete(
        &self,
        id: &str,
        result: Option<Value>,
        failure: Option<JobFailure>,
    ) -> Result<()> {
        self.inner.complete(id, result, failure)
    }

    /// Request cancellation. `force` transitions active jobs straight to
    /// `Error`; otherwise a waiting/running job is only marked and
    /// downstream completes it.
    pub fn cancel(&self, id: &str, force: bool) -> Result<()> {
        self.inner.cancel(id, force)
    }

    /// Expire a still-pending job (queued or waiting).
    pub fn expire(&self, id: &str) -> Result<()> {
        self.inner.expire(id)
    }

    /// Point-in-time check: does the current runner fleet satisfy this
    /// job's target?
    pub fn is_assignable(&self, job: &Job) -> Result<bool> {
        self.inner.is_assignable(job)
    }

    pub fn runners(&self) -> &Arc<RunnerRegistry> {
        &self.inner.runners
    }

    /// Live per-state counts for health reporting.
    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue_stats()
    }

    /// Stop every live timer and flush the store.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }
}

impl SchedulerInner {
    fn create(&self, mut job: Job) -> Result<()> {
        if job.id.is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "job id must be set".to_string(),
            ));
        }
        if job.target_runner.is_none() {
            return Err(SchedulerError::InvalidArgument(
                "job target runner must be set".to_string(),
            ));
        }

        let mut guard = self.index.write();
        let state = &mut *guard;
        if state.contains(&job.id) {
            return Err(SchedulerError::InvalidArgument(format!(
                "job already exists: {}",
                job.id
            )));
        }

        job.state = JobState::Queued;
        job.queue_time = Some(self.queue_clock.lock().next());

        self.store.put(&job)?;

        let mut entry = JobIndexEntry::from_job(&job)?;
        if let Some(expire_time) = job.expire_time {
            entry.expire_timer = Some(self.spawn_expire_timer(job.id.clone(), expire_time));
        }
        let op = entry.op_kind;
        state.insert(entry);

        info!(job_id = %job.id, op = %op, "job queued");
        if let Some(metrics) = self.metrics.read().as_ref() {
            metrics.record_job_submission(&op.to_string(), &job.application.application);
            let queued = state
                .state_counts()
                .get(&JobState::Queued)
                .copied()
                .unwrap_or(0);
            metrics.record_queue_depth(queued as u64);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Job>> {
        let guard = self.index.read();
        let mut jobs = Vec::with_capacity(guard.jobs.len());
        for id in guard.jobs.keys() {
            let job = self.read_through(id)?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    fn get(&self, id: &str, mut ws: Option<&mut WatchSet>) -> Result<Option<JobDetail>> {
        let guard = self.index.read();
        let state = &*guard;

        let Some(entry) = state.jobs.get(id) else {
            // Unknown id: watch the queued group so an interested caller
            // wakes when new jobs arrive.
            if let Some(ws) = ws.as_deref_mut() {
                ws.add(state.queued.subscribe());
            }
            return Ok(None);
        };

        if let Some(ws) = ws.as_deref_mut() {
            ws.add(entry.changed.subscribe());
        }

        let blocked = entry.state == JobState::Queued
            && state.scopes.is_blocked(entry, ws.as_deref_mut());

        let job = self.read_through(id)?;
        Ok(Some(JobDetail {
            job,
            output: entry.output.clone(),
            blocked,
        }))
    }

    fn ack(&self, id: &str, ack: bool) -> Result<JobDetail> {
        let mut guard = self.index.write();
        let state = &mut *guard;

        {
            let entry = state.entry(id)?;
            if entry.state != JobState::Waiting {
                return Err(SchedulerError::FailedPrecondition(format!(
                    "job can't be acked from state: {}",
                    entry.state
                )));
            }
        }

        let now = Utc::now();
        let job = self.store.update(id, |job| {
            if ack {
                job.state = JobState::Running;
                job.ack_time = Some(now);
            } else {
                job.state = JobState::Queued;
                job.assign_time = None;
            }
            Ok(())
        })?;

        if ack {
            state.set_state(id, JobState::Running)?;
            let timer = self.spawn_heartbeat_timer(id.to_string());
            let entry = state.entry_mut(id)?;
            // Output begins streaming in once the runner starts.
            entry.output = Some(Buffer::with_capacity(self.config.output_buffer_capacity));
            entry.state_timer = Some(timer);
            let output = entry.output.clone();
            info!(job_id = %id, "job acked, running");
            Ok(JobDetail {
                job,
                output,
                blocked: false,
            })
        } else {
            state.set_state(id, JobState::Queued)?;
            state.entry_mut(id)?.state_timer = None;
            state.release_scope(id)?;
            info!(job_id = %id, "job nacked, requeued");
            Ok(JobDetail {
                job,
                output: None,
                blocked: false,
            })
        }
    }

    fn heartbeat(&self, id: &str) -> Result<()> {
        let mut guard = self.index.write();
        let state = &mut *guard;

        {
            let entry = state.entry(id)?;
            if entry.state != JobState::Running {
                return Ok(());
            }
            // A running job without a timer is unusual; the heartbeat
            // machinery elsewhere is responsible for repairing it.
            if entry.state_timer.is_none() {
                return Ok(());
            }
        }

        let timer = self.spawn_heartbeat_timer(id.to_string());
        state.entry_mut(id)?.state_timer = Some(timer);
        debug!(job_id = %id, "heartbeat");
        Ok(())
    }

    fn complete(&self, id: &str, result: Option<Value>, failure: Option<JobFailure>) -> Result<()> {
        let mut guard = self.index.write();
        let state = &mut *guard;

        {
            let entry = state.entry(id)?;
            if entry.state != JobState::Running {
                return Err(SchedulerError::FailedPrecondition(format!(
                    "job can't be completed from state: {}",
                    entry.state
                )));
            }
        }

        let now = Utc::now();
        let final_state = if failure.is_some() {
            JobState::Error
        } else {
            JobState::Success
        };
        let job = self.store.update(id, |job| {
            job.state = final_state;
            job.complete_time = Some(now);
            job.result = result;
            job.error = failure;
            Ok(())
        })?;

        state.set_state(id, final_state)?;
        state.end_entry(id)?;
        state.release_scope(id)?;

        info!(job_id = %id, state = %final_state, "job completed");
        if let Some(metrics) = self.metrics.read().as_ref() {
            let duration = job
                .ack_time
                .map(|t| (now - t).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0);
            let status = if final_state == JobState::Success {
                "success"
            } else {
                "error"
            };
            metrics.record_job_completion(&job.operation.kind().to_string(), status, duration);
        }
        Ok(())
    }

    fn cancel(&self, id: &str, force: bool) -> Result<()> {
        let mut guard = self.index.write();
        let state = &mut *guard;
        self.cancel_locked(state, id, force)
    }

    fn cancel_locked(&self, state: &mut IndexState, id: &str, force: bool) -> Result<()> {
        let current = state.entry(id)?.state;

        // Jobs that already completed did so fine; cancellation is a
        // no-op and the record keeps its result.
        if current.is_terminal() {
            return Ok(());
        }

        let new_state = match current {
            // Queued jobs were never picked up; fail them immediately.
            JobState::Queued => Some(JobState::Error),
            // Active jobs are only marked unless forced; downstream
            // observes the cancel request and completes the job.
            JobState::Waiting | JobState::Running => force.then_some(JobState::Error),
            JobState::Success | JobState::Error => None,
        };

        let now = Utc::now();
        self.store.update(id, |job| {
            if let Some(next) = new_state {
                job.state = next;
                job.error = Some(JobFailure::canceled());
            }
            job.cancel_time = Some(now);
            Ok(())
        })?;

        match new_state {
            Some(next) => {
                state.set_state(id, next)?;
                state.end_entry(id)?;
                state.release_scope(id)?;
                info!(job_id = %id, force, "job canceled");
            }
            None => {
                state.touch(id)?;
                info!(job_id = %id, "job cancellation requested");
            }
        }
        Ok(())
    }

    fn expire(&self, id: &str) -> Result<()> {
        let mut guard = self.index.write();
        let state = &mut *guard;
        match state.entry(id)?.state {
            JobState::Queued | JobState::Waiting => self.cancel_locked(state, id, false),
            _ => Ok(()),
        }
    }

    fn is_assignable(&self, job: &Job) -> Result<bool> {
        if self.runners.is_empty() {
            return Ok(false);
        }
        match &job.target_runner {
            None => Err(SchedulerError::InvalidArgument(
                "job target runner must be set".to_string(),
            )),
            Some(TargetRunner::Any) => Ok(self.runners.any_accepts_untargeted()),
            Some(TargetRunner::Id(id)) => Ok(self.runners.get(id).is_some()),
        }
    }

    fn queue_stats(&self) -> QueueStats {
        let guard = self.index.read();
        let counts = guard.state_counts();
        let count = |state: JobState| counts.get(&state).copied().unwrap_or(0);
        let oldest_queued_age_seconds = guard
            .oldest_queued()
            .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
            .unwrap_or(0);
        QueueStats {
            queued_jobs: count(JobState::Queued),
            waiting_jobs: count(JobState::Waiting),
            running_jobs: count(JobState::Running),
            succeeded_jobs: count(JobState::Success),
            failed_jobs: count(JobState::Error),
            oldest_queued_age_seconds,
        }
    }

    fn shutdown(&self) -> Result<()> {
        let mut guard = self.index.write();
        for entry in guard.jobs.values_mut() {
            if let Some(timer) = entry.state_timer.take() {
                timer.stop();
            }
            if let Some(timer) = entry.expire_timer.take() {
                timer.stop();
            }
        }
        self.store.persist()?;
        info!("scheduler stopped");
        Ok(())
    }

    /// Rebuild the index from the store: re-arm state and expiry timers
    /// and re-register scope assignments for active jobs.
    fn restore(&self) -> Result<()> {
        let mut guard = self.index.write();
        let state = &mut *guard;
        let mut max_nanos = 0i64;
        let mut restored = 0usize;

        self.store.for_each(|job| {
            let mut entry = JobIndexEntry::from_job(&job)?;
            max_nanos = max_nanos.max(entry.queue_nanos);

            match entry.state {
                // Give the previously assigned runner time to reconnect
                // and ack before the job is requeued.
                JobState::Waiting => {
                    entry.state_timer = Some(self.spawn_waiting_timer(entry.id.clone()));
                }
                JobState::Running => {
                    entry.state_timer = Some(self.spawn_heartbeat_timer(entry.id.clone()));
                }
                _ => {}
            }
            if let Some(expire_time) = job.expire_time {
                if !entry.state.is_terminal() {
                    entry.expire_timer =
                        Some(self.spawn_expire_timer(entry.id.clone(), expire_time));
                }
            }

            let active = matches!(entry.state, JobState::Waiting | JobState::Running);
            let id = entry.id.clone();
            state.insert(entry);
            if active {
                state.assign_scope(&id)?;
            }
            restored += 1;
            Ok(())
        })?;

        self.queue_clock.lock().observe(max_nanos);
        if restored > 0 {
            info!(jobs = restored, "rebuilt job index from store");
        }
        Ok(())
    }

    fn read_through(&self, id: &str) -> Result<Job> {
        self.store.get(id)?.ok_or_else(|| {
            SchedulerError::Internal(anyhow!("index entry without persisted record: {id}"))
        })
    }

    pub(crate) fn spawn_waiting_timer(&self, id: String) -> StateTimer {
        let weak = self.weak.clone();
        StateTimer::spawn(self.config.waiting_timeout, async move {
            if let Some(core) = weak.upgrade() {
                core.timer_transition("waiting timeout", &id, |core, id| {
                    core.ack(id, false).map(|_| ())
                });
            }
        })
    }

    pub(crate) fn spawn_heartbeat_timer(&self, id: String) -> StateTimer {
        let weak = self.weak.clone();
        StateTimer::spawn(self.config.heartbeat_timeout, async move {
            if let Some(core) = weak.upgrade() {
                core.timer_transition("heartbeat timeout", &id, |core, id| {
                    core.cancel(id, true)
                });
            }
        })
    }

    fn spawn_expire_timer(&self, id: String, expire_time: DateTime<Utc>) -> StateTimer {
        let delay = (expire_time - Utc::now())
            .to_std()
            .unwrap_or_default()
            .max(Duration::from_millis(1));
        let weak = self.weak.clone();
        StateTimer::spawn(delay, async move {
            if let Some(core) = weak.upgrade() {
                core.timer_transition("expiry", &id, |core, id| core.expire(id));
            }
        })
    }

    /// Run a timer-driven transition: retry storage hiccups once, discard
    /// lost races (the job moved on before the timer fired).
    fn timer_transition<F>(&self, what: &str, id: &str, op: F)
    where
        F: Fn(&Self, &str) -> Result<()>,
    {
        for attempt in 0..2 {
            match op(self, id) {
                Ok(()) => return,
                Err(SchedulerError::NotFound(_)) | Err(SchedulerError::FailedPrecondition(_)) => {
                    return;
                }
                Err(err) if attempt == 0 => {
                    debug!(job_id = %id, error = %err, "{what} transition failed, retrying");
                }
                Err(err) => {
                    warn!(job_id = %id, error = %err, "{what} transition failed");
                }
            }
        }
    }
}
