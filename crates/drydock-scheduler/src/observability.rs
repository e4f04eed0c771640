//! Observability implementations for the scheduler

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use drydock_common::{HealthCheckError, JobMetrics, QueueStats, SchedulerHealthCheck};

use crate::scheduler::Scheduler;

/// Health check backed by live index counts.
pub struct SchedulerHealthCheckImpl {
    scheduler: Scheduler,
}

impl SchedulerHealthCheckImpl {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl SchedulerHealthCheck for SchedulerHealthCheckImpl {
    async fn get_queue_stats(&self) -> Result<QueueStats, HealthCheckError> {
        Ok(self.scheduler.queue_stats())
    }
}

/// Job metrics implementation
#[derive(Clone)]
pub struct JobMetricsImpl {
    stats: Arc<JobStatsTracker>,
}

impl JobMetricsImpl {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(JobStatsTracker::new()),
        }
    }

    pub fn stats(&self) -> Arc<JobStatsTracker> {
        self.stats.clone()
    }
}

impl Default for JobMetricsImpl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobMetrics for JobMetricsImpl {
    fn record_job_submission(&self, op: &str, application: &str) {
        self.stats.record_job_submission(op, application);
    }

    fn record_job_completion(&self, op: &str, status: &str, duration_seconds: f64) {
        self.stats.record_job_completion(op, status, duration_seconds);
    }

    fn record_queue_depth(&self, depth: u64) {
        self.stats.record_queue_depth(depth);
    }

    fn record_runner_activity(&self, _runner_id: &str, _action: &str) {}
}

/// Thread-safe scheduler statistics tracker
pub struct JobStatsTracker {
    total_submitted: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    queue_depth: AtomicU64,
}

impl JobStatsTracker {
    pub fn new() -> Self {
        Self {
            total_submitted: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
        }
    }

    pub fn record_job_submission(&self, _op: &str, _application: &str) {
        self.total_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_completion(&self, _op: &str, status: &str, duration_seconds: f64) {
        self.total_completed.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add((duration_seconds * 1000.0) as u64, Ordering::Relaxed);
        if status == "error" {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> JobStats {
        let total_completed = self.total_completed.load(Ordering::Relaxed);
        let average_duration_ms = if total_completed > 0 {
            self.total_duration_ms.load(Ordering::Relaxed) / total_completed
        } else {
            0
        };

        JobStats {
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
            total_completed,
            total_failed: self.total_failed.load(Ordering::Relaxed),
            average_duration_ms,
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl Default for JobStatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler statistics summary
#[derive(Debug, Clone)]
pub struct JobStats {
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub average_duration_ms: u64,
    pub queue_depth: u64,
}
