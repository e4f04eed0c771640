//! Metrics interface between the scheduler core and outer surfaces

use async_trait::async_trait;

/// Scheduler metrics sink. The core reports through this trait; the
/// embedding binary decides where the numbers go.
#[async_trait]
pub trait JobMetrics: Send + Sync {
    /// Record job submission
    fn record_job_submission(&self, op: &str, application: &str);

    /// Record job completion
    fn record_job_completion(&self, op: &str, status: &str, duration_seconds: f64);

    /// Record the number of queued jobs
    fn record_queue_depth(&self, depth: u64);

    /// Record runner activity (assignment, ack, heartbeat)
    fn record_runner_activity(&self, runner_id: &str, action: &str);
}
