//! Health reporting interface between the scheduler core and outer surfaces

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Scheduler health check interface
#[async_trait]
pub trait SchedulerHealthCheck: Send + Sync {
    /// Get scheduler queue statistics
    async fn get_queue_stats(&self) -> Result<QueueStats, HealthCheckError>;
}

/// Scheduler queue statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued_jobs: usize,
    pub waiting_jobs: usize,
    pub running_jobs: usize,
    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub oldest_queued_age_seconds: u64,
}

/// Health check error
#[derive(Debug, thiserror::Error)]
pub enum HealthCheckError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    InternalError(String),
}
