//! drydock-scheduler: the job scheduler core of the drydock control plane
//!
//! Clients queue opaque jobs; runners poll for work with a blocking
//! `assign`. Each job moves through a persisted state machine
//! (queued → waiting → running → success/error) with per-state timeouts,
//! at most one active job per (application, workspace) scope, and
//! automatic recovery of timed-out or orphaned jobs. The on-disk store
//! holds only the records; all secondary structure (state orderings,
//! target index, scope occupancy, timers) is rebuilt in memory at open.
//!
//! The scheduler is a library: the RPC layer translates wire types into
//! these verbs and streams output through the returned buffer handles.

mod assign;
pub mod error;
mod index;
pub mod job;
pub mod observability;
pub mod runner;
mod scheduler;
mod scope;
mod store;
mod timer;
pub mod watch;

pub use error::{ErrorCode, Result, SchedulerError};
pub use job::{
    AppRef, Job, JobDetail, JobFailure, JobState, OpKind, Operation, TargetRunner,
};
pub use observability::{JobMetricsImpl, JobStats, JobStatsTracker, SchedulerHealthCheckImpl};
pub use runner::{Runner, RunnerRegistry};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::JobStore;
pub use watch::WatchSet;
