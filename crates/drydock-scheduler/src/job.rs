use chrono::{DateTime, Utc};
use drydock_logbuffer::Buffer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

/// Lifecycle state of a job. `Success` and `Error` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Queued,
    Waiting,
    Running,
    Success,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Error)
    }

    /// Integer position in the index composite keys.
    pub(crate) fn rank(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Waiting => write!(f, "waiting"),
            JobState::Running => write!(f, "running"),
            JobState::Success => write!(f, "success"),
            JobState::Error => write!(f, "error"),
        }
    }
}

/// The application a job belongs to, scoped to its project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppRef {
    pub project: String,
    pub application: String,
}

impl AppRef {
    pub fn new(project: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            application: application.into(),
        }
    }
}

/// Which runners a job may be dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRunner {
    /// Any runner that accepts untargeted work.
    Any,
    /// Exactly the runner with this id.
    Id(String),
}

/// The work a job carries. Payloads are opaque to the scheduler; only the
/// variant tag is inspected (and only for indexing and metrics labels).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    Build(Value),
    Deploy(Value),
    Release(Value),
    Destroy(Value),
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Build(_) => OpKind::Build,
            Operation::Deploy(_) => OpKind::Deploy,
            Operation::Release(_) => OpKind::Release,
            Operation::Destroy(_) => OpKind::Destroy,
        }
    }
}

/// Operation discriminator, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Build,
    Deploy,
    Release,
    Destroy,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Build => write!(f, "build"),
            OpKind::Deploy => write!(f, "deploy"),
            OpKind::Release => write!(f, "release"),
            OpKind::Destroy => write!(f, "destroy"),
        }
    }
}

/// Stored failure descriptor for jobs that ended in `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The failure stored on force-cancel and heartbeat timeout.
    pub fn canceled() -> Self {
        Self::new(ErrorCode::Canceled, "canceled")
    }
}

/// Persisted job record.
///
/// New fields must be optional with `#[serde(default)]` so records written
/// by newer builds stay readable by older ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub application: AppRef,
    pub workspace: String,
    pub target_runner: Option<TargetRunner>,
    pub operation: Operation,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub queue_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assign_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ack_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub complete_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expire_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JobFailure>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        application: AppRef,
        workspace: impl Into<String>,
        target: TargetRunner,
        operation: Operation,
    ) -> Self {
        Self {
            id: id.into(),
            application,
            workspace: workspace.into(),
            target_runner: Some(target),
            operation,
            state: JobState::Queued,
            queue_time: None,
            assign_time: None,
            ack_time: None,
            complete_time: None,
            cancel_time: None,
            expire_time: None,
            result: None,
            error: None,
        }
    }

    /// Set an absolute deadline after which a still-pending job is expired.
    pub fn with_expiry(mut self, expire_time: DateTime<Utc>) -> Self {
        self.expire_time = Some(expire_time);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Deep-copy view returned by lookups and assignment: the persisted record
/// plus the live handles the on-disk form cannot carry.
#[derive(Debug, Clone)]
pub struct JobDetail {
    pub job: Job,
    /// Terminal output, present once the job has started running in this
    /// process lifetime.
    pub output: Option<Buffer>,
    /// True for a queued job whose scope is held by another active job.
    pub blocked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::new(
            "j1",
            AppRef::new("proj", "web"),
            "default",
            TargetRunner::Any,
            Operation::Deploy(json!({"artifact": "web:v3"})),
        )
    }

    #[test]
    fn new_job_is_queued() {
        let j = job();
        assert_eq!(j.state, JobState::Queued);
        assert!(!j.is_terminal());
        assert!(j.queue_time.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Success.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn state_ranks_are_ordered() {
        assert!(JobState::Queued.rank() < JobState::Waiting.rank());
        assert!(JobState::Waiting.rank() < JobState::Running.rank());
    }

    #[test]
    fn operation_kind_tag() {
        assert_eq!(
            Operation::Build(json!({})).kind(),
            OpKind::Build
        );
        assert_eq!(OpKind::Deploy.to_string(), "deploy");
    }

    #[test]
    fn serde_ignores_unknown_fields() {
        let mut value = serde_json::to_value(job()).unwrap();
        value["some_future_field"] = json!("ignored");
        let parsed: Job = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.id, "j1");
        assert_eq!(parsed.state, JobState::Queued);
    }

    #[test]
    fn serde_defaults_missing_state() {
        let parsed: Job = serde_json::from_value(json!({
            "id": "j2",
            "application": {"project": "p", "application": "a"},
            "workspace": "default",
            "target_runner": "any",
            "operation": {"op": "build", "payload": {}},
        }))
        .unwrap();
        assert_eq!(parsed.state, JobState::Queued);
        assert!(parsed.error.is_none());
    }
}
