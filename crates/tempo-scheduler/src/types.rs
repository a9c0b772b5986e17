use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use tempo_core::JobId;

/// Registration state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Registered, not yet in the wait queue.
    Pending,
    /// Waiting in the queue for its next fire time.
    Scheduled,
    /// Trigger has no future occurrence; never fires again.
    Disabled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Scheduled => "scheduled",
            JobState::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of the whole engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Stopped,
    Running,
    ShuttingDown,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Lifecycle::Stopped => "stopped",
            Lifecycle::Running => "running",
            Lifecycle::ShuttingDown => "shutting down",
        };
        write!(f, "{s}")
    }
}

/// "Job X is due at T". Produced by the loop's due-check, consumed by dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEvent {
    pub job_id: JobId,
    /// Registration order of the job.
    pub seq: u64,
    pub due_at: DateTime<Utc>,
}

/// The execution context handed to handlers whose signature asks for it.
#[derive(Debug, Clone, Serialize)]
pub struct JobContext {
    pub job_id: JobId,
    /// Fully-qualified type name of the handler host.
    pub owner: &'static str,
    pub method: String,
    /// The fire time the trigger produced.
    pub scheduled_at: DateTime<Utc>,
    /// When the invocation actually started; later than `scheduled_at` after a deferral.
    pub fired_at: DateTime<Utc>,
    pub next_fire_at: Option<DateTime<Utc>>,
    /// 1-based count of firings of this job's trigger.
    pub fire_count: u32,
    /// Engine-wide dispatch order; strictly increasing across all jobs.
    pub sequence: u64,
}

/// Read-only view of a registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: JobId,
    pub owner: String,
    pub method: String,
    pub cron: String,
    pub state: JobState,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Invocations that finished, successfully or not.
    pub run_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
}
