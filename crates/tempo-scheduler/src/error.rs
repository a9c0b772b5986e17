use tempo_cron::CronError;
use thiserror::Error;

use crate::types::{JobId, Lifecycle};

/// Coarse failure class; decides who sees the error and whether the job keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed cron expression. Surfaced to the registering caller.
    Parse,
    /// Registration rejected. Surfaced to the caller, logged, others unaffected.
    Registration,
    /// No host instance at dispatch time. Logged; the job stays scheduled.
    Lookup,
    /// The handler body failed or panicked. Logged and isolated.
    Invocation,
    /// Invalid start/shutdown transition. Surfaced synchronously.
    Lifecycle,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression `{expression}`: {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: CronError,
    },

    #[error("Cron expression must not be blank ({owner}::{method})")]
    BlankCron { owner: String, method: String },

    #[error("Unsupported parameter #{index} ({kind}) on {owner}::{method}")]
    UnsupportedParameter {
        owner: String,
        method: String,
        index: usize,
        kind: String,
    },

    #[error("No instance supplied and no constructor available for {owner}")]
    NoInstance { owner: String },

    #[error("Instance or constructor supplied for {owner} has a different type")]
    InstanceTypeMismatch { owner: String },

    #[error("Failed to construct {owner}: {reason}")]
    ConstructionFailed { owner: String, reason: String },

    #[error("No instance registered for {owner}")]
    InstanceNotFound { owner: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    #[error("Job {job_id} failed: {reason}")]
    Invocation { job_id: JobId, reason: String },

    #[error("Job {job_id} panicked: {reason}")]
    Panicked { job_id: JobId, reason: String },

    #[error("Cannot {operation} while {state}")]
    InvalidLifecycle {
        operation: &'static str,
        state: Lifecycle,
    },

    #[error("No Tokio runtime available to drive the scheduler loop")]
    NoRuntime,
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::InvalidCron { .. } => ErrorKind::Parse,
            SchedulerError::BlankCron { .. }
            | SchedulerError::UnsupportedParameter { .. }
            | SchedulerError::NoInstance { .. }
            | SchedulerError::InstanceTypeMismatch { .. }
            | SchedulerError::ConstructionFailed { .. }
            | SchedulerError::JobNotFound { .. } => ErrorKind::Registration,
            SchedulerError::InstanceNotFound { .. } => ErrorKind::Lookup,
            SchedulerError::Invocation { .. } | SchedulerError::Panicked { .. } => {
                ErrorKind::Invocation
            }
            SchedulerError::InvalidLifecycle { .. } | SchedulerError::NoRuntime => {
                ErrorKind::Lifecycle
            }
        }
    }

    /// Short error code string emitted as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidCron { .. } => "PARSE_ERROR",
            SchedulerError::BlankCron { .. } => "BLANK_CRON",
            SchedulerError::UnsupportedParameter { .. } => "UNSUPPORTED_PARAMETER",
            SchedulerError::NoInstance { .. } => "NO_INSTANCE",
            SchedulerError::InstanceTypeMismatch { .. } => "INSTANCE_TYPE_MISMATCH",
            SchedulerError::ConstructionFailed { .. } => "CONSTRUCTION_FAILED",
            SchedulerError::InstanceNotFound { .. } => "LOOKUP_ERROR",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::Invocation { .. } => "INVOCATION_FAULT",
            SchedulerError::Panicked { .. } => "INVOCATION_PANIC",
            SchedulerError::InvalidLifecycle { .. } => "LIFECYCLE_ERROR",
            SchedulerError::NoRuntime => "NO_RUNTIME",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
