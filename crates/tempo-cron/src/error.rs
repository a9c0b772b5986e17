use thiserror::Error;

/// Reasons a cron expression is rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("cron expression is empty")]
    Empty,

    #[error("expected 6 or 7 fields, found {found}")]
    FieldCount { found: usize },

    #[error("{field} value {value} is out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Malformed token: bad number, unknown name, reversed range, zero step, misplaced `?`.
    #[error("invalid {field} field `{token}`: {reason}")]
    Syntax {
        field: &'static str,
        token: String,
        reason: &'static str,
    },

    /// Well-formed, but no calendar date satisfies the day/month/year fields.
    #[error("`{expression}` never matches a calendar date")]
    Unsatisfiable { expression: String },
}

pub type Result<T> = std::result::Result<T, CronError>;
