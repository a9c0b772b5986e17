//! `tempo-core` - identifiers, configuration and errors shared by every tempo crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::{LoggingConfig, SchedulerConfig, TempoConfig};
pub use error::{CoreError, Result};
pub use types::JobId;
