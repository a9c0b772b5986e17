//! `tempo-scheduler` - in-process cron scheduler for host-method jobs.
//!
//! # Overview
//!
//! A job is a method on a host type plus a cron expression. Registration
//! stores it in the [`registry::Registry`], the [`Scheduler`] loop sleeps
//! until the earliest fire time, and the [`dispatch::Dispatcher`] runs the
//! method on Tokio's blocking pool with its arguments bound.
//!
//! ```no_run
//! use tempo_scheduler::{handler, JobMethod, Scheduler};
//!
//! struct Cleanup;
//!
//! # async fn demo() -> tempo_scheduler::Result<()> {
//! let scheduler = Scheduler::default();
//! let sweep = JobMethod::new::<Cleanup, _>("sweep", |_| Ok(()));
//! scheduler.schedule_one(Some(handler::instance(Cleanup)), &sweep, "0 0/5 * * * ?")?;
//! scheduler.start()?;
//! // ...
//! scheduler.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Guarantees
//!
//! | Concern          | Behaviour                                                       |
//! |------------------|-----------------------------------------------------------------|
//! | Overlap          | One invocation per job at a time; a due firing waits, extras coalesce |
//! | Ordering         | Jobs due at the same instant dispatch in registration order     |
//! | Isolation        | Handler errors and panics are logged; the loop keeps running    |
//! | Shutdown         | No new firings; running ones get a bounded grace period         |

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod handler;
mod queue;
pub mod registry;
pub mod source;
pub mod trigger;
pub mod types;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use engine::Scheduler;
pub use error::{ErrorKind, Result, SchedulerError};
pub use handler::{
    Arg, Constructor, HandlerDescriptor, HandlerResult, Instance, Invocable, JobMethod,
    MethodSignature, OwnerType, ParamKind,
};
pub use registry::{JobSnapshot, Registry};
pub use source::{DescriptorSource, DiscoveredJob, DiscoveredType, ScheduleReport, StaticSource};
pub use trigger::{Trigger, TriggerBuilder, TriggerOptions};
pub use types::{FireEvent, JobContext, JobId, JobInfo, JobState, Lifecycle};
