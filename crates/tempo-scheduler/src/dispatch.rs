use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::{
    error::{Result, SchedulerError},
    handler::{panic_message, Arg, ParamKind},
    registry::{JobSnapshot, Registry},
    types::JobContext,
};

/// How one invocation ended.
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed { elapsed: Duration },
    Failed(SchedulerError),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Completed { .. })
    }
}

/// Resolves a job's host, binds its arguments and runs it on the blocking pool.
///
/// Every failure is logged here and returned as an outcome; nothing
/// propagates to the scheduler loop.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, job: &JobSnapshot, ctx: JobContext) -> DispatchOutcome {
        let started = Instant::now();
        let sequence = ctx.sequence;

        match self.invoke(job, ctx).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                debug!(
                    job_id = %job.id,
                    method = %job.descriptor.method.name,
                    sequence,
                    duration_ms = elapsed.as_millis() as u64,
                    "job completed"
                );
                DispatchOutcome::Completed { elapsed }
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    owner = job.descriptor.owner.name(),
                    method = %job.descriptor.method.name,
                    code = e.code(),
                    error = %e,
                    "job dispatch failed"
                );
                DispatchOutcome::Failed(e)
            }
        }
    }

    async fn invoke(&self, job: &JobSnapshot, ctx: JobContext) -> Result<()> {
        let instance = self.registry.instance_for(&job.descriptor.owner)?;
        let args = bind_arguments(&job.descriptor.method.params, &ctx)?;
        let invocable = Arc::clone(&job.invocable);
        let job_id = job.id.clone();

        // Handler bodies are synchronous and may block.
        let joined = tokio::task::spawn_blocking(move || invocable.invoke(&instance, &args)).await;
        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SchedulerError::Invocation { job_id, reason: e.to_string() }),
            Err(e) if e.is_panic() => Err(SchedulerError::Panicked {
                job_id,
                reason: panic_message(e.into_panic()),
            }),
            Err(e) => Err(SchedulerError::Invocation { job_id, reason: e.to_string() }),
        }
    }
}

/// Build the argument list for a method: the context for each context
/// parameter, in declaration order.
pub fn bind_arguments(params: &[ParamKind], ctx: &JobContext) -> Result<Vec<Arg>> {
    params
        .iter()
        .enumerate()
        .map(|(index, param)| match param {
            ParamKind::ExecutionContext => Ok(Arg::Context(ctx.clone())),
            ParamKind::Unsupported(kind) => Err(SchedulerError::UnsupportedParameter {
                owner: ctx.owner.to_string(),
                method: ctx.method.clone(),
                index,
                kind: kind.clone(),
            }),
        })
        .collect()
}
