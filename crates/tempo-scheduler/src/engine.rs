use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempo_core::SchedulerConfig;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{
    dispatch::Dispatcher,
    error::{Result, SchedulerError},
    handler::{Instance, JobMethod, OwnerType},
    queue::FireQueue,
    registry::{Firing, Registry},
    source::{DescriptorSource, ScheduleReport},
    trigger::TriggerOptions,
    types::{FireEvent, JobContext, JobId, JobInfo, Lifecycle},
};

/// A firing waiting for a worker: either dispatched now or deferred until
/// the job's current invocation finishes.
struct PendingFire {
    firing: Firing,
}

impl PendingFire {
    fn context(&self, sequence: u64, fired_at: DateTime<Utc>) -> JobContext {
        let job = &self.firing.job;
        JobContext {
            job_id: job.id.clone(),
            owner: job.descriptor.owner.name(),
            method: job.descriptor.method.name.clone(),
            scheduled_at: self.firing.scheduled_at,
            fired_at,
            next_fire_at: self.firing.next_fire_at,
            fire_count: self.firing.fire_count,
            sequence,
        }
    }
}

struct EngineState {
    lifecycle: Lifecycle,
    queue: FireQueue,
    /// Jobs with an invocation running. At most one per job.
    in_flight: HashSet<JobId>,
    /// At most one deferred firing per in-flight job.
    deferred: HashMap<JobId, PendingFire>,
    dispatch_seq: u64,
    loop_handle: Option<JoinHandle<()>>,
}

impl EngineState {
    fn next_sequence(&mut self) -> u64 {
        self.dispatch_seq += 1;
        self.dispatch_seq
    }
}

struct Shared {
    config: SchedulerConfig,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    state: Mutex<EngineState>,
    /// Wakes the loop when an earlier job is queued or shutdown begins.
    wake: Notify,
    workers: TaskTracker,
}

/// In-process cron scheduler.
///
/// Cheap to clone; every clone drives the same engine. Jobs can be
/// registered in any lifecycle state and fire only while running.
/// Call [`Scheduler::shutdown`] before dropping the last handle: the loop
/// task keeps the engine alive until then.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let registry = Arc::new(Registry::new(config.lookahead_years()));
        Self {
            shared: Arc::new(Shared {
                dispatcher: Dispatcher::new(Arc::clone(&registry)),
                registry,
                config,
                state: Mutex::new(EngineState {
                    lifecycle: Lifecycle::Stopped,
                    queue: FireQueue::default(),
                    in_flight: HashSet::new(),
                    deferred: HashMap::new(),
                    dispatch_seq: 0,
                    loop_handle: None,
                }),
                wake: Notify::new(),
                workers: TaskTracker::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn state(&self) -> Lifecycle {
        self.shared.lock_state().lifecycle
    }

    // --- registration ------------------------------------------------------

    /// Register a job without queueing it. Rejections are logged and returned.
    pub fn register(&self, instance: Option<Instance>, method: &JobMethod, cron: &str) -> Result<JobId> {
        self.register_with(instance, method, cron, TriggerOptions::default())
    }

    pub fn register_with(
        &self,
        instance: Option<Instance>,
        method: &JobMethod,
        cron: &str,
        options: TriggerOptions,
    ) -> Result<JobId> {
        self.shared
            .registry
            .register(method, instance, cron, options, Utc::now())
            .inspect_err(|e| {
                let descriptor = method.descriptor();
                error!(
                    owner = descriptor.owner.name(),
                    method = %descriptor.method.name,
                    %cron,
                    code = e.code(),
                    error = %e,
                    "job registration rejected"
                );
            })
    }

    /// Queue a registered job by its next fire time. No-op if already queued.
    pub fn schedule_job(&self, id: &JobId) -> Result<()> {
        let Some((seq, due_at)) = self.shared.registry.mark_scheduled(id)? else {
            return Ok(());
        };
        let earliest = {
            let mut state = self.shared.lock_state();
            state.queue.push(id.clone(), seq, due_at);
            state.queue.peek_due() == Some(due_at)
        };
        debug!(job_id = %id, %due_at, "job queued");
        if earliest {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Register and queue one handler method.
    pub fn schedule_one(&self, instance: Option<Instance>, method: &JobMethod, cron: &str) -> Result<JobId> {
        self.schedule_with(instance, method, cron, TriggerOptions::default())
    }

    pub fn schedule_with(
        &self,
        instance: Option<Instance>,
        method: &JobMethod,
        cron: &str,
        options: TriggerOptions,
    ) -> Result<JobId> {
        let id = self.register_with(instance, method, cron, options)?;
        self.schedule_job(&id)?;
        Ok(id)
    }

    /// Register and queue every job a source discovers, without starting.
    ///
    /// One host is constructed per discovered type and shared by its methods.
    /// Rejected jobs are logged and counted; they never stop the others.
    pub fn register_source(&self, source: &dyn DescriptorSource, filter: Option<&str>) -> ScheduleReport {
        let mut report = ScheduleReport::default();

        for ty in source.discover(filter) {
            let instance = match ty.constructor().map(|c| c.construct()).transpose() {
                Ok(instance) => instance,
                Err(reason) => {
                    error!(owner = ty.owner().name(), %reason, "failed to construct job host; skipping its jobs");
                    report.rejected += ty.methods().len();
                    continue;
                }
            };

            for job in ty.methods() {
                match self.schedule_one(instance.clone(), &job.method, &job.cron) {
                    Ok(id) => report.registered.push(id),
                    Err(_) => report.rejected += 1,
                }
            }
        }

        info!(registered = report.registered.len(), rejected = report.rejected, "descriptor source registered");
        report
    }

    /// Register everything a source discovers, then start.
    pub fn schedule(&self, source: &dyn DescriptorSource, filter: Option<&str>) -> Result<ScheduleReport> {
        let report = self.register_source(source, filter);
        self.start()?;
        Ok(report)
    }

    /// Remove a job. An in-flight invocation finishes; no further firings happen.
    pub fn unregister(&self, id: &JobId) -> Result<JobInfo> {
        let mut state = self.shared.lock_state();
        let info = self.shared.registry.unregister(id)?;
        if state.deferred.remove(id).is_some() {
            debug!(job_id = %id, "dropped deferred firing of unregistered job");
        }
        Ok(info)
    }

    /// Install a host for `T` explicitly, replacing any previous one.
    pub fn put_instance<T: Any + Send + Sync>(&self, instance: Arc<T>) {
        self.shared.registry.put_instance(OwnerType::of::<T>(), instance);
    }

    /// Remove the host for `T`. Its jobs stay scheduled and log lookup errors.
    pub fn withdraw_instance<T: Any>(&self) -> Option<Instance> {
        self.shared.registry.withdraw_instance(&OwnerType::of::<T>())
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.shared.registry.infos()
    }

    pub fn job(&self, id: &JobId) -> Option<JobInfo> {
        self.shared.registry.info(id)
    }

    // --- lifecycle ---------------------------------------------------------

    /// Start the loop on the current Tokio runtime. Stopped → Running.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let mut state = self.shared.lock_state();
        if state.lifecycle != Lifecycle::Stopped {
            return Err(SchedulerError::InvalidLifecycle { operation: "start", state: state.lifecycle });
        }
        state.lifecycle = Lifecycle::Running;
        self.shared.workers.reopen();
        state.loop_handle = Some(runtime.spawn(Shared::run(Arc::clone(&self.shared))));
        info!(jobs = self.shared.registry.len(), queued = state.queue.len(), "scheduler started");
        Ok(())
    }

    /// Stop firing, wait for running invocations up to the grace period, then stop.
    ///
    /// Idempotent when already stopped. A concurrent call made while another
    /// shutdown is draining returns immediately.
    pub async fn shutdown(&self) -> Result<()> {
        let handle = {
            let mut state = self.shared.lock_state();
            if state.lifecycle != Lifecycle::Running {
                debug!(state = %state.lifecycle, "shutdown requested while not running");
                return Ok(());
            }
            state.lifecycle = Lifecycle::ShuttingDown;
            let dropped = state.deferred.len();
            state.deferred.clear();
            if dropped > 0 {
                info!(dropped, "discarding deferred firings");
            }
            state.loop_handle.take()
        };

        info!("scheduler shutting down");
        self.shared.wake.notify_one();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler loop ended abnormally");
            }
        }

        self.shared.workers.close();
        let grace = self.shared.config.shutdown_grace();
        if tokio::time::timeout(grace, self.shared.workers.wait()).await.is_err() {
            warn!(
                still_running = self.shared.workers.len(),
                grace_secs = grace.as_secs(),
                "shutdown grace period elapsed with invocations still running"
            );
        }

        self.shared.lock_state().lifecycle = Lifecycle::Stopped;
        info!("scheduler stopped");
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Main loop. Sleeps until the earliest queued fire time, or until woken.
    async fn run(shared: Arc<Shared>) {
        debug!("scheduler loop started");
        loop {
            let due = {
                let mut state = shared.lock_state();
                if state.lifecycle != Lifecycle::Running {
                    break;
                }
                state.queue.pop_due(Utc::now())
            };

            for event in due {
                Shared::fire(&shared, event);
            }

            let next_due = {
                let state = shared.lock_state();
                if state.lifecycle != Lifecycle::Running {
                    break;
                }
                state.queue.peek_due()
            };

            match next_due {
                Some(at) => {
                    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = shared.wake.notified() => {}
                    }
                }
                None => shared.wake.notified().await,
            }
        }
        debug!("scheduler loop stopped");
    }

    /// Advance the job's trigger, re-queue it, then dispatch or defer the firing.
    fn fire(shared: &Arc<Shared>, event: FireEvent) {
        let FireEvent { job_id, seq, due_at } = event;
        // Held across the registry update so `unregister` cannot slip between
        // the firing and its deferral.
        let mut state = shared.lock_state();
        if state.lifecycle != Lifecycle::Running {
            // Shutdown began mid-round; keep the entry so a restart still fires it.
            state.queue.push(job_id, seq, due_at);
            return;
        }
        let Some(firing) = shared.registry.fire(&job_id, Utc::now()) else {
            debug!(job_id = %job_id, "skipping queue entry of removed job");
            return;
        };

        if let Some(next) = firing.next_fire_at {
            state.queue.push(job_id.clone(), firing.job.seq, next);
            debug!(job_id = %job_id, %due_at, next_fire_at = %next, "job rescheduled");
        }

        let pending = PendingFire { firing };
        if state.in_flight.contains(&job_id) {
            if state.deferred.insert(job_id.clone(), pending).is_some() {
                warn!(job_id = %job_id, %due_at, "job still running; coalesced with an already deferred firing");
            } else {
                debug!(job_id = %job_id, %due_at, "job still running; firing deferred");
            }
            return;
        }

        state.in_flight.insert(job_id);
        let sequence = state.next_sequence();
        drop(state);
        Shared::spawn_worker(shared, pending, sequence);
    }

    fn spawn_worker(shared: &Arc<Shared>, pending: PendingFire, sequence: u64) {
        let worker = Arc::clone(shared);
        shared.workers.spawn(async move {
            let ctx = pending.context(sequence, Utc::now());
            let job = &pending.firing.job;
            debug!(
                job_id = %job.id,
                owner = job.descriptor.owner.name(),
                method = %job.descriptor.method.name,
                sequence,
                "dispatching job"
            );
            let outcome = worker.dispatcher.dispatch(job, ctx).await;
            worker.registry.record_outcome(&job.id, &outcome);
            Shared::complete(&worker, &job.id);
        });
    }

    /// Release the job's in-flight slot, or hand it straight to its deferred firing.
    fn complete(shared: &Arc<Shared>, job_id: &JobId) {
        let mut state = shared.lock_state();
        let deferred = match state.lifecycle {
            Lifecycle::Running => state.deferred.remove(job_id),
            _ => None,
        };

        match deferred {
            Some(pending) => {
                let sequence = state.next_sequence();
                drop(state);
                debug!(job_id = %job_id, "running deferred firing");
                Shared::spawn_worker(shared, pending, sequence);
            }
            None => {
                state.in_flight.remove(job_id);
            }
        }
    }
}
