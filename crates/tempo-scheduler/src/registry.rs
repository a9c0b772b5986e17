use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tempo_cron::{CronExpression, DEFAULT_LOOKAHEAD_YEARS};
use tracing::{debug, info, warn};

use crate::{
    dispatch::DispatchOutcome,
    error::{Result, SchedulerError},
    handler::{HandlerDescriptor, Instance, Invocable, JobMethod, OwnerType, ParamKind},
    trigger::{Trigger, TriggerOptions},
    types::{JobId, JobInfo, JobState},
};

struct JobRecord {
    seq: u64,
    descriptor: Arc<HandlerDescriptor>,
    invocable: Arc<dyn Invocable>,
    cron: String,
    trigger: Trigger,
    state: JobState,
    run_count: u64,
    failure_count: u64,
    last_error: Option<String>,
}

impl JobRecord {
    fn info(&self, id: &JobId) -> JobInfo {
        JobInfo {
            id: id.clone(),
            owner: self.descriptor.owner.name().to_string(),
            method: self.descriptor.method.name.clone(),
            cron: self.cron.clone(),
            state: self.state,
            next_fire_at: self.trigger.next_fire_time(),
            last_fired_at: self.trigger.last_fired(),
            run_count: self.run_count,
            failure_count: self.failure_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// The immutable part of a job, as read by dispatch.
#[derive(Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub seq: u64,
    pub descriptor: Arc<HandlerDescriptor>,
    pub(crate) invocable: Arc<dyn Invocable>,
}

impl std::fmt::Debug for JobSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSnapshot")
            .field("id", &self.id)
            .field("seq", &self.seq)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Result of advancing a job's trigger for one firing.
#[derive(Debug, Clone)]
pub(crate) struct Firing {
    pub job: JobSnapshot,
    pub scheduled_at: DateTime<Utc>,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub fire_count: u32,
}

struct Host {
    owner: OwnerType,
    instance: Instance,
}

/// Job records plus the table of live handler hosts.
///
/// Records are keyed by [`JobId`]; hosts are keyed by type, one per type,
/// last writer wins. Dispatch only reads through [`Registry::snapshot`] and
/// [`Registry::instance_for`], so an in-flight invocation keeps its own
/// references even if the job is unregistered underneath it.
pub struct Registry {
    records: RwLock<HashMap<JobId, JobRecord>>,
    hosts: DashMap<TypeId, Host>,
    next_seq: AtomicU64,
    lookahead_years: u32,
}

impl Registry {
    pub fn new(lookahead_years: u32) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            hosts: DashMap::new(),
            next_seq: AtomicU64::new(0),
            lookahead_years,
        }
    }

    /// Validate and store a job in the `Pending` state.
    ///
    /// Checks run cheapest first: blank cron, cron syntax, parameter kinds,
    /// then host resolution. Nothing is stored unless every check passes.
    pub fn register(
        &self,
        method: &JobMethod,
        instance: Option<Instance>,
        cron: &str,
        options: TriggerOptions,
        now: DateTime<Utc>,
    ) -> Result<JobId> {
        let descriptor = method.descriptor();
        let owner = descriptor.owner;
        let method_name = &descriptor.method.name;

        if cron.trim().is_empty() {
            return Err(SchedulerError::BlankCron {
                owner: owner.name().to_string(),
                method: method_name.clone(),
            });
        }

        let rule = CronExpression::parse(cron)
            .map_err(|source| SchedulerError::InvalidCron { expression: cron.to_string(), source })?
            .with_lookahead_years(self.lookahead_years);

        if let Some((index, kind)) = descriptor
            .method
            .params
            .iter()
            .enumerate()
            .find(|(_, p)| matches!(p, ParamKind::Unsupported(_)))
        {
            return Err(SchedulerError::UnsupportedParameter {
                owner: owner.name().to_string(),
                method: method_name.clone(),
                index,
                kind: kind.to_string(),
            });
        }

        if let Some(host) = self.resolve_host(method, instance)? {
            self.put_instance(owner, host);
        }

        let trigger = options.builder(rule).build(now);
        let id = JobId::new();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        info!(
            job_id = %id,
            owner = owner.name(),
            method = %method_name,
            %cron,
            next_fire_at = ?trigger.next_fire_time(),
            "job registered"
        );

        self.write().insert(
            id.clone(),
            JobRecord {
                seq,
                descriptor: Arc::new(descriptor.clone()),
                invocable: method.invocable(),
                cron: cron.to_string(),
                trigger,
                state: JobState::Pending,
                run_count: 0,
                failure_count: 0,
                last_error: None,
            },
        );
        Ok(id)
    }

    /// Remove a job. Queue entries and in-flight invocations are left to finish on their own.
    pub fn unregister(&self, id: &JobId) -> Result<JobInfo> {
        let record = self
            .write()
            .remove(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.clone() })?;
        info!(job_id = %id, method = %record.descriptor.method.name, "job unregistered");
        Ok(record.info(id))
    }

    /// Install `instance` as the host for `owner`, replacing any previous one.
    pub fn put_instance(&self, owner: OwnerType, instance: Instance) {
        let previous = self.hosts.insert(owner.id(), Host { owner, instance: Arc::clone(&instance) });
        match previous {
            Some(prev) if !Arc::ptr_eq(&prev.instance, &instance) => {
                warn!(owner = owner.name(), "replacing existing host instance; earlier jobs now run on the new one");
            }
            Some(_) => {}
            None => debug!(owner = owner.name(), "host instance installed"),
        }
    }

    pub fn instance_for(&self, owner: &OwnerType) -> Result<Instance> {
        self.hosts
            .get(&owner.id())
            .map(|host| Arc::clone(&host.instance))
            .ok_or_else(|| SchedulerError::InstanceNotFound { owner: owner.name().to_string() })
    }

    /// Remove the host for `owner`. Its jobs stay registered and report lookup errors.
    pub fn withdraw_instance(&self, owner: &OwnerType) -> Option<Instance> {
        let (_, host) = self.hosts.remove(&owner.id())?;
        info!(owner = host.owner.name(), "host instance withdrawn");
        Some(host.instance)
    }

    pub fn snapshot(&self, id: &JobId) -> Option<JobSnapshot> {
        self.read().get(id).map(|record| JobSnapshot {
            id: id.clone(),
            seq: record.seq,
            descriptor: Arc::clone(&record.descriptor),
            invocable: Arc::clone(&record.invocable),
        })
    }

    pub fn info(&self, id: &JobId) -> Option<JobInfo> {
        self.read().get(id).map(|record| record.info(id))
    }

    /// Every job, in registration order.
    pub fn infos(&self) -> Vec<JobInfo> {
        let records = self.read();
        let mut rows: Vec<_> = records.iter().map(|(id, r)| (r.seq, r.info(id))).collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, info)| info).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- engine-facing transitions -----------------------------------------

    /// Move a `Pending` job to `Scheduled`. Returns `(seq, due_at)` to enqueue,
    /// or `None` if the job is already queued or its trigger has nothing to fire.
    pub(crate) fn mark_scheduled(&self, id: &JobId) -> Result<Option<(u64, DateTime<Utc>)>> {
        let mut records = self.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.clone() })?;

        if record.state != JobState::Pending {
            return Ok(None);
        }
        match record.trigger.next_fire_time() {
            Some(due_at) => {
                record.state = JobState::Scheduled;
                Ok(Some((record.seq, due_at)))
            }
            None => {
                record.state = JobState::Disabled;
                warn!(job_id = %id, cron = %record.cron, "trigger has no future fire time; job disabled");
                Ok(None)
            }
        }
    }

    /// Record a firing of a scheduled job and advance its trigger.
    ///
    /// `None` if the job was unregistered or is not in the `Scheduled` state.
    pub(crate) fn fire(&self, id: &JobId, fired_at: DateTime<Utc>) -> Option<Firing> {
        let mut records = self.write();
        let record = records.get_mut(id)?;
        if record.state != JobState::Scheduled {
            return None;
        }

        let scheduled_at = record.trigger.next_fire_time()?;
        let next_fire_at = record.trigger.advance(fired_at);
        if next_fire_at.is_none() {
            record.state = JobState::Disabled;
            warn!(job_id = %id, fires = record.trigger.fire_count(), "trigger exhausted; job disabled");
        }

        Some(Firing {
            job: JobSnapshot {
                id: id.clone(),
                seq: record.seq,
                descriptor: Arc::clone(&record.descriptor),
                invocable: Arc::clone(&record.invocable),
            },
            scheduled_at,
            next_fire_at,
            fire_count: record.trigger.fire_count(),
        })
    }

    pub(crate) fn record_outcome(&self, id: &JobId, outcome: &DispatchOutcome) {
        let mut records = self.write();
        let Some(record) = records.get_mut(id) else {
            return;
        };
        record.run_count += 1;
        if let DispatchOutcome::Failed(e) = outcome {
            record.failure_count += 1;
            record.last_error = Some(e.to_string());
        }
    }

    // --- private helpers ---------------------------------------------------

    /// Pick the host a new job will run on. `Some` means a host must be installed.
    fn resolve_host(&self, method: &JobMethod, instance: Option<Instance>) -> Result<Option<Instance>> {
        let owner = method.descriptor().owner;
        let mismatch = || SchedulerError::InstanceTypeMismatch { owner: owner.name().to_string() };

        if let Some(instance) = instance {
            return if owner.hosts(&instance) { Ok(Some(instance)) } else { Err(mismatch()) };
        }
        if self.hosts.contains_key(&owner.id()) {
            return Ok(None);
        }
        match method.constructor() {
            Some(constructor) if constructor.owner() != owner => Err(mismatch()),
            Some(constructor) => constructor.construct().map(Some).map_err(|reason| {
                SchedulerError::ConstructionFailed { owner: owner.name().to_string(), reason }
            }),
            None => Err(SchedulerError::NoInstance { owner: owner.name().to_string() }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKAHEAD_YEARS)
    }
}
