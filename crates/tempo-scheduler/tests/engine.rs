//! End-to-end behaviour of a running scheduler against the wall clock.
//!
//! Every job here fires on `* * * * * ?` (each second), so the waits are
//! measured in seconds and the margins are generous.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempo_core::SchedulerConfig;
use tempo_scheduler::{
    handler, Constructor, DiscoveredType, ErrorKind, Instance, JobContext, JobMethod, JobState,
    Lifecycle, Scheduler, SchedulerError, StaticSource, TriggerOptions,
};

const EVERY_SECOND: &str = "* * * * * ?";

#[derive(Default)]
struct Tally {
    starts: AtomicUsize,
    ends: AtomicUsize,
    spans: Mutex<Vec<(Instant, Instant)>>,
    contexts: Mutex<Vec<(usize, JobContext)>>,
    started: tokio::sync::Notify,
}

impl Tally {
    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn ends(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }
}

fn host(tally: &Arc<Tally>) -> Option<Instance> {
    Some(Arc::clone(tally) as Instance)
}

fn counting() -> JobMethod {
    JobMethod::new::<Tally, _>("count", |t| {
        t.starts.fetch_add(1, Ordering::SeqCst);
        t.ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

/// Like `counting`, but wakes whoever awaits `Tally::started`.
fn signalling() -> JobMethod {
    JobMethod::new::<Tally, _>("signal", |t| {
        t.starts.fetch_add(1, Ordering::SeqCst);
        t.started.notify_one();
        t.ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

/// Runs for `ms` milliseconds, recording when it started and ended.
fn sleepy(ms: u64) -> JobMethod {
    JobMethod::new::<Tally, _>("sleepy", move |t| {
        let started = Instant::now();
        t.starts.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(ms));
        t.spans.lock().unwrap().push((started, Instant::now()));
        t.ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

/// Records its own index with every context it receives.
fn labelled(index: usize) -> JobMethod {
    JobMethod::with_context::<Tally, _>(format!("job{index}"), move |t, ctx| {
        t.contexts.lock().unwrap().push((index, ctx.clone()));
        t.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

fn with_grace(secs: u64) -> Scheduler {
    Scheduler::new(SchedulerConfig { shutdown_grace_secs: secs, ..Default::default() })
}

async fn wait_for(what: &str, timeout: Duration, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blank_cron_is_rejected_and_other_jobs_still_fire() {
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());

    let err = scheduler.schedule_one(host(&tally), &counting(), "  ").unwrap_err();
    assert!(matches!(err, SchedulerError::BlankCron { .. }));
    assert_eq!(err.kind(), ErrorKind::Registration);
    assert!(scheduler.jobs().is_empty());

    let id = scheduler.schedule_one(host(&tally), &counting(), EVERY_SECOND).unwrap();
    scheduler.start().unwrap();
    wait_for("first firing", Duration::from_secs(3), || tally.starts() >= 1).await;
    scheduler.shutdown().await.unwrap();

    let jobs = scheduler.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invocations_of_one_job_never_overlap() {
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    scheduler.schedule_one(host(&tally), &sleepy(1500), EVERY_SECOND).unwrap();
    scheduler.start().unwrap();

    wait_for("three completed runs", Duration::from_secs(10), || tally.ends() >= 3).await;
    scheduler.shutdown().await.unwrap();

    let mut spans = tally.spans.lock().unwrap().clone();
    spans.sort_by_key(|(start, _)| *start);
    for pair in spans.windows(2) {
        let (_, previous_end) = pair[0];
        let (next_start, _) = pair[1];
        assert!(next_start >= previous_end, "invocations overlapped");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unregister_lets_the_running_invocation_finish_once() {
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    let id = scheduler.schedule_one(host(&tally), &sleepy(1500), EVERY_SECOND).unwrap();
    scheduler.start().unwrap();

    wait_for("invocation start", Duration::from_secs(3), || tally.starts() == 1).await;
    let info = scheduler.unregister(&id).unwrap();
    assert_eq!(info.id, id);
    assert!(scheduler.job(&id).is_none());

    wait_for("invocation end", Duration::from_secs(3), || tally.ends() == 1).await;
    tokio::time::sleep(Duration::from_millis(2000)).await;
    scheduler.shutdown().await.unwrap();

    assert_eq!(tally.starts(), 1);
    assert_eq!(tally.ends(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handlers_receive_their_execution_context() {
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    let id = scheduler.schedule_one(host(&tally), &labelled(0), EVERY_SECOND).unwrap();
    scheduler.start().unwrap();

    wait_for("two firings", Duration::from_secs(4), || tally.starts() >= 2).await;
    scheduler.shutdown().await.unwrap();

    let contexts = tally.contexts.lock().unwrap();
    let (_, first) = &contexts[0];
    assert_eq!(first.job_id, id);
    assert_eq!(first.method, "job0");
    assert!(first.owner.ends_with("Tally"));
    assert_eq!(first.fire_count, 1);
    assert!(first.fired_at >= first.scheduled_at);
    assert!(first.next_fire_at.is_some_and(|next| next > first.scheduled_at));

    let (_, second) = &contexts[1];
    assert_eq!(second.fire_count, 2);
    assert!(second.scheduled_at > first.scheduled_at);
    assert!(second.sequence > first.sequence);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn withdrawn_host_fails_lookup_without_stopping_the_loop() {
    struct Orphan;

    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    let orphan = scheduler
        .schedule_one(Some(handler::instance(Orphan)), &JobMethod::new::<Orphan, _>("noop", |_| Ok(())), EVERY_SECOND)
        .unwrap();
    scheduler.schedule_one(host(&tally), &counting(), EVERY_SECOND).unwrap();
    assert!(scheduler.withdraw_instance::<Orphan>().is_some());

    scheduler.start().unwrap();
    wait_for("healthy job to keep firing", Duration::from_secs(5), || tally.starts() >= 2).await;
    scheduler.shutdown().await.unwrap();

    let info = scheduler.job(&orphan).unwrap();
    assert!(info.failure_count >= 1);
    assert_eq!(info.state, JobState::Scheduled);
    assert!(info.last_error.unwrap_or_default().contains("No instance registered"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_handlers_are_counted_and_keep_firing() {
    struct Flaky;

    let scheduler = Scheduler::default();
    let id = scheduler
        .schedule_one(
            Some(handler::instance(Flaky)),
            &JobMethod::new::<Flaky, _>("fail", |_| Err("upstream unavailable".into())),
            EVERY_SECOND,
        )
        .unwrap();
    scheduler.start().unwrap();

    let watcher = scheduler.clone();
    let watched_id = id.clone();
    wait_for("two failures", Duration::from_secs(5), move || {
        watcher.job(&watched_id).is_some_and(|info| info.failure_count >= 2)
    })
    .await;
    scheduler.shutdown().await.unwrap();

    let info = scheduler.job(&id).unwrap();
    assert_eq!(info.run_count, info.failure_count);
    assert!(info.last_error.unwrap_or_default().contains("upstream unavailable"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_due_together_dispatch_in_registration_order() {
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    for index in 0..5 {
        scheduler.schedule_one(host(&tally), &labelled(index), EVERY_SECOND).unwrap();
    }
    scheduler.start().unwrap();

    wait_for("three rounds", Duration::from_secs(6), || tally.starts() >= 15).await;
    scheduler.shutdown().await.unwrap();

    let mut rounds: BTreeMap<_, Vec<(u64, usize)>> = BTreeMap::new();
    for (index, ctx) in tally.contexts.lock().unwrap().iter() {
        rounds.entry(ctx.scheduled_at).or_default().push((ctx.sequence, *index));
    }
    assert!(rounds.values().any(|round| round.len() == 5));
    for round in rounds.values_mut() {
        round.sort();
        let order: Vec<_> = round.iter().map(|(_, index)| *index).collect();
        let mut expected = order.clone();
        expected.sort();
        assert_eq!(order, expected, "dispatch order within one instant");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_running_invocation() {
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    scheduler.schedule_one(host(&tally), &sleepy(2000), EVERY_SECOND).unwrap();
    scheduler.start().unwrap();

    wait_for("invocation start", Duration::from_secs(3), || tally.starts() == 1).await;
    let began = Instant::now();
    scheduler.shutdown().await.unwrap();

    assert!(began.elapsed() >= Duration::from_millis(1000));
    assert_eq!(tally.ends(), 1);
    assert_eq!(scheduler.state(), Lifecycle::Stopped);

    // Deferred firings were discarded; nothing starts after shutdown.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(tally.starts(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn grace_period_bounds_the_shutdown_wait() {
    let scheduler = with_grace(1);
    let tally = Arc::new(Tally::default());
    scheduler.schedule_one(host(&tally), &sleepy(3500), EVERY_SECOND).unwrap();
    scheduler.start().unwrap();

    wait_for("invocation start", Duration::from_secs(3), || tally.starts() == 1).await;
    let began = Instant::now();
    scheduler.shutdown().await.unwrap();

    assert!(began.elapsed() < Duration::from_millis(2500));
    assert_eq!(tally.ends(), 0);
    assert_eq!(scheduler.state(), Lifecycle::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_resumes_firing() {
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    scheduler.schedule_one(host(&tally), &counting(), EVERY_SECOND).unwrap();

    scheduler.start().unwrap();
    wait_for("first firing", Duration::from_secs(3), || tally.starts() >= 1).await;
    scheduler.shutdown().await.unwrap();

    let stopped_at = tally.starts();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(tally.starts(), stopped_at, "fired while stopped");

    scheduler.start().unwrap();
    wait_for("firing after restart", Duration::from_secs(3), || tally.starts() > stopped_at).await;
    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_mid_round_stops_the_remaining_firings() {
    const JOBS: usize = 10_000;
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    let method = signalling();
    for _ in 0..JOBS {
        scheduler.schedule_one(host(&tally), &method, EVERY_SECOND).unwrap();
    }

    scheduler.start().unwrap();
    tokio::time::timeout(Duration::from_secs(5), tally.started.notified())
        .await
        .expect("no job fired");
    scheduler.shutdown().await.unwrap();

    let fired = scheduler.jobs().iter().filter(|job| job.last_fired_at.is_some()).count();
    assert!(fired < JOBS, "all {JOBS} jobs fired after shutdown began");
    assert!(tally.starts() <= fired);
    let stopped_at = tally.starts();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(tally.starts(), stopped_at, "fired while stopped");

    // Firings cut off by the shutdown are still queued for the next start.
    scheduler.start().unwrap();
    wait_for("every job to fire", Duration::from_secs(10), || {
        scheduler.jobs().iter().all(|job| job.last_fired_at.is_some())
    })
    .await;
    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_added_while_running_wakes_the_loop_early() {
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    let far = scheduler.schedule_one(host(&tally), &counting(), "0 0 0 1 1 ? 2099").unwrap();
    scheduler.start().unwrap();
    // Let the loop settle into its sleep until 2099.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let added = Instant::now();
    let id = scheduler.schedule_one(host(&tally), &counting(), EVERY_SECOND).unwrap();
    wait_for("newly added job to fire", Duration::from_secs(2), || tally.starts() >= 1).await;
    assert!(added.elapsed() <= Duration::from_secs(2));
    scheduler.shutdown().await.unwrap();

    assert!(scheduler.job(&id).unwrap().last_fired_at.is_some());
    assert_eq!(scheduler.job(&far).unwrap().last_fired_at, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn max_fires_retires_the_job() {
    let scheduler = Scheduler::default();
    let tally = Arc::new(Tally::default());
    let id = scheduler
        .schedule_with(
            host(&tally),
            &counting(),
            EVERY_SECOND,
            TriggerOptions { max_fires: Some(1), ..Default::default() },
        )
        .unwrap();
    scheduler.start().unwrap();

    wait_for("single firing", Duration::from_secs(3), || tally.starts() == 1).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    scheduler.shutdown().await.unwrap();

    assert_eq!(tally.starts(), 1);
    assert_eq!(scheduler.job(&id).unwrap().state, JobState::Disabled);
}

static REPORTER_BUILDS: AtomicUsize = AtomicUsize::new(0);

struct Reporter {
    runs: AtomicUsize,
}

impl Default for Reporter {
    fn default() -> Self {
        REPORTER_BUILDS.fetch_add(1, Ordering::SeqCst);
        Self { runs: AtomicUsize::new(0) }
    }
}

struct Unbuildable;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn source_registration_shares_one_host_per_type() {
    let source = StaticSource::new()
        .with(
            DiscoveredType::new::<Reporter>()
                .constructed_by(Constructor::default_for::<Reporter>())
                .job(
                    JobMethod::new::<Reporter, _>("tick", |r| {
                        r.runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                    EVERY_SECOND,
                )
                .job(JobMethod::new::<Reporter, _>("hourly", |_| Ok(())), "0 0 * * * ?")
                .job(JobMethod::new::<Reporter, _>("unscheduled", |_| Ok(())), ""),
        )
        .with(
            DiscoveredType::new::<Unbuildable>()
                .job(JobMethod::new::<Unbuildable, _>("never", |_| Ok(())), EVERY_SECOND),
        );

    let scheduler = Scheduler::default();
    let report = scheduler.schedule(&source, None).unwrap();
    assert_eq!(report.registered.len(), 2);
    assert_eq!(report.rejected, 2);
    assert_eq!(REPORTER_BUILDS.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state(), Lifecycle::Running);

    let registry = Arc::clone(scheduler.registry());
    wait_for("discovered job to fire", Duration::from_secs(3), move || {
        registry
            .instance_for(&tempo_scheduler::OwnerType::of::<Reporter>())
            .ok()
            .and_then(|host| host.downcast_ref::<Reporter>().map(|r| r.runs.load(Ordering::SeqCst)))
            .is_some_and(|runs| runs >= 1)
    })
    .await;
    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn filtered_source_registers_nothing_outside_the_prefix() {
    let source = StaticSource::new().with(
        DiscoveredType::default_constructible::<Tally>().job(counting(), EVERY_SECOND),
    );

    let scheduler = Scheduler::default();
    let report = scheduler.register_source(&source, Some("some_other_crate::"));
    assert!(report.registered.is_empty());
    assert_eq!(report.rejected, 0);
    assert_eq!(scheduler.state(), Lifecycle::Stopped);

    let report = scheduler.register_source(&source, Some(module_path!()));
    assert_eq!(report.registered.len(), 1);
}
