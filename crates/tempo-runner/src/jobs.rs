//! Built-in job hosts.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tempo_scheduler::{DiscoveredType, HandlerResult, JobContext, JobMethod, StaticSource};
use tracing::info;

/// Logs a beat every ten seconds with the firing's context.
#[derive(Default)]
pub struct Heartbeat {
    beats: AtomicU64,
}

impl Heartbeat {
    fn beat(&self, ctx: &JobContext) -> HandlerResult {
        let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            job_id = %ctx.job_id,
            beat,
            scheduled_at = %ctx.scheduled_at,
            next_fire_at = ?ctx.next_fire_at,
            "heartbeat"
        );
        Ok(())
    }
}

/// Once a minute, reports how long the runner has been up.
pub struct Summary {
    started_at: DateTime<Utc>,
    reports: AtomicU64,
}

impl Default for Summary {
    fn default() -> Self {
        Self { started_at: Utc::now(), reports: AtomicU64::new(0) }
    }
}

impl Summary {
    fn report(&self) -> HandlerResult {
        let reports = self.reports.fetch_add(1, Ordering::Relaxed) + 1;
        let uptime = Utc::now() - self.started_at;
        info!(reports, uptime_secs = uptime.num_seconds(), "summary");
        Ok(())
    }
}

pub fn builtin_source() -> StaticSource {
    StaticSource::new()
        .with(
            DiscoveredType::default_constructible::<Heartbeat>()
                .job(JobMethod::with_context::<Heartbeat, _>("beat", Heartbeat::beat), "*/10 * * * * ?"),
        )
        .with(
            DiscoveredType::default_constructible::<Summary>()
                .job(JobMethod::new::<Summary, _>("report", Summary::report), "0 * * * * ?"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_scheduler::{DescriptorSource, JobState, Lifecycle, Scheduler};

    #[test]
    fn builtin_jobs_all_register() {
        let scheduler = Scheduler::default();
        let report = scheduler.register_source(&builtin_source(), None);
        assert_eq!(report.registered.len(), 2);
        assert_eq!(report.rejected, 0);
        assert_eq!(scheduler.state(), Lifecycle::Stopped);
        assert!(scheduler.jobs().iter().all(|job| job.state == JobState::Scheduled));
    }

    #[test]
    fn filter_selects_one_host() {
        let prefix = format!("{}::Heartbeat", module_path!().trim_end_matches("::tests"));
        let found = builtin_source().discover(Some(&prefix));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].methods()[0].cron, "*/10 * * * * ?");
    }

    #[test]
    fn job_list_serializes() {
        let scheduler = Scheduler::default();
        scheduler.register_source(&builtin_source(), None);
        let json = serde_json::to_value(scheduler.jobs()).unwrap();
        assert_eq!(json[0]["method"], "beat");
        assert_eq!(json[0]["state"], "scheduled");
        assert_eq!(json[1]["cron"], "0 * * * * ?");
    }
}
