use chrono::{DateTime, Duration, Utc};
use tempo_cron::CronExpression;

/// A cron rule plus firing bookkeeping.
///
/// Caches the next fire time; [`Trigger::advance`] moves it forward after a
/// firing and returns `None` once the trigger is exhausted.
#[derive(Debug, Clone)]
pub struct Trigger {
    rule: CronExpression,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    max_fires: Option<u32>,
    fire_count: u32,
    last_fired: Option<DateTime<Utc>>,
    next: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TriggerBuilder {
    rule: CronExpression,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    max_fires: Option<u32>,
}

impl TriggerBuilder {
    /// No firing earlier than `start` (inclusive).
    pub fn not_before(mut self, start: DateTime<Utc>) -> Self {
        self.not_before = Some(start);
        self
    }

    /// No firing later than `end` (inclusive).
    pub fn not_after(mut self, end: DateTime<Utc>) -> Self {
        self.not_after = Some(end);
        self
    }

    pub fn max_fires(mut self, n: u32) -> Self {
        self.max_fires = Some(n);
        self
    }

    /// Compute the first fire time strictly after `now`.
    pub fn build(self, now: DateTime<Utc>) -> Trigger {
        let mut trigger = Trigger {
            rule: self.rule,
            not_before: self.not_before,
            not_after: self.not_after,
            max_fires: self.max_fires,
            fire_count: 0,
            last_fired: None,
            next: None,
        };
        trigger.next = trigger.compute_after(now);
        trigger
    }
}

/// Trigger bounds supplied at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerOptions {
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub max_fires: Option<u32>,
}

impl TriggerOptions {
    pub fn builder(&self, rule: CronExpression) -> TriggerBuilder {
        TriggerBuilder {
            rule,
            not_before: self.not_before,
            not_after: self.not_after,
            max_fires: self.max_fires,
        }
    }
}

impl Trigger {
    pub fn builder(rule: CronExpression) -> TriggerBuilder {
        TriggerBuilder { rule, not_before: None, not_after: None, max_fires: None }
    }

    pub fn new(rule: CronExpression, now: DateTime<Utc>) -> Self {
        Self::builder(rule).build(now)
    }

    pub fn rule(&self) -> &CronExpression {
        &self.rule
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next
    }

    pub fn fire_count(&self) -> u32 {
        self.fire_count
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }

    /// Record a firing at `fired_at` and compute the following fire time.
    ///
    /// The new time is after both `fired_at` and the previously cached time,
    /// so a clock reading behind the cached value never moves it backward.
    /// A late firing advances from the actual instant: missed occurrences
    /// collapse into the one that just ran. An exhausted trigger stays exhausted.
    pub fn advance(&mut self, fired_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let cached = self.next?;
        self.fire_count = self.fire_count.saturating_add(1);
        self.last_fired = Some(fired_at);
        self.next = self.compute_after(cached.max(fired_at));
        self.next
    }

    fn compute_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.max_fires.is_some_and(|max| self.fire_count >= max) {
            return None;
        }

        let base = match self.not_before {
            Some(start) if from < start => start - Duration::seconds(1),
            _ => from,
        };
        let mut next = self.rule.next_after(base)?;
        // `start - 1s` can land on a sub-second start; step until inside the window.
        if let Some(start) = self.not_before {
            while next < start {
                next = self.rule.next_after(next)?;
            }
        }

        match self.not_after {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, s).unwrap()
    }

    fn every_five_minutes() -> CronExpression {
        "0 0/5 * * * ?".parse().unwrap()
    }

    #[test]
    fn first_fire_and_advance_follow_the_rule() {
        let mut trigger = Trigger::new(every_five_minutes(), at(12, 3, 0));
        assert_eq!(trigger.next_fire_time(), Some(at(12, 5, 0)));

        assert_eq!(trigger.advance(at(12, 5, 0)), Some(at(12, 10, 0)));
        assert_eq!(trigger.fire_count(), 1);
        assert_eq!(trigger.last_fired(), Some(at(12, 5, 0)));
    }

    #[test]
    fn clock_behind_cached_time_does_not_move_backward() {
        let mut trigger = Trigger::new(every_five_minutes(), at(12, 3, 0));
        // Firing recorded with a clock that reads earlier than the due time.
        assert_eq!(trigger.advance(at(12, 4, 58)), Some(at(12, 10, 0)));
    }

    #[test]
    fn late_firing_collapses_missed_occurrences() {
        let mut trigger = Trigger::new(every_five_minutes(), at(12, 3, 0));
        assert_eq!(trigger.advance(at(12, 17, 30)), Some(at(12, 20, 0)));
    }

    #[test]
    fn max_fires_exhausts_the_trigger() {
        let mut trigger = Trigger::builder(every_five_minutes()).max_fires(2).build(at(12, 3, 0));
        assert!(trigger.advance(at(12, 5, 0)).is_some());
        assert_eq!(trigger.advance(at(12, 10, 0)), None);
        assert!(trigger.is_exhausted());
        // Stays exhausted.
        assert_eq!(trigger.advance(at(12, 20, 0)), None);
        assert_eq!(trigger.fire_count(), 2);
    }

    #[test]
    fn zero_max_fires_never_fires() {
        let trigger = Trigger::builder(every_five_minutes()).max_fires(0).build(at(12, 3, 0));
        assert!(trigger.is_exhausted());
    }

    #[test]
    fn not_before_is_inclusive() {
        let trigger = Trigger::builder(every_five_minutes())
            .not_before(at(13, 0, 0))
            .build(at(12, 3, 0));
        assert_eq!(trigger.next_fire_time(), Some(at(13, 0, 0)));

        let trigger = Trigger::builder(every_five_minutes())
            .not_before(at(13, 1, 0))
            .build(at(12, 3, 0));
        assert_eq!(trigger.next_fire_time(), Some(at(13, 5, 0)));
    }

    #[test]
    fn not_after_ends_the_trigger() {
        let mut trigger = Trigger::builder(every_five_minutes())
            .not_after(at(12, 10, 0))
            .build(at(12, 3, 0));
        assert_eq!(trigger.advance(at(12, 5, 0)), Some(at(12, 10, 0)));
        assert_eq!(trigger.advance(at(12, 10, 0)), None);
    }

    #[test]
    fn window_in_the_past_is_exhausted_at_build() {
        let trigger = Trigger::builder(every_five_minutes())
            .not_after(at(11, 0, 0))
            .build(at(12, 3, 0));
        assert!(trigger.is_exhausted());
    }
}
