use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, SubsecRound, Timelike, Utc};

use crate::error::{CronError, Result};
use crate::field::{FieldKind, FieldSet};

/// Search horizon, in years past the starting instant, when the year field is `*`.
///
/// Feb 29 is the sparsest satisfiable date and recurs at most eight years apart.
pub const DEFAULT_LOOKAHEAD_YEARS: u32 = 10;

/// Years sampled at parse time to prove a day/month combination exists.
/// Includes leap years 2000 and 2004.
const SAMPLE_YEARS: std::ops::RangeInclusive<i32> = 2000..=2007;

/// A parsed cron expression: the recurrence rule behind every trigger.
#[derive(Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    years: FieldSet,
    lookahead_years: u32,
}

impl CronExpression {
    /// Parse a six- or seven-field expression.
    ///
    /// # Errors
    ///
    /// Returns a [`CronError`] if the field count is wrong, a value is out of
    /// range, a token is malformed, or no calendar date can ever match.
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.is_empty() {
            return Err(CronError::Empty);
        }
        if parts.len() != 6 && parts.len() != 7 {
            return Err(CronError::FieldCount { found: parts.len() });
        }

        let mut fields = FieldKind::ORDER
            .iter()
            .zip(parts.iter())
            .map(|(kind, text)| FieldSet::parse(*kind, text));

        // `zip` stops at six when the year is absent.
        let mut next = || fields.next().transpose();
        let seconds = next()?.unwrap_or_else(|| FieldSet::all(FieldKind::Second));
        let minutes = next()?.unwrap_or_else(|| FieldSet::all(FieldKind::Minute));
        let hours = next()?.unwrap_or_else(|| FieldSet::all(FieldKind::Hour));
        let days_of_month = next()?.unwrap_or_else(|| FieldSet::all(FieldKind::DayOfMonth));
        let months = next()?.unwrap_or_else(|| FieldSet::all(FieldKind::Month));
        let days_of_week = next()?.unwrap_or_else(|| FieldSet::all(FieldKind::DayOfWeek));
        let years = next()?.unwrap_or_else(|| FieldSet::all(FieldKind::Year));

        let parsed = Self {
            source: parts.join(" "),
            seconds,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            years,
            lookahead_years: DEFAULT_LOOKAHEAD_YEARS,
        };

        if !parsed.has_calendar_date() {
            return Err(CronError::Unsatisfiable { expression: parsed.source });
        }
        Ok(parsed)
    }

    /// Override the search horizon used when the year field is unrestricted.
    pub fn with_lookahead_years(mut self, years: u32) -> Self {
        self.lookahead_years = years.max(1);
        self
    }

    /// The expression text, whitespace-normalised.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True if `instant` (to the second) satisfies every field.
    pub fn matches(&self, instant: &DateTime<Utc>) -> bool {
        self.seconds.contains(instant.second())
            && self.minutes.contains(instant.minute())
            && self.hours.contains(instant.hour())
            && self.date_matches(instant.date_naive())
    }

    /// The first instant strictly after `after` that satisfies the rule.
    ///
    /// Returns `None` when the rule has no occurrence inside the search window:
    /// the last allowed year when the year field is restricted, otherwise
    /// `lookahead_years` past `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.trunc_subsecs(0) + Duration::seconds(1);
        let last_year = if self.years.is_restricted() {
            self.years.last()? as i32
        } else {
            start.year().saturating_add(self.lookahead_years as i32)
        };

        let mut date = start.date_naive();
        // Only the first candidate day starts mid-day.
        let mut from_time = start.time();

        while date.year() <= last_year {
            if self.years.is_restricted() && !self.year_matches(date.year()) {
                let year = u32::try_from(date.year()).ok()?;
                let next_year = self.years.next_from(year + 1)?;
                date = NaiveDate::from_ymd_opt(next_year as i32, 1, 1)?;
                from_time = NaiveTime::MIN;
                continue;
            }

            if !self.months.contains(date.month()) {
                date = match self.months.next_from(date.month() + 1) {
                    Some(month) => NaiveDate::from_ymd_opt(date.year(), month, 1)?,
                    None => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?,
                };
                from_time = NaiveTime::MIN;
                continue;
            }

            if self.date_matches(date) {
                if let Some(time) = self.time_on_or_after(from_time) {
                    return Some(date.and_time(time).and_utc());
                }
            }

            date = date.succ_opt()?;
            from_time = NaiveTime::MIN;
        }

        None
    }

    /// Successive fire times after `after`, each strictly greater than the last.
    pub fn upcoming(&self, after: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        std::iter::successors(self.next_after(after), move |prev| self.next_after(*prev))
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        self.year_matches(date.year()) && self.months.contains(date.month()) && self.day_matches(date)
    }

    /// An unrestricted year field matches any year, including past 2099.
    fn year_matches(&self, year: i32) -> bool {
        if !self.years.is_restricted() {
            return true;
        }
        u32::try_from(year).is_ok_and(|y| self.years.contains(y))
    }

    /// Day-of-month and day-of-week are ORed when both are restricted,
    /// otherwise the restricted one (if any) decides.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let by_month_day = self.days_of_month.contains(date.day());
        let by_week_day = self.days_of_week.contains(date.weekday().number_from_sunday());
        if self.days_of_month.is_restricted() && self.days_of_week.is_restricted() {
            by_month_day || by_week_day
        } else {
            by_month_day && by_week_day
        }
    }

    fn time_on_or_after(&self, from: NaiveTime) -> Option<NaiveTime> {
        for hour in self.hours.iter_from(from.hour()) {
            let first_minute = if hour == from.hour() { from.minute() } else { 0 };
            for minute in self.minutes.iter_from(first_minute) {
                let first_second = if hour == from.hour() && minute == from.minute() {
                    from.second()
                } else {
                    0
                };
                if let Some(second) = self.seconds.next_from(first_second) {
                    return NaiveTime::from_hms_opt(hour, minute, second);
                }
            }
        }
        None
    }

    /// Whether any (year, month, day) satisfies the date fields.
    ///
    /// Weekday alignment never matters here: every month contains every
    /// weekday, so only month lengths and leap years can make a rule empty.
    fn has_calendar_date(&self) -> bool {
        let years: Vec<i32> = if self.years.is_restricted() {
            self.years.iter().map(|y| y as i32).collect()
        } else {
            SAMPLE_YEARS.collect()
        };

        years.iter().any(|&year| {
            self.months.iter().any(|month| {
                (1..=31).any(|day| {
                    NaiveDate::from_ymd_opt(year, month, day).is_some_and(|d| self.day_matches(d))
                })
            })
        })
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronExpression")
            .field("source", &self.source)
            .field("seconds", &self.seconds)
            .field("minutes", &self.minutes)
            .field("hours", &self.hours)
            .field("days_of_month", &self.days_of_month)
            .field("months", &self.months)
            .field("days_of_week", &self.days_of_week)
            .field("years", &self.years)
            .finish()
    }
}
