use std::fmt;

use crate::error::{CronError, Result};

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

const UNSUPPORTED_DAY_MODIFIER: &str = "`L`, `W` and `#` day modifiers are not supported";

/// Position of a field within a cron expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
    Year,
}

impl FieldKind {
    /// Field order as written in an expression.
    pub const ORDER: [FieldKind; 7] = [
        FieldKind::Second,
        FieldKind::Minute,
        FieldKind::Hour,
        FieldKind::DayOfMonth,
        FieldKind::Month,
        FieldKind::DayOfWeek,
        FieldKind::Year,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Second => "second",
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
            FieldKind::Year => "year",
        }
    }

    /// Inclusive `(min, max)` of the values this field accepts.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            FieldKind::Second | FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::DayOfMonth => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::DayOfWeek => (1, 7),
            FieldKind::Year => (1970, 2099),
        }
    }

    fn names(self) -> &'static [&'static str] {
        match self {
            FieldKind::Month => &MONTH_NAMES,
            FieldKind::DayOfWeek => &WEEKDAY_NAMES,
            _ => &[],
        }
    }

    fn accepts_question_mark(self) -> bool {
        matches!(self, FieldKind::DayOfMonth | FieldKind::DayOfWeek)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of values one field allows, stored as a bitmask offset from the field minimum.
///
/// Three words cover the widest field (year, 130 values).
#[derive(Clone, PartialEq, Eq)]
pub struct FieldSet {
    kind: FieldKind,
    bits: [u64; 3],
    /// False for a bare `*` or `?`; drives the day-of-month / day-of-week OR rule.
    restricted: bool,
}

impl FieldSet {
    /// Every value in range, unrestricted.
    pub fn all(kind: FieldKind) -> Self {
        let (min, max) = kind.bounds();
        let mut set = Self { kind, bits: [0; 3], restricted: false };
        set.insert_range(min, max, 1);
        set
    }

    /// Parse one field of an expression.
    pub fn parse(kind: FieldKind, text: &str) -> Result<Self> {
        match text {
            "*" => return Ok(Self::all(kind)),
            "?" if kind.accepts_question_mark() => return Ok(Self::all(kind)),
            "?" => return Err(syntax(kind, text, "`?` is only allowed in day-of-month and day-of-week")),
            _ => {}
        }

        let (min, max) = kind.bounds();
        let mut set = Self { kind, bits: [0; 3], restricted: true };

        for part in text.split(',') {
            if part.is_empty() {
                return Err(syntax(kind, text, "empty list element"));
            }
            if uses_day_modifier(kind, part) {
                return Err(syntax(kind, part, UNSUPPORTED_DAY_MODIFIER));
            }

            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(parse_step(kind, part, step)?)),
                None => (part, None),
            };

            let (lo, hi) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                let lo = parse_value(kind, part, a)?;
                let hi = parse_value(kind, part, b)?;
                if lo > hi {
                    return Err(syntax(kind, part, "range start is after range end"));
                }
                (lo, hi)
            } else {
                let value = parse_value(kind, part, range)?;
                // Quartz reads `a/n` as "from a to the field maximum, every n".
                if step.is_some() {
                    (value, max)
                } else {
                    (value, value)
                }
            };

            set.insert_range(lo, hi, step.unwrap_or(1));
        }

        Ok(set)
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// True unless the field was written as a bare `*` or `?`.
    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn contains(&self, value: u32) -> bool {
        let (min, max) = self.kind.bounds();
        if value < min || value > max {
            return false;
        }
        let offset = value - min;
        self.bits[(offset / 64) as usize] & (1u64 << (offset % 64)) != 0
    }

    /// Allowed values `>= from`, ascending.
    pub fn iter_from(&self, from: u32) -> impl Iterator<Item = u32> + '_ {
        let (min, max) = self.kind.bounds();
        (from.max(min)..=max).filter(move |v| self.contains(*v))
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.iter_from(0)
    }

    /// Smallest allowed value `>= from`.
    pub fn next_from(&self, from: u32) -> Option<u32> {
        self.iter_from(from).next()
    }

    pub fn first(&self) -> Option<u32> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<u32> {
        self.iter().last()
    }

    fn insert_range(&mut self, lo: u32, hi: u32, step: u32) {
        let (min, _) = self.kind.bounds();
        for value in (lo..=hi).step_by(step as usize) {
            let offset = value - min;
            self.bits[(offset / 64) as usize] |= 1u64 << (offset % 64);
        }
    }
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.restricted {
            return write!(f, "{}(*)", self.kind);
        }
        let values: Vec<u32> = self.iter().collect();
        write!(f, "{}({:?})", self.kind, values)
    }
}

fn parse_value(kind: FieldKind, token: &str, text: &str) -> Result<u32> {
    if let Some(index) = kind
        .names()
        .iter()
        .position(|name| name.eq_ignore_ascii_case(text))
    {
        let (min, _) = kind.bounds();
        return Ok(min + index as u32);
    }

    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(syntax(kind, token, "expected a number or name"));
    }
    let value: u32 = text
        .parse()
        .map_err(|_| syntax(kind, token, "number is too large"))?;

    let (min, max) = kind.bounds();
    if value < min || value > max {
        return Err(CronError::OutOfRange { field: kind.name(), value, min, max });
    }
    Ok(value)
}

/// Quartz `L` (last), `W` (nearest weekday) and `#` (nth weekday) forms.
fn uses_day_modifier(kind: FieldKind, part: &str) -> bool {
    match kind {
        FieldKind::DayOfMonth => part.contains(['L', 'l', 'W', 'w']),
        FieldKind::DayOfWeek => part.contains('#') || part.ends_with(['L', 'l']),
        _ => false,
    }
}

fn parse_step(kind: FieldKind, token: &str, text: &str) -> Result<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(syntax(kind, token, "step must be a number"));
    }
    let step: u32 = text
        .parse()
        .map_err(|_| syntax(kind, token, "step is too large"))?;
    let (_, max) = kind.bounds();
    if step == 0 {
        return Err(syntax(kind, token, "step must be at least 1"));
    }
    if step > max {
        return Err(syntax(kind, token, "step exceeds the field maximum"));
    }
    Ok(step)
}

fn syntax(kind: FieldKind, token: &str, reason: &'static str) -> CronError {
    CronError::Syntax { field: kind.name(), token: token.to_string(), reason }
}
