//! Calendar recurrence for periodic rescheduling.
//!
//! Computes the next instant a time expression falls on a unit boundary:
//! "09:00 every workday", "15:00 monthly". Used by handlers that keep a
//! task alive by rescheduling it onto its next occurrence.

use chrono::{DateTime, Datelike, Duration, Months, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::timeparse;

/// Periodic unit a recurrence advances by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceUnit {
    /// Every calendar day.
    Day,
    /// Every seven days.
    Week,
    /// Monday through Friday.
    Weekday,
    /// Every day except Sunday.
    Workday,
    /// Calendar months; short months clamp to their last day.
    Month,
    /// Calendar years; Feb 29 clamps to Feb 28 off leap years.
    Year,
}

impl RecurrenceUnit {
    /// All recognized units.
    pub const ALL: &'static [Self] = &[
        Self::Day,
        Self::Week,
        Self::Weekday,
        Self::Workday,
        Self::Month,
        Self::Year,
    ];

    /// Lowercase string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Weekday => "weekday",
            Self::Workday => "workday",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Unit used for advancement; `Workday` steps like `Day` and adds the
    /// Sunday exclusion separately.
    const fn step(self) -> Self {
        match self {
            Self::Workday => Self::Day,
            other => other,
        }
    }
}

impl std::fmt::Display for RecurrenceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurrenceUnit {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "weekday" => Ok(Self::Weekday),
            "workday" => Ok(Self::Workday),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(ScheduleError::UnknownUnit(other.to_string())),
        }
    }
}

/// Errors from recurrence computation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The unit string is not one of the recognized units.
    #[error("unrecognized recurrence unit {0:?}, expected one of day, week, weekday, workday, month, year")]
    UnknownUnit(String),

    /// The time expression could not be resolved to an instant.
    #[error("unparseable time expression: {0:?}")]
    InvalidTimeExpr(String),
}

/// Computes the next occurrence of `time_expr` on a `unit` boundary at or
/// after `base`.
///
/// The expression is resolved relative to `base` (a time of day lands on
/// `base`'s date), then advanced one unit at a time until it is not in
/// the past, sits exactly on a unit boundary (a `Weekday` occurrence never
/// lands on a weekend), and is not a Sunday when the unit is `Workday`. Unit
/// arithmetic can truncate the clock time, so the original time of day is
/// re-applied after each advancement.
///
/// # Errors
///
/// Returns `ScheduleError::InvalidTimeExpr` if the expression does not
/// resolve to an instant.
pub fn next_occurrence(
    time_expr: &str,
    unit: RecurrenceUnit,
    base: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let mut candidate = timeparse::resolve(time_expr, base)
        .ok_or_else(|| ScheduleError::InvalidTimeExpr(time_expr.to_string()))?;
    let time_of_day = candidate.time();
    let step = unit.step();

    loop {
        let in_past = candidate < base;
        let off_boundary = advance(candidate, 0, step).date_naive() != candidate.date_naive();
        let excluded_sunday =
            unit == RecurrenceUnit::Workday && candidate.weekday() == Weekday::Sun;

        if !in_past && !off_boundary && !excluded_sunday {
            return Ok(candidate);
        }

        candidate = advance(candidate, 1, step)
            .date_naive()
            .and_time(time_of_day)
            .and_utc();
    }
}

/// Convenience wrapper for [`next_occurrence`] with `base` = now.
///
/// # Errors
///
/// Returns `ScheduleError::InvalidTimeExpr` if the expression does not
/// resolve to an instant.
pub fn next_occurrence_from_now(
    time_expr: &str,
    unit: RecurrenceUnit,
) -> Result<DateTime<Utc>, ScheduleError> {
    next_occurrence(time_expr, unit, Utc::now())
}

/// Advances a timestamp by `n` units.
///
/// A zero-unit advance is the boundary probe: it returns the same instant
/// for every unit except `Weekday`, where a weekend rolls forward to
/// Monday.
fn advance(ts: DateTime<Utc>, n: u32, unit: RecurrenceUnit) -> DateTime<Utc> {
    match unit {
        RecurrenceUnit::Day | RecurrenceUnit::Workday => ts + Duration::days(i64::from(n)),
        RecurrenceUnit::Week => ts + Duration::weeks(i64::from(n)),
        RecurrenceUnit::Weekday => advance_weekdays(ts, n),
        RecurrenceUnit::Month => ts.checked_add_months(Months::new(n)).unwrap_or(ts),
        RecurrenceUnit::Year => ts
            .checked_add_months(Months::new(n.saturating_mul(12)))
            .unwrap_or(ts),
    }
}

fn advance_weekdays(ts: DateTime<Utc>, n: u32) -> DateTime<Utc> {
    if n == 0 {
        return match ts.weekday() {
            Weekday::Sat => ts + Duration::days(2),
            Weekday::Sun => ts + Duration::days(1),
            _ => ts,
        };
    }

    let mut ts = ts;
    let mut remaining = n;
    while remaining > 0 {
        ts += Duration::days(1);
        if !matches!(ts.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    ts
}
