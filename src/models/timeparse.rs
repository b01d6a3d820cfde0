//! Relative-time expressions and timestamp resolution.
//!
//! Tasks carry scheduling hints as strings (`"+10 minutes"`, `"09:00"`,
//! an RFC 3339 timestamp). This module resolves those expressions against
//! a base instant. Unparseable expressions resolve to `None`; callers
//! treat that as "no delay" rather than an error.

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Unit of a relative-time expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

/// A parsed relative-time expression, e.g. `"+10 minutes"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeDelta {
    /// Signed amount; negative deltas point into the past.
    pub amount: i64,
    /// Unit the amount is expressed in.
    pub unit: DeltaUnit,
}

/// Parses an expression of the form `[+|-]N unit`.
///
/// The leading sign is optional. Units accept singular, plural and the
/// common abbreviations (`sec`, `min`). Returns `None` for anything else.
#[must_use]
pub fn parse_delta(expr: &str) -> Option<RelativeDelta> {
    let expr = expr.trim();
    let rest = expr.strip_prefix('+').unwrap_or(expr);
    let (negative, rest) = match rest.strip_prefix('-') {
        Some(stripped) => (true, stripped),
        None => (false, rest),
    };

    let mut parts = rest.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let unit = match unit.to_ascii_lowercase().as_str() {
        "second" | "seconds" | "sec" | "secs" => DeltaUnit::Seconds,
        "minute" | "minutes" | "min" | "mins" => DeltaUnit::Minutes,
        "hour" | "hours" => DeltaUnit::Hours,
        "day" | "days" => DeltaUnit::Days,
        "week" | "weeks" => DeltaUnit::Weeks,
        "month" | "months" => DeltaUnit::Months,
        "year" | "years" => DeltaUnit::Years,
        _ => return None,
    };

    Some(RelativeDelta {
        amount: if negative { -amount } else { amount },
        unit,
    })
}

/// Applies a relative delta to a base instant.
///
/// Month and year arithmetic is calendar-aware and clamps to the last
/// valid day of the target month (Jan 31 + 1 month = Feb 28/29).
#[must_use]
pub fn apply_delta(base: DateTime<Utc>, delta: RelativeDelta) -> Option<DateTime<Utc>> {
    match delta.unit {
        DeltaUnit::Seconds => base.checked_add_signed(Duration::seconds(delta.amount)),
        DeltaUnit::Minutes => base.checked_add_signed(Duration::minutes(delta.amount)),
        DeltaUnit::Hours => base.checked_add_signed(Duration::hours(delta.amount)),
        DeltaUnit::Days => base.checked_add_signed(Duration::days(delta.amount)),
        DeltaUnit::Weeks => base.checked_add_signed(Duration::weeks(delta.amount)),
        DeltaUnit::Months => add_months_signed(base, delta.amount),
        DeltaUnit::Years => add_months_signed(base, delta.amount.checked_mul(12)?),
    }
}

fn add_months_signed(base: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        base.checked_add_months(Months::new(magnitude))
    } else {
        base.checked_sub_months(Months::new(magnitude))
    }
}

/// Resolves a time expression to an absolute instant relative to `base`.
///
/// Accepted forms, tried in order:
/// - RFC 3339 timestamp (`2024-01-15T10:30:00Z`)
/// - naive date-time (`2024-01-15 10:30:00`, taken as UTC)
/// - bare date (`2024-01-15`, midnight UTC)
/// - time of day (`09:00`, `09:00:30`) on `base`'s calendar date
/// - relative delta (`+10 minutes`) applied to `base`
#[must_use]
pub fn resolve(expr: &str, base: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(expr) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(expr, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(expr, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN).and_utc());
    }
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(expr, format) {
            return Some(base.date_naive().and_time(time).and_utc());
        }
    }

    parse_delta(expr).and_then(|delta| apply_delta(base, delta))
}
