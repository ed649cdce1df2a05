//! Fire-time calculation for every recurrence kind.
//!
//! Everything here is pure: given a recurrence and a reference instant, the
//! next fire time is always the same. Wall-clock kinds (daily, weekly,
//! monthly, cron) are evaluated in UTC.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};

use super::error::{Result, SchedulerError};
use super::job::{Recurrence, TimeOfDay};

/// Smallest allowed interval in minutes.
pub const MIN_INTERVAL_MINUTES: u32 = 5;
/// Largest allowed interval in minutes (one week).
pub const MAX_INTERVAL_MINUTES: u32 = 10_080;

/// How far ahead monthly recurrences are searched.
///
/// Every day number 1..=31 occurs within any 12 consecutive months.
const MONTHLY_SEARCH_MONTHS: usize = 24;

/// Day-of-week names indexed by standard cron numbering (0 and 7 are Sunday).
const WEEKDAY_NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

// ============================================================================
// Public API
// ============================================================================

/// Check recurrence parameters.
pub fn validate(recurrence: &Recurrence) -> Result<()> {
    match recurrence {
        Recurrence::Cron { expression } => {
            parse_cron(expression)?;
        }
        Recurrence::Interval { minutes } => {
            if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(minutes) {
                return Err(SchedulerError::InvalidRecurrence(format!(
                    "interval must be between {MIN_INTERVAL_MINUTES} and {MAX_INTERVAL_MINUTES} minutes, got {minutes}"
                )));
            }
        }
        Recurrence::Daily { .. } | Recurrence::Once { .. } => {}
        Recurrence::Weekly { days_of_week, .. } => {
            if days_of_week.is_empty() {
                return Err(SchedulerError::InvalidRecurrence(
                    "weekly recurrence needs at least one day".into(),
                ));
            }
            if let Some(day) = days_of_week.iter().find(|d| **d > 6) {
                return Err(SchedulerError::InvalidRecurrence(format!(
                    "day of week must be 0 (Monday) to 6 (Sunday), got {day}"
                )));
            }
        }
        Recurrence::Monthly { days_of_month, .. } => {
            if days_of_month.is_empty() {
                return Err(SchedulerError::InvalidRecurrence(
                    "monthly recurrence needs at least one day".into(),
                ));
            }
            if let Some(day) = days_of_month.iter().find(|d| !(1..=31).contains(*d)) {
                return Err(SchedulerError::InvalidRecurrence(format!(
                    "day of month must be 1 to 31, got {day}"
                )));
            }
        }
    }
    Ok(())
}

/// Next fire time strictly after `reference`.
///
/// Returns `Ok(None)` when the recurrence will never fire again (a one-shot
/// whose instant has passed).
pub fn next_fire(
    recurrence: &Recurrence,
    reference: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    validate(recurrence)?;

    let next = match recurrence {
        Recurrence::Cron { expression } => parse_cron(expression)?.next_after(&reference),
        Recurrence::Interval { minutes } => {
            Some(reference + chrono::Duration::minutes(i64::from(*minutes)))
        }
        Recurrence::Daily { time } => next_daily(*time, reference),
        Recurrence::Weekly { time, days_of_week } => next_weekly(*time, days_of_week, reference),
        Recurrence::Monthly {
            time,
            days_of_month,
        } => next_monthly(*time, days_of_month, reference),
        Recurrence::Once { run_at } => (*run_at > reference).then_some(*run_at),
    };

    Ok(next)
}

/// The next `count` fire times after `reference`, in order.
pub fn upcoming(
    recurrence: &Recurrence,
    reference: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>> {
    let mut times = Vec::with_capacity(count);
    let mut cursor = reference;
    while times.len() < count {
        match next_fire(recurrence, cursor)? {
            Some(next) => {
                times.push(next);
                cursor = next;
            }
            None => break,
        }
    }
    Ok(times)
}

// ============================================================================
// Wall-clock kinds
// ============================================================================

fn at_time(date: NaiveDate, time: TimeOfDay) -> DateTime<Utc> {
    date.and_time(time.as_naive()).and_utc()
}

fn next_daily(time: TimeOfDay, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let today = reference.date_naive();
    let candidate = at_time(today, time);
    if candidate > reference {
        return Some(candidate);
    }
    today.checked_add_days(Days::new(1)).map(|d| at_time(d, time))
}

fn next_weekly(
    time: TimeOfDay,
    days_of_week: &[u8],
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let today = reference.date_naive();
    // Offset 7 covers "same weekday, but the time already passed today".
    (0..=7).find_map(|offset| {
        let date = today.checked_add_days(Days::new(offset))?;
        let weekday = date.weekday().num_days_from_monday() as u8;
        if !days_of_week.contains(&weekday) {
            return None;
        }
        let candidate = at_time(date, time);
        (candidate > reference).then_some(candidate)
    })
}

fn next_monthly(
    time: TimeOfDay,
    days_of_month: &[u8],
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let mut days = days_of_month.to_vec();
    days.sort_unstable();
    days.dedup();

    let (mut year, mut month) = (reference.year(), reference.month());
    for _ in 0..MONTHLY_SEARCH_MONTHS {
        for &day in &days {
            // Days missing from this month (e.g. the 31st in April) are skipped.
            let Some(date) = NaiveDate::from_ymd_opt(year, month, u32::from(day)) else {
                continue;
            };
            let candidate = at_time(date, time);
            if candidate > reference {
                return Some(candidate);
            }
        }
        (year, month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
    }
    None
}

// ============================================================================
// Cron
// ============================================================================

/// A parsed cron expression.
///
/// Standard cron fires when either day field matches if both day-of-month and
/// day-of-week are restricted, while the `cron` crate requires both to match.
/// Such expressions keep one schedule per day field and fire at the earlier.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedules: Vec<cron::Schedule>,
}

impl CronSchedule {
    /// First fire time strictly after `reference`.
    pub fn next_after(&self, reference: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(reference).next())
            .min()
    }
}

/// Parse a cron expression into a schedule.
///
/// Standard 5-field expressions (`min hour dom month dow`) get a leading
/// seconds field, and numeric day-of-week values are rewritten to names so
/// that 0 and 7 both mean Sunday. Expressions that already carry a seconds
/// field are passed through unchanged.
pub fn parse_cron(expression: &str) -> Result<CronSchedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let expressions = match fields[..] {
        [minute, hour, day_of_month, month, day_of_week] => {
            let day_of_week = translate_day_of_week(day_of_week)?;
            if is_restricted(day_of_month) && is_restricted(&day_of_week) {
                vec![
                    format!("0 {minute} {hour} {day_of_month} {month} *"),
                    format!("0 {minute} {hour} * {month} {day_of_week}"),
                ]
            } else {
                vec![format!(
                    "0 {minute} {hour} {day_of_month} {month} {day_of_week}"
                )]
            }
        }
        _ if fields.len() == 6 || fields.len() == 7 => vec![fields.join(" ")],
        _ => {
            return Err(SchedulerError::InvalidRecurrence(format!(
                "cron expression must have 5 fields, got {}: '{expression}'",
                fields.len()
            )));
        }
    };

    let schedules = expressions
        .iter()
        .map(|normalized| {
            cron::Schedule::from_str(normalized).map_err(|e| {
                SchedulerError::InvalidRecurrence(format!(
                    "invalid cron expression '{expression}': {e}"
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CronSchedule { schedules })
}

fn is_restricted(field: &str) -> bool {
    !field.starts_with('*') && field != "?"
}

/// Numeric ranges are expanded to explicit day lists, so 7 can sit at the end
/// of a range even though Sunday sorts first for the `cron` crate.
fn translate_day_of_week(field: &str) -> Result<String> {
    let mut days: Vec<String> = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        match (numeric_range(range)?, step) {
            (Some((start, end)), step) => {
                let step = match step {
                    Some(step) => parse_step(step)?,
                    None => 1,
                };
                for day in (start..=end).step_by(step) {
                    days.push(weekday_name(&day.to_string())?);
                }
            }
            (None, Some(step)) => days.push(format!("{}/{step}", weekday_name(range)?)),
            (None, None) => days.push(weekday_name(range)?),
        }
    }

    let mut unique: Vec<String> = Vec::with_capacity(days.len());
    for day in days {
        if !unique.contains(&day) {
            unique.push(day);
        }
    }
    Ok(unique.join(","))
}

/// `start-end` when both bounds are numeric.
fn numeric_range(range: &str) -> Result<Option<(usize, usize)>> {
    let Some((start, end)) = range.split_once('-') else {
        return Ok(None);
    };
    let is_number = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !is_number(start) || !is_number(end) {
        return Ok(None);
    }
    match (start.parse::<usize>(), end.parse::<usize>()) {
        (Ok(start), Ok(end)) if start <= end && end <= 7 => Ok(Some((start, end))),
        _ => Err(SchedulerError::InvalidRecurrence(format!(
            "invalid day-of-week range '{range}'"
        ))),
    }
}

fn parse_step(step: &str) -> Result<usize> {
    step.parse::<usize>()
        .ok()
        .filter(|step| *step > 0)
        .ok_or_else(|| SchedulerError::InvalidRecurrence(format!("invalid cron step '{step}'")))
}

fn weekday_name(token: &str) -> Result<String> {
    if !token.chars().all(|c| c.is_ascii_digit()) || token.is_empty() {
        return Ok(token.to_string());
    }
    token
        .parse::<usize>()
        .ok()
        .and_then(|n| WEEKDAY_NAMES.get(n))
        .map(|name| (*name).to_string())
        .ok_or_else(|| {
            SchedulerError::InvalidRecurrence(format!("day of week must be 0 to 7, got {token}"))
        })
}

// ============================================================================
// Tests
// ============================================================================
