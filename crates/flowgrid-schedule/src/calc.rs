//! Next-run-time calculation.
//!
//! Pure and deterministic given `now`: no I/O, no clock reads. The returned
//! instant is always strictly after `now` — if the naive candidate has
//! already passed (e.g. the daily time earlier today), we roll forward
//! exactly one period.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use crate::spec::ScheduleSpec;

/// Hours ahead an unrecognized descriptor resolves to instead of erroring.
const FALLBACK_HOURS: i64 = 1;

/// Compute the next instant strictly after `now` satisfying the schedule.
pub fn next_run_time(spec: &ScheduleSpec, now: DateTime<Utc>) -> DateTime<Utc> {
    match spec {
        ScheduleSpec::Daily { hour, minute } => {
            let candidate = at_time(now, *hour, *minute);
            if candidate > now {
                candidate
            } else {
                candidate + Duration::days(1)
            }
        }
        ScheduleSpec::Weekly { weekday, hour, minute } => {
            // chrono counts days-from-Sunday the same way the descriptor does.
            let today = now.weekday().num_days_from_sunday();
            let days_ahead = (*weekday + 7 - today) % 7;
            let candidate = at_time(now, *hour, *minute) + Duration::days(days_ahead as i64);
            if candidate > now {
                candidate
            } else {
                candidate + Duration::days(7)
            }
        }
        ScheduleSpec::Monthly { day, hour, minute } => {
            let candidate = monthly_candidate(now.year(), now.month(), *day, *hour, *minute, now);
            if candidate > now {
                candidate
            } else {
                let (year, month) = next_month(now.year(), now.month());
                monthly_candidate(year, month, *day, *hour, *minute, now)
            }
        }
        ScheduleSpec::EveryHours { hours } => now + Duration::hours(*hours as i64),
        ScheduleSpec::Unrecognized { raw } => {
            tracing::warn!(
                "Unrecognized schedule descriptor '{}' — falling back to +{}h",
                raw,
                FALLBACK_HOURS
            );
            now + Duration::hours(FALLBACK_HOURS)
        }
    }
}

/// Today's date at HH:MM UTC.
fn at_time(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), hour, minute, 0)
        .single()
        .unwrap_or(now)
}

/// The given month's occurrence of `day` (clamped to month length) at HH:MM.
fn monthly_candidate(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let day = day.min(days_in_month(year, month));
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or(now + Duration::hours(FALLBACK_HOURS))
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next) = next_month(year, month);
    NaiveDate::from_ymd_opt(next_year, next, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}
