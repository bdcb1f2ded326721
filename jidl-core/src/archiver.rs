//! Calendar-driven data retention.
//!
//! On a chosen day of week, at the first hour of the day, the archiver
//! snapshots the sink and deletes rows older than the retention horizon.
//! Weekly schedules fire every `interval` weeks and keep 7 days; monthly
//! schedules fire every week but only act during the first week of the
//! month, keeping `30 + day-of-month` days.
//!
//! The calendar math is kept in pure functions over naive timestamps so
//! it can be tested against a pinned clock.

use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::LoggerError;
use crate::sink::Sink;
use crate::timefmt;

/// Hours in one week, the base period of the service.
const HOURS_PER_WEEK: i64 = 168;

/// Grace period for shutdown before the task is aborted.
const STOP_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// A validated archiving schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiverSchedule {
    /// ISO day of week, 1 = Monday … 7 = Sunday.
    pub day_of_week: u8,
    /// Weeks (or months) between runs.
    pub interval: u32,
    pub monthly: bool,
}

impl ArchiverSchedule {
    /// Validates the ranges: day 1–7, interval 1–52 weekly or 1–12
    /// monthly.
    pub fn new(day_of_week: u8, interval: u32, monthly: bool) -> Result<Self, LoggerError> {
        if !(1..=7).contains(&day_of_week) {
            return Err(LoggerError::BadDayOfWeek(day_of_week));
        }
        let max_range = if monthly { 12 } else { 52 };
        if !(1..=max_range).contains(&interval) {
            return Err(LoggerError::BadInterval(interval));
        }
        Ok(ArchiverSchedule {
            day_of_week,
            interval,
            monthly,
        })
    }
}

/// Whole weeks until the week holding the first day of the next month.
pub fn weeks_to_next_month(today: NaiveDate) -> i64 {
    let this_week = today.iso_week().week() as i64;
    let next_month_week = if today.month() == 12 {
        // ISO weeks in the year, plus one for week 1 of the next year.
        let weeks_in_year = NaiveDate::from_ymd_opt(today.year(), 12, 28)
            .map(|d| d.iso_week().week() as i64)
            .unwrap_or(52);
        weeks_in_year + 1
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
            .map(|d| d.iso_week().week() as i64)
            .unwrap_or(this_week)
    };
    next_month_week - this_week
}

/// Delay from `now` to the first run: the next occurrence of
/// `day_of_week` at hour zero, shifted into the first week of the next
/// month for monthly schedules.
pub fn first_delay(now: NaiveDateTime, day_of_week: u8, monthly: bool) -> chrono::Duration {
    let today = now.weekday().number_from_monday() as i64;
    let mut weeks: i64 = 0;
    if day_of_week as i64 <= today {
        weeks += 1;
    }
    if monthly {
        weeks += weeks_to_next_month(now.date()) - 1;
    }
    let days = 7 * weeks + day_of_week as i64 - today;
    let hours = 24 * days - now.hour() as i64;
    chrono::Duration::hours(hours.max(0))
}

/// The retention horizon in days for a run happening at `today`, or
/// `None` when a monthly schedule is outside the first week of the month
/// and must skip this run.
pub fn retention_days(today: NaiveDate, monthly: bool) -> Option<u32> {
    if !monthly {
        return Some(7);
    }
    let day = today.day();
    if day > 7 {
        None
    } else {
        Some(30 + day)
    }
}

/// A running archiving service.
pub struct Archiver {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Archiver {
    /// Spawns the service. Overwriting an existing schedule is the
    /// caller's business: stop the old service first.
    pub fn start(sink: Arc<dyn Sink>, schedule: ArchiverSchedule) -> Archiver {
        let (shutdown, mut rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let delay = first_delay(
                Local::now().naive_local(),
                schedule.day_of_week,
                schedule.monthly,
            )
            .to_std()
            .unwrap_or_default();
            tokio::select! {
                _ = rx.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            // Monthly schedules fire weekly and gate on the date inside
            // the run itself.
            let week_interval = if schedule.monthly { 1 } else { schedule.interval };
            let period =
                std::time::Duration::from_secs(week_interval as u64 * HOURS_PER_WEEK as u64 * 3600);

            loop {
                run_archive(sink.as_ref(), schedule.monthly).await;
                tokio::select! {
                    _ = rx.changed() => return,
                    _ = tokio::time::sleep(period) => {}
                }
            }
        });

        Archiver { shutdown, task }
    }

    /// Requests shutdown and waits up to the grace period before
    /// aborting the task.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(STOP_GRACE, self.task).await.is_err() {
            tracing::warn!("archiver did not stop within {STOP_GRACE:?}");
        }
    }
}

async fn run_archive(sink: &dyn Sink, monthly: bool) {
    let Some(days) = retention_days(Local::now().date_naive(), monthly) else {
        tracing::debug!("archiver: outside the first week of the month, skipping");
        return;
    };

    match sink.snapshot(&timefmt::today_string()).await {
        Ok(()) => {
            let _ = sink.log("backup of logged data written", false).await;
        }
        Err(e) => {
            tracing::warn!("archiver: snapshot failed: {e}");
            let _ = sink.log(&format!("Failed data backup: {e}"), false).await;
        }
    }

    match sink.prune(days).await {
        Ok(()) => {
            let _ = sink.log("deleted old data", false).await;
        }
        Err(e) => {
            tracing::warn!("archiver: prune failed: {e}");
            let _ = sink.log(&format!("Failed data deletion: {e}"), false).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn weekly_sunday_evening_fires_monday_midnight() {
        // 2026-08-02 is a Sunday.
        let now = at(2026, 8, 2, 23);
        let delay = first_delay(now, 1, false);
        assert_eq!(delay, chrono::Duration::hours(1));
        assert_eq!(now + delay, at(2026, 8, 3, 0));
    }

    #[test]
    fn weekly_waits_a_full_week_when_the_day_passed() {
        // Wednesday 2026-08-05, scheduled for Monday: next Monday is the
        // 10th at hour zero.
        let now = at(2026, 8, 5, 8);
        let delay = first_delay(now, 1, false);
        assert_eq!(now + delay, at(2026, 8, 10, 0));
    }

    #[test]
    fn weekly_later_in_the_same_week() {
        // Wednesday 2026-08-05, scheduled for Friday the 7th.
        let now = at(2026, 8, 5, 8);
        let delay = first_delay(now, 5, false);
        assert_eq!(now + delay, at(2026, 8, 7, 0));
    }

    #[test]
    fn monthly_shifts_into_the_next_month() {
        // Wednesday 2026-08-05, monthly on Monday: the first Monday in a
        // week of September (ISO week of Sep 1) is August 31.
        let now = at(2026, 8, 5, 8);
        let delay = first_delay(now, 1, true);
        assert_eq!(now + delay, at(2026, 8, 31, 0));
    }

    #[test]
    fn retention_is_seven_days_weekly() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        assert_eq!(retention_days(today, false), Some(7));
    }

    #[test]
    fn monthly_retention_gates_on_the_first_week() {
        let day3 = NaiveDate::from_ymd_opt(2026, 8, 3).unwrap();
        assert_eq!(retention_days(day3, true), Some(33));
        let day7 = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();
        assert_eq!(retention_days(day7, true), Some(37));
        let day8 = NaiveDate::from_ymd_opt(2026, 8, 8).unwrap();
        assert_eq!(retention_days(day8, true), None);
    }

    #[test]
    fn schedule_ranges_are_validated() {
        assert!(ArchiverSchedule::new(0, 1, false).is_err());
        assert!(ArchiverSchedule::new(8, 1, false).is_err());
        assert!(ArchiverSchedule::new(1, 0, false).is_err());
        assert!(ArchiverSchedule::new(1, 53, false).is_err());
        assert!(ArchiverSchedule::new(1, 52, false).is_ok());
        assert!(ArchiverSchedule::new(1, 13, true).is_err());
        assert!(ArchiverSchedule::new(1, 12, true).is_ok());
    }
}
