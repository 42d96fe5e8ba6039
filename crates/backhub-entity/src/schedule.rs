//! Backup schedule specification and next-run computation.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

use backhub_core::error::AppError;
use backhub_core::result::AppResult;

/// Default zone for sites that do not declare one.
pub const DEFAULT_TIMEZONE: &str = "Africa/Harare";

/// How often a site is backed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "schedule_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    /// Only when explicitly started.
    Manual,
    /// Every day at the configured time.
    Daily,
    /// On the configured weekdays.
    Weekly,
    /// On the configured days of month.
    Monthly,
}

impl ScheduleFrequency {
    /// Return the frequency as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ScheduleFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A site's backup schedule, interpreted in the site's local zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Backup cadence.
    pub frequency: ScheduleFrequency,
    /// Local time of day, "HH:MM".
    pub time: String,
    /// CSV day mask: weekday numbers 0-6 (Mon=0) for weekly,
    /// day-of-month 1-31 for monthly. Exactly as accepted at the API.
    pub days: Option<String>,
    /// IANA zone name.
    pub timezone: String,
}

impl Schedule {
    /// Parse the configured local time of day.
    fn local_time(&self) -> AppResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.time, "%H:%M")
            .map_err(|e| AppError::validation(format!("Invalid schedule time '{}': {e}", self.time)))
    }

    /// Parse the declared zone, falling back to the fleet default.
    pub fn zone(&self) -> Tz {
        self.timezone
            .parse()
            .unwrap_or_else(|_| DEFAULT_TIMEZONE.parse().expect("default zone is valid"))
    }

    /// Parse the CSV day mask into a sorted list of numbers.
    fn day_mask(&self) -> Vec<u32> {
        let mut days: Vec<u32> = self
            .days
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|d| d.trim().parse().ok())
            .collect();
        days.sort_unstable();
        days.dedup();
        days
    }

    /// Compute the next run strictly after `after`.
    ///
    /// Returns `None` for manual schedules and for masks that never match
    /// (e.g. an empty weekly mask).
    pub fn next_run_after(&self, after: DateTime<Utc>) -> AppResult<Option<DateTime<Utc>>> {
        if self.frequency == ScheduleFrequency::Manual {
            return Ok(None);
        }

        let time = self.local_time()?;
        let zone = self.zone();
        let local_after = after.with_timezone(&zone);
        let mask = self.day_mask();

        // Scan forward day by day; 366 covers every monthly mask.
        for offset in 0..=366 {
            let date = match local_after.date_naive().checked_add_days(chrono::Days::new(offset))
            {
                Some(d) => d,
                None => break,
            };

            let matches = match self.frequency {
                ScheduleFrequency::Daily => true,
                ScheduleFrequency::Weekly => {
                    let weekday = date.weekday().num_days_from_monday();
                    mask.contains(&weekday)
                }
                ScheduleFrequency::Monthly => mask.contains(&date.day()),
                ScheduleFrequency::Manual => unreachable!(),
            };
            if !matches {
                continue;
            }

            let naive = date.and_time(time);
            // Skip times that fall into a DST gap.
            let candidate = match zone.from_local_datetime(&naive) {
                chrono::LocalResult::Single(dt) => dt,
                chrono::LocalResult::Ambiguous(dt, _) => dt,
                chrono::LocalResult::None => continue,
            };
            let candidate_utc = candidate.with_timezone(&Utc);
            if candidate_utc > after {
                return Ok(Some(candidate_utc));
            }
        }

        Ok(None)
    }

    /// Whether the schedule is due at `now` given the persisted `next_run_at`.
    pub fn is_due(next_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        matches!(next_run_at, Some(t) if t <= now)
    }

    /// A run missed by more than this is executed immediately on catch-up.
    pub fn catch_up_window() -> Duration {
        Duration::hours(24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn schedule(frequency: ScheduleFrequency, time: &str, days: Option<&str>) -> Schedule {
        Schedule {
            frequency,
            time: time.to_string(),
            days: days.map(String::from),
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }

    #[test]
    fn manual_never_runs() {
        let s = schedule(ScheduleFrequency::Manual, "03:00", None);
        assert_eq!(s.next_run_after(Utc::now()).unwrap(), None);
    }

    #[test]
    fn daily_next_run_is_same_or_next_day() {
        let s = schedule(ScheduleFrequency::Daily, "03:30", None);
        // 2024-06-01 00:00 UTC = 02:00 local (UTC+2).
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let next = s.next_run_after(after).unwrap().unwrap();
        // 03:30 local = 01:30 UTC, still ahead of `after` the same day.
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 1, 30, 0).unwrap());

        // Just past the slot: rolls to the next day.
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 1, 31, 0).unwrap();
        let next = s.next_run_after(after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 2, 1, 30, 0).unwrap());
    }

    #[test]
    fn weekly_honours_day_mask() {
        // Mondays (0) and Thursdays (3) at 02:00 local = 00:00 UTC.
        let s = schedule(ScheduleFrequency::Weekly, "02:00", Some("0,3"));
        // Saturday 2024-06-01.
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let next = s.next_run_after(after).unwrap().unwrap();
        // Next Monday is 2024-06-03.
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn weekly_empty_mask_never_matches() {
        let s = schedule(ScheduleFrequency::Weekly, "02:00", None);
        assert_eq!(s.next_run_after(Utc::now()).unwrap(), None);
    }

    #[test]
    fn monthly_rolls_over_short_months() {
        // Day 31 at 02:00 local.
        let s = schedule(ScheduleFrequency::Monthly, "02:00", Some("31"));
        // Start of June (30 days): next 31st is July 31.
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let next = s.next_run_after(after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 7, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn mask_parsing_ignores_junk() {
        let s = schedule(ScheduleFrequency::Weekly, "02:00", Some(" 3 ,0,x,3"));
        assert_eq!(s.day_mask(), vec![0, 3]);
    }

    #[test]
    fn is_due_boundary() {
        let now = Utc::now();
        assert!(Schedule::is_due(Some(now), now));
        assert!(!Schedule::is_due(Some(now + Duration::seconds(1)), now));
        assert!(!Schedule::is_due(None, now));
    }
}
