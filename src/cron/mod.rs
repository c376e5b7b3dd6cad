//! Clock & cron engine
//!
//! Evaluates 5-field cron expressions in a named IANA time zone. This module
//! is the sole authority for DST handling; consumers never do civil-time
//! arithmetic themselves. All operations are pure and synchronous.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::CoreError;

/// Upper bound on enumerated occurrences per call. A schedule that fires
/// every minute and was down for a month stays bounded.
const MAX_ENUMERATED_FIRES: usize = 100_000;

/// A parsed cron expression bound to a time zone.
#[derive(Debug, Clone)]
pub struct CronSpec {
    expression: String,
    timezone: Tz,
    schedule: cron::Schedule,
}

impl CronSpec {
    /// Parse a standard 5-field cron expression under an IANA time zone.
    ///
    /// The underlying parser wants a seconds field, so one is prepended
    /// internally; callers always supply the 5-field form.
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, CoreError> {
        let tz = Tz::from_str(timezone)
            .map_err(|_| CoreError::InvalidConfig(format!("unknown timezone: {timezone}")))?;

        let trimmed = expression.trim();
        if trimmed.split_whitespace().count() != 5 {
            return Err(CoreError::InvalidConfig(format!(
                "cron expression must have 5 fields: {trimmed:?}"
            )));
        }

        let with_seconds = format!("0 {trimmed}");
        let schedule = cron::Schedule::from_str(&with_seconds).map_err(|e| {
            CoreError::InvalidConfig(format!("invalid cron expression {trimmed:?}: {e}"))
        })?;

        Ok(Self {
            expression: trimmed.to_string(),
            timezone: tz,
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Next fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Sorted, deduplicated fire times strictly after `since` and at or
    /// before `now`. Empty when `since >= now`.
    pub fn fires_between(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        if since >= now {
            return Vec::new();
        }

        let mut fires = Vec::new();
        for t in self.schedule.after(&since.with_timezone(&self.timezone)) {
            let t = t.with_timezone(&Utc);
            if t > now {
                break;
            }
            fires.push(t);
            if fires.len() >= MAX_ENUMERATED_FIRES {
                break;
            }
        }
        fires.dedup();
        fires
    }

    /// The single occurrence a catch-up run should fire for: the most recent
    /// missed occurrence in `(last_run, now]`, if any. The orchestrator runs
    /// at most one catch-up per schedule and records this instant as the
    /// synthetic `last_run_at`.
    pub fn catch_up(&self, last_run: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.fires_between(last_run, now).pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_rejects_bad_expression() {
        assert!(CronSpec::parse("not a cron", "UTC").is_err());
        assert!(CronSpec::parse("*/5 * * *", "UTC").is_err()); // 4 fields
        assert!(CronSpec::parse("0 0 * * * *", "UTC").is_err()); // 6 fields
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        assert!(CronSpec::parse("*/30 * * * *", "Mars/Olympus").is_err());
    }

    #[test]
    fn test_next_after_is_strictly_after() {
        let spec = CronSpec::parse("0 * * * *", "UTC").unwrap();
        let on_the_hour = utc(2025, 6, 1, 12, 0);
        let next = spec.next_after(on_the_hour).unwrap();
        assert_eq!(next, utc(2025, 6, 1, 13, 0));
    }

    #[test]
    fn test_fires_between_enumerates_misses() {
        let spec = CronSpec::parse("*/30 * * * *", "UTC").unwrap();
        let since = utc(2025, 6, 1, 9, 0);
        let now = utc(2025, 6, 1, 12, 0);
        let fires = spec.fires_between(since, now);
        assert_eq!(fires.len(), 6);
        assert_eq!(fires.first().copied().unwrap(), utc(2025, 6, 1, 9, 30));
        assert_eq!(fires.last().copied().unwrap(), utc(2025, 6, 1, 12, 0));
        assert!(fires.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_fires_between_empty_when_since_not_before_now() {
        let spec = CronSpec::parse("* * * * *", "UTC").unwrap();
        let t = utc(2025, 6, 1, 9, 0);
        assert!(spec.fires_between(t, t).is_empty());
    }

    // Schedule `*/30 * * * *`, last run 3h ago: exactly one synthetic fire,
    // at the most recent past occurrence.
    #[test]
    fn test_catch_up_picks_most_recent_miss() {
        let spec = CronSpec::parse("*/30 * * * *", "UTC").unwrap();
        let now = utc(2025, 6, 1, 12, 10);
        let last_run = now - chrono::Duration::hours(3);
        let fire = spec.catch_up(last_run, now).unwrap();
        assert_eq!(fire, utc(2025, 6, 1, 12, 0));
    }

    #[test]
    fn test_catch_up_none_when_no_miss() {
        let spec = CronSpec::parse("0 3 * * *", "UTC").unwrap();
        let last_run = utc(2025, 6, 1, 3, 0);
        let now = utc(2025, 6, 1, 12, 0);
        assert!(spec.catch_up(last_run, now).is_none());
    }

    #[test]
    fn test_timezone_affects_fire_instant() {
        // 03:00 in Copenhagen is 01:00 UTC during summer time.
        let spec = CronSpec::parse("0 3 * * *", "Europe/Copenhagen").unwrap();
        let now = utc(2025, 6, 1, 0, 0);
        let next = spec.next_after(now).unwrap();
        assert_eq!(next, utc(2025, 6, 1, 1, 0));
    }
}
