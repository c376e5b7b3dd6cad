//! Missed-schedule catch-up: at most one synthetic fire per process start.

use chrono::{DateTime, Duration, TimeZone, Utc};
use comradarr::cron::CronSpec;

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

// Schedule `*/30 * * * *`, lastRunAt = now - 3h: six occurrences were
// missed but exactly one is synthesized, at the most recent past
// occurrence.
#[test]
fn catch_up_scenario() {
    let spec = CronSpec::parse("*/30 * * * *", "UTC").unwrap();
    let now = utc(2025, 4, 2, 15, 10);
    let last_run = now - Duration::hours(3);

    let missed = spec.fires_between(last_run, now);
    assert_eq!(missed.len(), 6);

    let synthetic = spec.catch_up(last_run, now).unwrap();
    assert_eq!(synthetic, utc(2025, 4, 2, 15, 0));
    assert_eq!(synthetic, *missed.last().unwrap());

    // Advancing lastRunAt to the synthetic occurrence leaves nothing to
    // catch up: a second start fires nothing.
    assert!(spec.catch_up(synthetic, now).is_none());
}

#[test]
fn catch_up_none_for_future_schedule() {
    let spec = CronSpec::parse("0 3 * * *", "UTC").unwrap();
    let now = utc(2025, 4, 2, 2, 0);
    assert!(spec.catch_up(now - Duration::minutes(30), now).is_none());
}

// DST spring-forward: 02:30 does not exist on the transition day; the
// engine owns the decision and never panics.
#[test]
fn dst_gap_does_not_break_enumeration() {
    let spec = CronSpec::parse("30 2 * * *", "Europe/Copenhagen").unwrap();
    // 2025-03-30: clocks jump 02:00 -> 03:00 in Copenhagen.
    let since = utc(2025, 3, 29, 0, 0);
    let now = utc(2025, 3, 31, 12, 0);
    let fires = spec.fires_between(since, now);
    // The 29th and the 31st fire; the transition day's 02:30 is the
    // engine's call, but ordering and bounds always hold.
    assert!(!fires.is_empty());
    assert!(fires.windows(2).all(|w| w[0] < w[1]));
    assert!(fires.iter().all(|t| *t > since && *t <= now));
}
