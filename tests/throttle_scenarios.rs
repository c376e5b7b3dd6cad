//! End-to-end throttle scenarios against the governor's admission rules.

use chrono::{DateTime, Duration, TimeZone, Utc};
use comradarr::throttle::{Admission, PauseReason, ThrottleGovernor, ThrottleProfile};

fn profile_rpm_60_unlimited() -> ThrottleProfile {
    ThrottleProfile {
        id: 1,
        name: "scenario".into(),
        requests_per_minute: 60,
        daily_budget: None,
        batch_size: 50,
        batch_cooldown_seconds: 10,
        rate_limit_pause_seconds: 60,
        is_default: false,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
}

// Profile {rpm=60, daily=null}; 120 back-to-back admissions: 60 allows,
// then 60 defers with retry_after <= 60 s; a fresh minute allows 60 more.
#[test]
fn minute_cap_scenario() {
    let governor = ThrottleGovernor::new(chrono_tz::UTC);
    let profile = profile_rpm_60_unlimited();
    let now = t0();

    let mut allows = 0;
    let mut defers = 0;
    for _ in 0..120 {
        match governor.admit_at(1, &profile, now) {
            Admission::Allow => allows += 1,
            Admission::Defer { retry_after } => {
                assert!(retry_after <= Duration::seconds(60));
                defers += 1;
            }
            other => panic!("unexpected admission: {other:?}"),
        }
    }
    assert_eq!(allows, 60);
    assert_eq!(defers, 60);

    let next_window = now + Duration::seconds(60);
    for _ in 0..60 {
        assert_eq!(
            governor.admit_at(1, &profile, next_window),
            Admission::Allow
        );
    }
    assert!(matches!(
        governor.admit_at(1, &profile, next_window),
        Admission::Defer { .. }
    ));
}

// Upstream 429 with Retry-After: 120 against rate_limit_pause_seconds=60:
// paused until now+120; subsequent admissions return the pause until then.
#[test]
fn upstream_rate_limit_scenario() {
    let governor = ThrottleGovernor::new(chrono_tz::UTC);
    let profile = profile_rpm_60_unlimited();
    let now = t0();

    assert_eq!(governor.admit_at(2, &profile, now), Admission::Allow);
    governor.on_upstream_rate_limited_at(2, Some(120), &profile, now);

    for offset in [0, 30, 119] {
        match governor.admit_at(2, &profile, now + Duration::seconds(offset)) {
            Admission::PausedUntil { until, reason } => {
                assert_eq!(until, now + Duration::seconds(120));
                assert_eq!(reason, PauseReason::UpstreamRateLimited);
            }
            other => panic!("expected pause at +{offset}s, got {other:?}"),
        }
    }

    assert_eq!(
        governor.admit_at(2, &profile, now + Duration::seconds(120)),
        Admission::Allow
    );
}

// Daily budget trips into a pause that lasts until the next calendar day
// of the governor's timezone, and admissions never exceed the budget.
#[test]
fn daily_budget_scenario() {
    let governor = ThrottleGovernor::new(chrono_tz::UTC);
    let profile = ThrottleProfile {
        daily_budget: Some(10),
        ..profile_rpm_60_unlimited()
    };

    let mut now = t0();
    let mut allows = 0;
    for _ in 0..30 {
        match governor.admit_at(3, &profile, now) {
            Admission::Allow => allows += 1,
            Admission::Defer { .. } => {}
            Admission::PausedUntil { reason, .. } => {
                assert_eq!(reason, PauseReason::DailyBudgetExhausted);
                break;
            }
        }
        now += Duration::minutes(2);
    }
    assert_eq!(allows, 10);
}
