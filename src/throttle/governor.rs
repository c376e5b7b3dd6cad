//! Admission control
//!
//! Keyed per-connector state behind a single mutex. Admission is pure math
//! over `(state, profile, now)`; all clock access goes through the `_at`
//! variants so the rules are testable without waiting on wall time.
//!
//! Failure mode is fail-closed: if the state map is unavailable the caller
//! gets `Defer(5s)`, never `Allow`.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use super::{Admission, PauseReason, ThrottleProfile, ThrottleState};

/// Retry hint returned when the governor itself is broken.
const FAIL_CLOSED_RETRY_SECS: i64 = 5;

/// Authoritative admission decision point, one state per connector.
pub struct ThrottleGovernor {
    states: Mutex<HashMap<i64, ThrottleState>>,
    /// Calendar-day timezone for daily budget windows.
    timezone: Tz,
}

impl ThrottleGovernor {
    pub fn new(timezone: Tz) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            timezone,
        }
    }

    fn fail_closed() -> Admission {
        Admission::Defer {
            retry_after: Duration::seconds(FAIL_CLOSED_RETRY_SECS),
        }
    }

    /// Request one admission for `connector_id` under `profile`.
    pub fn admit(&self, connector_id: i64, profile: &ThrottleProfile) -> Admission {
        self.admit_at(connector_id, profile, Utc::now())
    }

    /// Admission rules, evaluated in order (see module docs). All counter
    /// updates happen under the map lock, so either every update applies or
    /// none do.
    pub fn admit_at(
        &self,
        connector_id: i64,
        profile: &ThrottleProfile,
        now: DateTime<Utc>,
    ) -> Admission {
        let mut states = match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(connector_id, "throttle state lock poisoned; failing closed");
                drop(poisoned);
                return Self::fail_closed();
            }
        };
        let state = states
            .entry(connector_id)
            .or_insert_with(|| ThrottleState::new(now));

        // 1. Active pause wins over everything.
        if state.is_paused {
            match state.paused_until {
                Some(until) if now < until => {
                    return Admission::PausedUntil {
                        until,
                        reason: state.pause_reason.unwrap_or(PauseReason::Manual),
                    };
                }
                _ => {
                    state.is_paused = false;
                    state.paused_until = None;
                    state.pause_reason = None;
                }
            }
        }

        // 2. Roll the minute window.
        if now - state.minute_window_start >= Duration::seconds(60) {
            state.requests_this_minute = 0;
            state.minute_window_start = now;
        }

        // 3. Roll the day window on the connector timezone's calendar day.
        let today = now.with_timezone(&self.timezone).date_naive();
        if state.day_window_start.with_timezone(&self.timezone).date_naive() != today {
            state.requests_today = 0;
            state.day_window_start = now;
        }

        // 4. Daily budget exhaustion pauses until the next local day.
        if let Some(budget) = profile.daily_budget {
            if state.requests_today >= budget as u32 {
                let until = start_of_next_day(now, self.timezone);
                state.is_paused = true;
                state.paused_until = Some(until);
                state.pause_reason = Some(PauseReason::DailyBudgetExhausted);
                return Admission::PausedUntil {
                    until,
                    reason: PauseReason::DailyBudgetExhausted,
                };
            }
        }

        // 5. Per-minute cap defers to the end of the current window.
        if state.requests_this_minute >= profile.requests_per_minute as u32 {
            let window_end = state.minute_window_start + Duration::seconds(60);
            let retry_after = (window_end - now).max(Duration::zero());
            return Admission::Defer { retry_after };
        }

        // Batch pacing: after `batch_size` consecutive admissions the next
        // one waits out the batch cooldown. Sweep pacing, not a pause.
        if state.batch_run_length >= profile.batch_size as u32 {
            let ready_at = state.last_batch_at.unwrap_or(now)
                + Duration::seconds(profile.batch_cooldown_seconds as i64);
            if now < ready_at {
                return Admission::Defer {
                    retry_after: ready_at - now,
                };
            }
            state.batch_run_length = 0;
        }

        // 6. Record the admission.
        state.requests_this_minute += 1;
        state.requests_today += 1;
        state.batch_run_length += 1;
        if state.batch_run_length == profile.batch_size as u32 {
            state.last_batch_at = Some(now);
        }
        Admission::Allow
    }

    /// Upstream returned 429: pause for at least the profile's configured
    /// floor, honouring a longer `Retry-After` when supplied.
    pub fn on_upstream_rate_limited(
        &self,
        connector_id: i64,
        retry_after: Option<u64>,
        profile: &ThrottleProfile,
    ) {
        self.on_upstream_rate_limited_at(connector_id, retry_after, profile, Utc::now());
    }

    pub fn on_upstream_rate_limited_at(
        &self,
        connector_id: i64,
        retry_after: Option<u64>,
        profile: &ThrottleProfile,
        now: DateTime<Utc>,
    ) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let state = states
            .entry(connector_id)
            .or_insert_with(|| ThrottleState::new(now));
        let pause_secs = retry_after
            .unwrap_or(0)
            .max(profile.rate_limit_pause_seconds as u64);
        state.is_paused = true;
        state.paused_until = Some(now + Duration::seconds(pause_secs as i64));
        state.pause_reason = Some(PauseReason::UpstreamRateLimited);
        warn!(
            connector_id,
            pause_secs, "upstream rate limit; connector paused"
        );
    }

    /// Manual resume clears any pause state.
    pub fn resume(&self, connector_id: i64) {
        if let Ok(mut states) = self.states.lock() {
            if let Some(state) = states.get_mut(&connector_id) {
                state.is_paused = false;
                state.paused_until = None;
                state.pause_reason = None;
            }
        }
    }

    /// Called at the start of a sweep's dispatch phase: batch pacing is
    /// sweep-internal, so the run length restarts.
    pub fn begin_sweep(&self, connector_id: i64) {
        if let Ok(mut states) = self.states.lock() {
            if let Some(state) = states.get_mut(&connector_id) {
                state.batch_run_length = 0;
            }
        }
    }

    /// Expire elapsed pauses so observability reflects reality between
    /// admissions. Driven by the 5-second system job.
    pub fn tick(&self, now: DateTime<Utc>) {
        if let Ok(mut states) = self.states.lock() {
            for state in states.values_mut() {
                if state.is_paused && state.paused_until.map(|t| now >= t).unwrap_or(true) {
                    state.is_paused = false;
                    state.paused_until = None;
                    state.pause_reason = None;
                }
            }
        }
    }

    /// Copy of all per-connector states, for persistence and health.
    pub fn snapshot(&self) -> Vec<(i64, ThrottleState)> {
        match self.states.lock() {
            Ok(states) => states.iter().map(|(k, v)| (*k, v.clone())).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn paused_count(&self, now: DateTime<Utc>) -> usize {
        match self.states.lock() {
            Ok(states) => states
                .values()
                .filter(|s| s.is_paused && s.paused_until.map(|t| now < t).unwrap_or(true))
                .count(),
            Err(_) => 0,
        }
    }

    /// Drop state for a deleted connector.
    pub fn forget(&self, connector_id: i64) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(&connector_id);
        }
    }
}

/// Start of the next calendar day in `tz`, as a UTC instant. A DST gap at
/// midnight falls forward to the first valid local time.
fn start_of_next_day(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let Some(next_day) = local.date_naive().succ_opt() else {
        return now + Duration::days(1);
    };
    let midnight = next_day.and_hms_opt(0, 0, 0).expect("midnight is valid");
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
        LocalResult::None => match tz.from_local_datetime(&(midnight + Duration::hours(1))) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
            LocalResult::None => now + Duration::days(1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(rpm: i32, daily: Option<i32>) -> ThrottleProfile {
        ThrottleProfile {
            id: 1,
            name: "test".into(),
            requests_per_minute: rpm,
            daily_budget: daily,
            batch_size: 50,
            batch_cooldown_seconds: 10,
            rate_limit_pause_seconds: 60,
            is_default: true,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    // 120 back-to-back admissions at rpm=60: first 60 allowed, 61..120
    // deferred with retry_after <= 60s; a fresh window allows 60 more.
    #[test]
    fn test_minute_cap_allows_then_defers() {
        let governor = ThrottleGovernor::new(chrono_tz::UTC);
        let p = profile(60, None);
        let now = t0();

        for _ in 0..60 {
            assert_eq!(governor.admit_at(7, &p, now), Admission::Allow);
        }
        for _ in 60..120 {
            match governor.admit_at(7, &p, now) {
                Admission::Defer { retry_after } => {
                    assert!(retry_after <= Duration::seconds(60));
                    assert!(retry_after > Duration::zero());
                }
                other => panic!("expected defer, got {other:?}"),
            }
        }

        let later = now + Duration::seconds(60);
        for _ in 0..60 {
            assert_eq!(governor.admit_at(7, &p, later), Admission::Allow);
        }
    }

    // Upstream 429 with Retry-After: 120 against a 60s profile floor pauses
    // for the larger of the two.
    #[test]
    fn test_upstream_rate_limit_pauses_for_max() {
        let governor = ThrottleGovernor::new(chrono_tz::UTC);
        let p = profile(60, None);
        let now = t0();

        governor.on_upstream_rate_limited_at(3, Some(120), &p, now);
        match governor.admit_at(3, &p, now + Duration::seconds(30)) {
            Admission::PausedUntil { until, reason } => {
                assert_eq!(until, now + Duration::seconds(120));
                assert_eq!(reason, PauseReason::UpstreamRateLimited);
            }
            other => panic!("expected pause, got {other:?}"),
        }

        // Past the pause instant admissions flow again.
        assert_eq!(
            governor.admit_at(3, &p, now + Duration::seconds(121)),
            Admission::Allow
        );
    }

    #[test]
    fn test_retry_after_below_floor_uses_profile_floor() {
        let governor = ThrottleGovernor::new(chrono_tz::UTC);
        let p = profile(60, None);
        let now = t0();

        governor.on_upstream_rate_limited_at(3, Some(5), &p, now);
        match governor.admit_at(3, &p, now) {
            Admission::PausedUntil { until, .. } => {
                assert_eq!(until, now + Duration::seconds(60));
            }
            other => panic!("expected pause, got {other:?}"),
        }
    }

    #[test]
    fn test_daily_budget_pauses_until_next_day() {
        let governor = ThrottleGovernor::new(chrono_tz::UTC);
        let mut p = profile(60, Some(10));
        p.batch_size = 50;
        let mut now = t0();

        let mut allowed = 0;
        for _ in 0..10 {
            if governor.admit_at(9, &p, now) == Admission::Allow {
                allowed += 1;
            }
            now += Duration::minutes(1);
        }
        assert_eq!(allowed, 10);

        match governor.admit_at(9, &p, now) {
            Admission::PausedUntil { until, reason } => {
                assert_eq!(reason, PauseReason::DailyBudgetExhausted);
                assert_eq!(until, Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap());
            }
            other => panic!("expected pause, got {other:?}"),
        }

        // Next local day: counters reset.
        let tomorrow = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 1).unwrap();
        assert_eq!(governor.admit_at(9, &p, tomorrow), Admission::Allow);
    }

    #[test]
    fn test_batch_pacing_defers_within_sweep() {
        let governor = ThrottleGovernor::new(chrono_tz::UTC);
        let mut p = profile(60, None);
        p.batch_size = 3;
        p.batch_cooldown_seconds = 30;
        let now = t0();

        governor.begin_sweep(4);
        for _ in 0..3 {
            assert_eq!(governor.admit_at(4, &p, now), Admission::Allow);
        }
        match governor.admit_at(4, &p, now + Duration::seconds(1)) {
            Admission::Defer { retry_after } => {
                assert_eq!(retry_after, Duration::seconds(29));
            }
            other => panic!("expected defer, got {other:?}"),
        }

        // Cooldown elapsed: the next batch starts.
        assert_eq!(
            governor.admit_at(4, &p, now + Duration::seconds(31)),
            Admission::Allow
        );
    }

    #[test]
    fn test_manual_resume_clears_pause() {
        let governor = ThrottleGovernor::new(chrono_tz::UTC);
        let p = profile(60, None);
        let now = t0();

        governor.on_upstream_rate_limited_at(5, Some(3600), &p, now);
        governor.resume(5);
        assert_eq!(governor.admit_at(5, &p, now), Admission::Allow);
    }

    #[test]
    fn test_tick_expires_pause() {
        let governor = ThrottleGovernor::new(chrono_tz::UTC);
        let p = profile(60, None);
        let now = t0();

        governor.on_upstream_rate_limited_at(6, None, &p, now);
        assert_eq!(governor.paused_count(now), 1);
        governor.tick(now + Duration::seconds(61));
        assert_eq!(governor.paused_count(now + Duration::seconds(61)), 0);
    }

    #[test]
    fn test_isolated_per_connector_state() {
        let governor = ThrottleGovernor::new(chrono_tz::UTC);
        let p = profile(1, None);
        let now = t0();

        assert_eq!(governor.admit_at(1, &p, now), Admission::Allow);
        assert!(matches!(
            governor.admit_at(1, &p, now),
            Admission::Defer { .. }
        ));
        // A different connector still has budget.
        assert_eq!(governor.admit_at(2, &p, now), Admission::Allow);
    }
}
