//! Authentication lockout guard
//!
//! The auth surface itself lives outside the core, but the lockout counter
//! is core-owned so the policy is enforceable and testable in one place:
//! after `max_failures` consecutive failures within `window`, attempts are
//! rejected for `lockout_duration`; one success resets the counter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lockout policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failures: u32,
    pub window: Duration,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window: Duration::from_secs(15 * 60),
            lockout_duration: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PrincipalState {
    failures: u32,
    window_started_at: Instant,
    locked_until: Option<Instant>,
}

/// Per-principal failure counters.
pub struct LoginGuard {
    policy: LockoutPolicy,
    state: Mutex<HashMap<String, PrincipalState>>,
}

impl LoginGuard {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `principal` may attempt to authenticate right now. Returns
    /// the remaining lockout on rejection.
    pub fn check(&self, principal: &str) -> Result<(), Duration> {
        self.check_at(principal, Instant::now())
    }

    pub fn check_at(&self, principal: &str, now: Instant) -> Result<(), Duration> {
        let Ok(state) = self.state.lock() else {
            return Ok(());
        };
        match state.get(principal).and_then(|s| s.locked_until) {
            Some(until) if now < until => Err(until - now),
            _ => Ok(()),
        }
    }

    /// Record a failed attempt; locks the principal once the policy trips.
    pub fn record_failure(&self, principal: &str) {
        self.record_failure_at(principal, Instant::now());
    }

    pub fn record_failure_at(&self, principal: &str, now: Instant) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let entry = state
            .entry(principal.to_string())
            .or_insert(PrincipalState {
                failures: 0,
                window_started_at: now,
                locked_until: None,
            });

        // Stale window: start counting afresh.
        if now.duration_since(entry.window_started_at) > self.policy.window {
            entry.failures = 0;
            entry.window_started_at = now;
        }

        entry.failures += 1;
        if entry.failures >= self.policy.max_failures {
            entry.locked_until = Some(now + self.policy.lockout_duration);
        }
    }

    /// A successful authentication resets the counter and any lock.
    pub fn record_success(&self, principal: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.remove(principal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LockoutPolicy {
        LockoutPolicy {
            max_failures: 3,
            window: Duration::from_secs(60),
            lockout_duration: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_locks_after_max_consecutive_failures() {
        let guard = LoginGuard::new(policy());
        let t0 = Instant::now();

        for i in 0..3 {
            assert!(guard.check_at("alice", t0).is_ok(), "attempt {i}");
            guard.record_failure_at("alice", t0);
        }

        let rejected = guard.check_at("alice", t0).unwrap_err();
        assert!(rejected <= Duration::from_secs(300));

        // Still locked just before expiry, open again after.
        assert!(guard
            .check_at("alice", t0 + Duration::from_secs(299))
            .is_err());
        assert!(guard
            .check_at("alice", t0 + Duration::from_secs(301))
            .is_ok());
    }

    #[test]
    fn test_success_resets_counter() {
        let guard = LoginGuard::new(policy());
        let t0 = Instant::now();

        guard.record_failure_at("bob", t0);
        guard.record_failure_at("bob", t0);
        guard.record_success("bob");
        guard.record_failure_at("bob", t0);
        assert!(guard.check_at("bob", t0).is_ok());
    }

    #[test]
    fn test_window_expiry_resets_counter() {
        let guard = LoginGuard::new(policy());
        let t0 = Instant::now();

        guard.record_failure_at("carol", t0);
        guard.record_failure_at("carol", t0);
        // Two more failures, but in a fresh window.
        let later = t0 + Duration::from_secs(120);
        guard.record_failure_at("carol", later);
        guard.record_failure_at("carol", later);
        assert!(guard.check_at("carol", later).is_ok());
    }

    #[test]
    fn test_principals_are_independent() {
        let guard = LoginGuard::new(policy());
        let t0 = Instant::now();

        for _ in 0..3 {
            guard.record_failure_at("dave", t0);
        }
        assert!(guard.check_at("dave", t0).is_err());
        assert!(guard.check_at("erin", t0).is_ok());
    }
}
