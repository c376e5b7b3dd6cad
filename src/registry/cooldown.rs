//! Cooldown delay math
//!
//! Pure, reentrant exponential backoff for failed search attempts:
//! `delay = min(max, base * multiplier^(attempt-1))`, optionally multiplied
//! by a uniform jitter in `[0.5, 1.5]`, and always clamped back into
//! `[base, max]`.

use chrono::Duration;
use rand::Rng;

/// Cooldown parameters, sourced from the settings store at use sites.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownConfig {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub max_attempts: u32,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base: Duration::hours(1),
            max: Duration::hours(24),
            multiplier: 2.0,
            jitter: false,
            max_attempts: 5,
        }
    }
}

impl CooldownConfig {
    /// Delay before attempt `attempt + 1` becomes eligible, where `attempt`
    /// is the 1-based attempt that just failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            1.0
        };
        self.delay_with_factor(attempt, factor)
    }

    /// Deterministic core of the delay computation; `factor` is the jitter
    /// multiplier (1.0 when jitter is off).
    pub fn delay_with_factor(&self, attempt: u32, factor: f64) -> Duration {
        let attempt = attempt.max(1);
        let base_secs = self.base.num_seconds() as f64;
        let max_secs = self.max.num_seconds() as f64;

        let raw = base_secs * self.multiplier.powi(attempt as i32 - 1);
        let jittered = raw * factor;
        let clamped = jittered.clamp(base_secs, max_secs);

        Duration::seconds(clamped.round() as i64)
    }

    /// Whether the row has spent its attempt budget and must go exhausted.
    pub fn attempts_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // base=1h, mult=2, max=24h, no jitter: attempts 1..5 yield
    // 1h, 2h, 4h, 8h, 16h; attempt 6 clamps to 24h.
    #[test]
    fn test_escalation_without_jitter() {
        let cfg = CooldownConfig::default();
        let hours: Vec<i64> = (1..=6)
            .map(|k| cfg.delay_for_attempt(k).num_hours())
            .collect();
        assert_eq!(hours, vec![1, 2, 4, 8, 16, 24]);
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let cfg = CooldownConfig::default();
        assert_eq!(cfg.delay_for_attempt(0), Duration::hours(1));
    }

    // Jittered delay for attempt k lands in
    // [base*mult^(k-1) * 0.5, base*mult^(k-1) * 1.5], clamped to [base, max].
    #[test]
    fn test_jitter_bounds_and_clamp() {
        let cfg = CooldownConfig {
            jitter: true,
            ..CooldownConfig::default()
        };

        // Low factor on attempt 1 clamps up to base.
        assert_eq!(cfg.delay_with_factor(1, 0.5), Duration::hours(1));
        // High factor on attempt 1: 1.5h.
        assert_eq!(cfg.delay_with_factor(1, 1.5), Duration::minutes(90));
        // Attempt 5 (16h) at 1.5 clamps down to max.
        assert_eq!(cfg.delay_with_factor(5, 1.5), Duration::hours(24));
        // Attempt 3 (4h) at 0.75 = 3h, inside the band.
        assert_eq!(cfg.delay_with_factor(3, 0.75), Duration::hours(3));
    }

    #[test]
    fn test_random_jitter_stays_in_band() {
        let cfg = CooldownConfig {
            jitter: true,
            ..CooldownConfig::default()
        };
        for _ in 0..200 {
            let d = cfg.delay_for_attempt(2);
            assert!(d >= Duration::hours(1), "below band: {d}");
            assert!(d <= Duration::hours(3), "above band: {d}");
        }
    }

    #[test]
    fn test_attempts_exhausted() {
        let cfg = CooldownConfig::default();
        assert!(!cfg.attempts_exhausted(4));
        assert!(cfg.attempts_exhausted(5));
        assert!(cfg.attempts_exhausted(6));
    }
}
