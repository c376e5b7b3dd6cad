//! Throttle profiles
//!
//! User-configurable rate budgets. Range validation happens here so that a
//! profile loaded from the store is known-good by the time the governor
//! sees it.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::CoreError;

/// A named set of rate budgets assignable to connectors. Exactly one
/// profile is the system-wide default.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ThrottleProfile {
    pub id: i64,
    pub name: String,
    /// Admissions per rolling 60-second window, 1..=60.
    pub requests_per_minute: i32,
    /// Admissions per calendar day, 10..=10000. `None` means unlimited.
    pub daily_budget: Option<i32>,
    /// Consecutive admissions before batch pacing kicks in, 1..=50.
    pub batch_size: i32,
    /// Pacing delay once a batch boundary is reached, 10..=3600 seconds.
    pub batch_cooldown_seconds: i32,
    /// Minimum pause after an upstream 429, 60..=3600 seconds.
    pub rate_limit_pause_seconds: i32,
    pub is_default: bool,
}

impl ThrottleProfile {
    /// Built-in conservative defaults, used when no profile row exists yet.
    pub fn builtin_default() -> Self {
        Self {
            id: 0,
            name: "default".to_string(),
            requests_per_minute: 10,
            daily_budget: Some(500),
            batch_size: 10,
            batch_cooldown_seconds: 60,
            rate_limit_pause_seconds: 600,
            is_default: true,
        }
    }

    /// Validate every budget range.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(1..=60).contains(&self.requests_per_minute) {
            return Err(CoreError::InvalidConfig(format!(
                "requests_per_minute out of range 1..=60: {}",
                self.requests_per_minute
            )));
        }
        if let Some(budget) = self.daily_budget {
            if !(10..=10_000).contains(&budget) {
                return Err(CoreError::InvalidConfig(format!(
                    "daily_budget out of range 10..=10000: {budget}"
                )));
            }
        }
        if !(1..=50).contains(&self.batch_size) {
            return Err(CoreError::InvalidConfig(format!(
                "batch_size out of range 1..=50: {}",
                self.batch_size
            )));
        }
        if !(10..=3600).contains(&self.batch_cooldown_seconds) {
            return Err(CoreError::InvalidConfig(format!(
                "batch_cooldown_seconds out of range 10..=3600: {}",
                self.batch_cooldown_seconds
            )));
        }
        if !(60..=3600).contains(&self.rate_limit_pause_seconds) {
            return Err(CoreError::InvalidConfig(format!(
                "rate_limit_pause_seconds out of range 60..=3600: {}",
                self.rate_limit_pause_seconds
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_default_validates() {
        assert!(ThrottleProfile::builtin_default().validate().is_ok());
    }

    #[test]
    fn test_range_violations_rejected() {
        let mut p = ThrottleProfile::builtin_default();
        p.requests_per_minute = 0;
        assert!(p.validate().is_err());

        let mut p = ThrottleProfile::builtin_default();
        p.requests_per_minute = 61;
        assert!(p.validate().is_err());

        let mut p = ThrottleProfile::builtin_default();
        p.daily_budget = Some(9);
        assert!(p.validate().is_err());

        let mut p = ThrottleProfile::builtin_default();
        p.daily_budget = None;
        assert!(p.validate().is_ok());

        let mut p = ThrottleProfile::builtin_default();
        p.rate_limit_pause_seconds = 59;
        assert!(p.validate().is_err());
    }
}
