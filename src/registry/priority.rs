//! Priority scoring
//!
//! Derives a 0..100 score for a registry entry at selection time. Scoring
//! is deterministic and idempotent given identical inputs; ties break on
//! `created_at`, then `id`, which keeps dispatch FIFO within a priority
//! class and starvation-free.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};

use super::{RegistryEntry, SearchType};

/// Horizon (seconds) over which entry age and missing duration saturate
/// to 1.0. Thirty days.
const NORMALIZATION_HORIZON_SECS: i64 = 30 * 24 * 3600;

/// Integer weights 0..100, sourced from the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityWeights {
    pub content_age: u8,
    pub missing_duration: u8,
    pub user_priority: u8,
    pub failure_penalty: u8,
    pub gap_bonus: u8,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            content_age: 25,
            missing_duration: 35,
            user_priority: 20,
            failure_penalty: 10,
            gap_bonus: 15,
        }
    }
}

/// Everything the scorer looks at.
#[derive(Debug, Clone, Copy)]
pub struct PriorityInput {
    pub created_at: DateTime<Utc>,
    pub first_missing_at: Option<DateTime<Utc>>,
    /// 0.0..=1.0; user intent from the management surface.
    pub user_priority: f64,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub search_type: SearchType,
}

impl PriorityInput {
    pub fn from_entry(entry: &RegistryEntry, first_missing_at: Option<DateTime<Utc>>, max_attempts: u32) -> Self {
        Self {
            created_at: entry.created_at,
            first_missing_at,
            user_priority: entry.user_priority.clamp(0.0, 1.0),
            attempt_count: entry.attempt_count.max(0) as u32,
            max_attempts,
            search_type: entry.search_type,
        }
    }
}

fn clamp01(d: Duration) -> f64 {
    (d.num_seconds().max(0) as f64 / NORMALIZATION_HORIZON_SECS as f64).clamp(0.0, 1.0)
}

/// Compute the selection-time score, rounded into 0..=100.
pub fn score(input: &PriorityInput, weights: &PriorityWeights, now: DateTime<Utc>) -> u8 {
    let age = clamp01(now - input.created_at);
    let missing = input
        .first_missing_at
        .map(|t| clamp01(now - t))
        .unwrap_or(0.0);
    let penalty_attempts = input.attempt_count.min(input.max_attempts) as f64;
    let gap_bonus = if input.search_type == SearchType::Gap {
        weights.gap_bonus as f64
    } else {
        0.0
    };

    let raw = age * weights.content_age as f64
        + missing * weights.missing_duration as f64
        + input.user_priority * weights.user_priority as f64
        - penalty_attempts * weights.failure_penalty as f64
        + gap_bonus;

    raw.round().clamp(0.0, 100.0) as u8
}

/// Dispatch ordering: score descending, then `created_at` ascending, then
/// `id` ascending.
pub fn dispatch_order(a: (u8, DateTime<Utc>, i64), b: (u8, DateTime<Utc>, i64)) -> Ordering {
    b.0.cmp(&a.0)
        .then_with(|| a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(&b.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn input(age_days: i64, attempts: u32, search_type: SearchType) -> PriorityInput {
        PriorityInput {
            created_at: now() - Duration::days(age_days),
            first_missing_at: Some(now() - Duration::days(age_days)),
            user_priority: 0.5,
            attempt_count: attempts,
            max_attempts: 5,
            search_type,
        }
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let weights = PriorityWeights::default();
        let i = input(10, 2, SearchType::Gap);
        let first = score(&i, &weights, now());
        for _ in 0..10 {
            assert_eq!(score(&i, &weights, now()), first);
        }
    }

    #[test]
    fn test_gap_outranks_equivalent_upgrade() {
        let weights = PriorityWeights::default();
        let gap = score(&input(10, 0, SearchType::Gap), &weights, now());
        let upgrade = score(&input(10, 0, SearchType::Upgrade), &weights, now());
        assert!(gap > upgrade);
    }

    #[test]
    fn test_attempts_depress_score() {
        let weights = PriorityWeights::default();
        let fresh = score(&input(10, 0, SearchType::Gap), &weights, now());
        let worn = score(&input(10, 3, SearchType::Gap), &weights, now());
        assert!(fresh > worn);
    }

    #[test]
    fn test_age_saturates_at_horizon() {
        let weights = PriorityWeights::default();
        let month = score(&input(30, 0, SearchType::Gap), &weights, now());
        let year = score(&input(365, 0, SearchType::Gap), &weights, now());
        assert_eq!(month, year);
    }

    #[test]
    fn test_score_bounded() {
        let weights = PriorityWeights {
            content_age: 100,
            missing_duration: 100,
            user_priority: 100,
            failure_penalty: 100,
            gap_bonus: 100,
        };
        let high = score(&input(365, 0, SearchType::Gap), &weights, now());
        assert_eq!(high, 100);
        let low = score(&input(0, 5, SearchType::Upgrade), &weights, now());
        assert_eq!(low, 0);
    }

    // Equal scores: the older row wins, regardless of id order.
    #[test]
    fn test_tie_breaks_on_created_at_then_id() {
        let older = now() - Duration::seconds(10);
        let newer = now();
        assert_eq!(
            dispatch_order((50, older, 99), (50, newer, 1)),
            Ordering::Less
        );
        assert_eq!(
            dispatch_order((50, older, 2), (50, older, 1)),
            Ordering::Greater
        );
        // Higher score always first.
        assert_eq!(
            dispatch_order((60, newer, 9), (50, older, 1)),
            Ordering::Less
        );
    }
}
