//! Episode batcher
//!
//! Folds eligible episodes of a season into one season-pack search when the
//! season is fully aired and missing enough of itself. Pure and
//! deterministic given `(season statistics, thresholds)`.

use serde::{Deserialize, Serialize};

/// Season-pack folding thresholds, sourced from the settings store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonPackThresholds {
    /// Minimum missing percentage, 0..=100.
    pub pct: u8,
    /// Minimum number of missing episodes.
    pub count: u32,
}

impl Default for SeasonPackThresholds {
    fn default() -> Self {
        Self { pct: 50, count: 3 }
    }
}

/// What the batcher knows about one season at selection time.
#[derive(Debug, Clone, Copy)]
pub struct SeasonStats {
    /// A set `next_airing` means the season is still airing.
    pub currently_airing: bool,
    /// Episodes the season is supposed to have.
    pub episode_count: u32,
    /// Monitored episodes without a file.
    pub missing_count: u32,
}

/// The dispatch shape for a season's eligible episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    /// One `SeasonSearch` covering the whole season.
    SeasonSearch,
    /// One `EpisodeSearch` per eligible episode.
    EpisodeSearches,
}

/// Decide how a season's eligible episodes are searched.
///
/// A currently-airing season always gets per-episode searches regardless of
/// how much of it is missing.
pub fn determine_batching(stats: &SeasonStats, thresholds: &SeasonPackThresholds) -> BatchDecision {
    if stats.currently_airing {
        return BatchDecision::EpisodeSearches;
    }
    if stats.episode_count == 0 {
        return BatchDecision::EpisodeSearches;
    }

    let missing_pct = stats.missing_count * 100 / stats.episode_count;
    if missing_pct >= thresholds.pct as u32 && stats.missing_count >= thresholds.count {
        BatchDecision::SeasonSearch
    } else {
        BatchDecision::EpisodeSearches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> SeasonPackThresholds {
        SeasonPackThresholds { pct: 50, count: 3 }
    }

    // 20 episodes, 12 missing, fully aired, thresholds {50%, 3}: one
    // season pack.
    #[test]
    fn test_fully_aired_majority_missing_folds_to_season_pack() {
        let stats = SeasonStats {
            currently_airing: false,
            episode_count: 20,
            missing_count: 12,
        };
        assert_eq!(
            determine_batching(&stats, &thresholds()),
            BatchDecision::SeasonSearch
        );
    }

    #[test]
    fn test_currently_airing_never_folds() {
        let stats = SeasonStats {
            currently_airing: true,
            episode_count: 20,
            missing_count: 20,
        };
        assert_eq!(
            determine_batching(&stats, &thresholds()),
            BatchDecision::EpisodeSearches
        );
    }

    #[test]
    fn test_below_percentage_threshold_stays_individual() {
        let stats = SeasonStats {
            currently_airing: false,
            episode_count: 20,
            missing_count: 9,
        };
        assert_eq!(
            determine_batching(&stats, &thresholds()),
            BatchDecision::EpisodeSearches
        );
    }

    #[test]
    fn test_below_count_threshold_stays_individual() {
        let stats = SeasonStats {
            currently_airing: false,
            episode_count: 4,
            missing_count: 2,
        };
        // 50% missing but only 2 episodes.
        assert_eq!(
            determine_batching(&stats, &thresholds()),
            BatchDecision::EpisodeSearches
        );
    }

    #[test]
    fn test_exact_thresholds_fold() {
        let stats = SeasonStats {
            currently_airing: false,
            episode_count: 6,
            missing_count: 3,
        };
        assert_eq!(
            determine_batching(&stats, &thresholds()),
            BatchDecision::SeasonSearch
        );
    }

    #[test]
    fn test_empty_season_stays_individual() {
        let stats = SeasonStats {
            currently_airing: false,
            episode_count: 0,
            missing_count: 0,
        };
        assert_eq!(
            determine_batching(&stats, &thresholds()),
            BatchDecision::EpisodeSearches
        );
    }

    #[test]
    fn test_decision_is_idempotent() {
        let stats = SeasonStats {
            currently_airing: false,
            episode_count: 10,
            missing_count: 7,
        };
        let first = determine_batching(&stats, &thresholds());
        for _ in 0..5 {
            assert_eq!(determine_batching(&stats, &thresholds()), first);
        }
    }
}
