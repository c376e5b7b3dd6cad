//! Season-pack folding rules.

use comradarr::batcher::{determine_batching, BatchDecision, SeasonPackThresholds, SeasonStats};

fn thresholds() -> SeasonPackThresholds {
    SeasonPackThresholds { pct: 50, count: 3 }
}

// 20 episodes, 12 missing, fully aired, thresholds {pct=50, count=3}:
// one SeasonSearch.
#[test]
fn season_pack_scenario() {
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

// Fully-aired AND missing% >= pct AND missing >= count => SeasonSearch;
// currently-airing => EpisodeSearch regardless of missing%.
#[test]
fn batching_invariant_over_grid() {
    let thresholds = thresholds();
    for episode_count in 1..=30u32 {
        for missing_count in 0..=episode_count {
            for currently_airing in [false, true] {
                let stats = SeasonStats {
                    currently_airing,
                    episode_count,
                    missing_count,
                };
                let decision = determine_batching(&stats, &thresholds);
                let expected = if !currently_airing
                    && missing_count * 100 / episode_count >= 50
                    && missing_count >= 3
                {
                    BatchDecision::SeasonSearch
                } else {
                    BatchDecision::EpisodeSearches
                };
                assert_eq!(
                    decision, expected,
                    "episodes={episode_count} missing={missing_count} airing={currently_airing}"
                );
            }
        }
    }
}

// determine_batching(stats, cfg) returns the same result on repeated calls.
#[test]
fn batching_is_deterministic() {
    let stats = SeasonStats {
        currently_airing: false,
        episode_count: 8,
        missing_count: 5,
    };
    let first = determine_batching(&stats, &thresholds());
    for _ in 0..20 {
        assert_eq!(determine_batching(&stats, &thresholds()), first);
    }
}
