//! Dispatch determinism: equal-priority rows leave in creation order.

use chrono::{DateTime, Duration, TimeZone, Utc};
use comradarr::registry::priority::{self, PriorityInput, PriorityWeights};
use comradarr::registry::SearchType;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 20, 8, 0, 0).unwrap()
}

// Two rows with equal priority but created 10 s apart: the older row is
// dispatched first regardless of id order.
#[test]
fn equal_priority_ties_break_on_age() {
    let older_created = now() - Duration::seconds(10);
    let newer_created = now();

    // (score, created_at, id) — newer row has the smaller id on purpose.
    let mut rows = vec![(50u8, newer_created, 1i64), (50u8, older_created, 99i64)];
    rows.sort_by(|a, b| priority::dispatch_order(*a, *b));

    assert_eq!(rows[0].2, 99, "older row must dispatch first");
    assert_eq!(rows[1].2, 1);
}

#[test]
fn higher_score_always_wins() {
    let t = now();
    let mut rows = vec![
        (10u8, t - Duration::days(2), 1i64),
        (90u8, t, 2i64),
        (50u8, t - Duration::days(1), 3i64),
    ];
    rows.sort_by(|a, b| priority::dispatch_order(*a, *b));
    let ids: Vec<i64> = rows.iter().map(|r| r.2).collect();
    assert_eq!(ids, vec![2, 3, 1]);
}

// Scoring the same input repeatedly gives the same score (idempotence),
// and the full ordering is stable across shuffles.
#[test]
fn scoring_and_ordering_are_deterministic() {
    let weights = PriorityWeights::default();
    let input = PriorityInput {
        created_at: now() - Duration::days(3),
        first_missing_at: Some(now() - Duration::days(5)),
        user_priority: 0.7,
        attempt_count: 1,
        max_attempts: 5,
        search_type: SearchType::Gap,
    };

    let score = priority::score(&input, &weights, now());
    for _ in 0..50 {
        assert_eq!(priority::score(&input, &weights, now()), score);
    }

    let base = now();
    let mut a: Vec<(u8, DateTime<Utc>, i64)> = (0..100)
        .map(|i| ((i % 7) as u8 * 10, base - Duration::seconds(i % 13), i))
        .collect();
    let mut b = a.clone();
    b.reverse();
    a.sort_by(|x, y| priority::dispatch_order(*x, *y));
    b.sort_by(|x, y| priority::dispatch_order(*x, *y));
    assert_eq!(a, b);
}
