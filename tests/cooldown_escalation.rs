//! Cooldown escalation scenario: base=1h, mult=2, max=24h.

use chrono::Duration;
use comradarr::registry::CooldownConfig;

// Attempts 1..5 yield 1h, 2h, 4h, 8h, 16h; attempt 6 clamps to 24h; after
// max_attempts=5 the row goes exhausted.
#[test]
fn escalation_without_jitter() {
    let cfg = CooldownConfig::default();
    assert!(!cfg.jitter);

    let delays: Vec<Duration> = (1..=6).map(|k| cfg.delay_for_attempt(k)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::hours(1),
            Duration::hours(2),
            Duration::hours(4),
            Duration::hours(8),
            Duration::hours(16),
            Duration::hours(24),
        ]
    );

    assert!(!cfg.attempts_exhausted(4));
    assert!(cfg.attempts_exhausted(5));
}

// Delay for attempt k stays within [base*mult^(k-1)*0.5, base*mult^(k-1)*1.5]
// clamped to [base, max], for every attempt and many jitter draws.
#[test]
fn jittered_delay_stays_in_band() {
    let cfg = CooldownConfig {
        jitter: true,
        ..CooldownConfig::default()
    };

    for attempt in 1..=8u32 {
        let raw_hours = (1i64 << (attempt - 1)) as f64;
        let lower = Duration::seconds(((raw_hours * 3600.0 * 0.5).min(24.0 * 3600.0)).max(3600.0) as i64);
        let upper = Duration::seconds(((raw_hours * 3600.0 * 1.5).min(24.0 * 3600.0)) as i64);
        for _ in 0..100 {
            let delay = cfg.delay_for_attempt(attempt);
            assert!(
                delay >= lower && delay <= upper,
                "attempt {attempt}: {delay} outside [{lower}, {upper}]"
            );
            assert!(delay >= cfg.base);
            assert!(delay <= cfg.max);
        }
    }
}

#[test]
fn custom_base_and_multiplier() {
    let cfg = CooldownConfig {
        base: Duration::minutes(10),
        max: Duration::hours(2),
        multiplier: 3.0,
        jitter: false,
        max_attempts: 3,
    };
    assert_eq!(cfg.delay_for_attempt(1), Duration::minutes(10));
    assert_eq!(cfg.delay_for_attempt(2), Duration::minutes(30));
    assert_eq!(cfg.delay_for_attempt(3), Duration::minutes(90));
    // 270 minutes clamps to the 2h max.
    assert_eq!(cfg.delay_for_attempt(4), Duration::hours(2));
}
