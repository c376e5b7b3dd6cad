//! Settings bridge
//!
//! Mutable runtime configuration lives in a key-value store owned by the
//! management surface. The core pulls values at use sites through this
//! bridge, which caches each key for a short TTL — call sites accept mild
//! staleness in exchange for not hammering the store.

pub mod lockout;
pub mod store;

pub use lockout::{LockoutPolicy, LoginGuard};
pub use store::PgSettingsStore;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono_tz::Tz;

use crate::batcher::SeasonPackThresholds;
use crate::error::CoreResult;
use crate::registry::{CooldownConfig, PriorityWeights};

/// Keys the core reads.
pub mod keys {
    pub const APP_NAME: &str = "app_name";
    pub const TIMEZONE: &str = "timezone";
    pub const LOG_LEVEL: &str = "log_level";
    pub const AUTH_MODE: &str = "auth_mode";
    pub const LOG_PERSISTENCE_ENABLED: &str = "log_persistence_enabled";

    pub const SEARCH_WEIGHT_CONTENT_AGE: &str = "search_weight_content_age";
    pub const SEARCH_WEIGHT_MISSING_DURATION: &str = "search_weight_missing_duration";
    pub const SEARCH_WEIGHT_USER_PRIORITY: &str = "search_weight_user_priority";
    pub const SEARCH_WEIGHT_FAILURE_PENALTY: &str = "search_weight_failure_penalty";
    pub const SEARCH_WEIGHT_GAP_BONUS: &str = "search_weight_gap_bonus";

    pub const SEARCH_COOLDOWN_BASE_SECONDS: &str = "search_cooldown_base_seconds";
    pub const SEARCH_COOLDOWN_MAX_SECONDS: &str = "search_cooldown_max_seconds";
    pub const SEARCH_COOLDOWN_MULTIPLIER: &str = "search_cooldown_multiplier";
    pub const SEARCH_COOLDOWN_JITTER: &str = "search_cooldown_jitter";
    pub const SEARCH_MAX_ATTEMPTS: &str = "search_max_attempts";

    pub const SEARCH_SEASON_PACK_THRESHOLD_PCT: &str = "search_season_pack_threshold_pct";
    pub const SEARCH_SEASON_PACK_THRESHOLD_COUNT: &str = "search_season_pack_threshold_count";
}

/// Security mode of the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Full,
    LocalBypass,
}

impl AuthMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "full" => Some(Self::Full),
            "local_bypass" => Some(Self::LocalBypass),
            _ => None,
        }
    }
}

/// Per-key cache time. Call sites that cannot tolerate staleness do not go
/// through the bridge.
const CACHE_TTL: Duration = Duration::from_secs(30);

struct CacheSlot {
    value: Option<String>,
    fetched_at: Instant,
}

/// Cached reader over the settings store.
pub struct SettingsBridge {
    store: PgSettingsStore,
    cache: Mutex<HashMap<String, CacheSlot>>,
}

impl SettingsBridge {
    pub fn new(store: PgSettingsStore) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Raw value for `key`, going to the store only when the cached copy
    /// is stale.
    pub async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(slot) = cache.get(key) {
                if slot.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(slot.value.clone());
                }
            }
        }

        let value = self.store.get(key).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                key.to_string(),
                CacheSlot {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        Ok(value)
    }

    /// Drop the cached copy of `key` (used after local writes).
    pub fn invalidate(&self, key: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(key);
        }
    }

    async fn parsed_or<T: FromStr + Copy>(&self, key: &str, default: T) -> CoreResult<T> {
        let raw = self.get(key).await?;
        Ok(parse_or(raw.as_deref(), default))
    }

    pub async fn app_name(&self) -> CoreResult<String> {
        Ok(self
            .get(keys::APP_NAME)
            .await?
            .unwrap_or_else(|| "Comradarr".to_string()))
    }

    /// The instance timezone; daily throttle windows roll on its calendar
    /// day. Unparseable values fall back to UTC.
    pub async fn timezone(&self) -> CoreResult<Tz> {
        let raw = self.get(keys::TIMEZONE).await?;
        Ok(raw
            .as_deref()
            .and_then(|s| Tz::from_str(s).ok())
            .unwrap_or(chrono_tz::UTC))
    }

    pub async fn log_level(&self) -> CoreResult<String> {
        Ok(self
            .get(keys::LOG_LEVEL)
            .await?
            .unwrap_or_else(|| "info".to_string()))
    }

    pub async fn auth_mode(&self) -> CoreResult<AuthMode> {
        let raw = self.get(keys::AUTH_MODE).await?;
        Ok(raw
            .as_deref()
            .and_then(AuthMode::parse)
            .unwrap_or_default())
    }

    pub async fn log_persistence_enabled(&self) -> CoreResult<bool> {
        self.parsed_or(keys::LOG_PERSISTENCE_ENABLED, false).await
    }

    pub async fn priority_weights(&self) -> CoreResult<PriorityWeights> {
        let defaults = PriorityWeights::default();
        Ok(PriorityWeights {
            content_age: bounded_weight(
                self.get(keys::SEARCH_WEIGHT_CONTENT_AGE).await?.as_deref(),
                defaults.content_age,
            ),
            missing_duration: bounded_weight(
                self.get(keys::SEARCH_WEIGHT_MISSING_DURATION)
                    .await?
                    .as_deref(),
                defaults.missing_duration,
            ),
            user_priority: bounded_weight(
                self.get(keys::SEARCH_WEIGHT_USER_PRIORITY)
                    .await?
                    .as_deref(),
                defaults.user_priority,
            ),
            failure_penalty: bounded_weight(
                self.get(keys::SEARCH_WEIGHT_FAILURE_PENALTY)
                    .await?
                    .as_deref(),
                defaults.failure_penalty,
            ),
            gap_bonus: bounded_weight(
                self.get(keys::SEARCH_WEIGHT_GAP_BONUS).await?.as_deref(),
                defaults.gap_bonus,
            ),
        })
    }

    pub async fn cooldown_config(&self) -> CoreResult<CooldownConfig> {
        let defaults = CooldownConfig::default();
        let base_secs = self
            .parsed_or(
                keys::SEARCH_COOLDOWN_BASE_SECONDS,
                defaults.base.num_seconds(),
            )
            .await?;
        let max_secs = self
            .parsed_or(
                keys::SEARCH_COOLDOWN_MAX_SECONDS,
                defaults.max.num_seconds(),
            )
            .await?;
        let multiplier = self
            .parsed_or(keys::SEARCH_COOLDOWN_MULTIPLIER, defaults.multiplier)
            .await?;
        let jitter = self
            .parsed_or(keys::SEARCH_COOLDOWN_JITTER, defaults.jitter)
            .await?;
        let max_attempts = self
            .parsed_or(keys::SEARCH_MAX_ATTEMPTS, defaults.max_attempts)
            .await?;

        Ok(CooldownConfig {
            base: chrono::Duration::seconds(base_secs.max(1)),
            max: chrono::Duration::seconds(max_secs.max(base_secs.max(1))),
            multiplier: if multiplier >= 1.0 { multiplier } else { defaults.multiplier },
            jitter,
            max_attempts: max_attempts.max(1),
        })
    }

    pub async fn season_pack_thresholds(&self) -> CoreResult<SeasonPackThresholds> {
        let defaults = SeasonPackThresholds::default();
        let pct = bounded_weight(
            self.get(keys::SEARCH_SEASON_PACK_THRESHOLD_PCT)
                .await?
                .as_deref(),
            defaults.pct,
        );
        let count = self
            .parsed_or(keys::SEARCH_SEASON_PACK_THRESHOLD_COUNT, defaults.count)
            .await?;
        Ok(SeasonPackThresholds { pct, count })
    }
}

/// Parse with a fallback; malformed stored values never break a sweep.
fn parse_or<T: FromStr + Copy>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

/// Weights and percentages are integers 0..=100.
fn bounded_weight(raw: Option<&str>, default: u8) -> u8 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .map(|v| v.clamp(0, 100) as u8)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_falls_back() {
        assert_eq!(parse_or::<i64>(None, 7), 7);
        assert_eq!(parse_or::<i64>(Some("not a number"), 7), 7);
        assert_eq!(parse_or::<i64>(Some(" 42 "), 7), 42);
        assert!(parse_or::<bool>(Some("true"), false));
    }

    #[test]
    fn test_bounded_weight_clamps() {
        assert_eq!(bounded_weight(Some("250"), 10), 100);
        assert_eq!(bounded_weight(Some("-5"), 10), 0);
        assert_eq!(bounded_weight(Some("55"), 10), 55);
        assert_eq!(bounded_weight(Some("junk"), 10), 10);
    }

    #[test]
    fn test_auth_mode_parse() {
        assert_eq!(AuthMode::parse("full"), Some(AuthMode::Full));
        assert_eq!(AuthMode::parse("local_bypass"), Some(AuthMode::LocalBypass));
        assert_eq!(AuthMode::parse("open"), None);
    }
}
