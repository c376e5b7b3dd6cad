//! Search registry
//!
//! One durable row per `(connector, content, search type)` carrying the
//! intent-to-search state machine. Rows are created by discovery, advanced
//! by the sweep runner and the pending-command tracker, and removed on
//! success or connector delete.

pub mod cooldown;
pub mod priority;
pub mod store;

pub use cooldown::CooldownConfig;
pub use priority::{PriorityInput, PriorityWeights};
pub use store::PgRegistryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Why a search exists: missing content vs. below-cutoff content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Gap,
    Upgrade,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gap => "gap",
            Self::Upgrade => "upgrade",
        }
    }
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for SearchType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "gap" => Ok(Self::Gap),
            "upgrade" => Ok(Self::Upgrade),
            _ => Err(format!("unknown search type: {s}")),
        }
    }
}

/// Registry state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchState {
    /// Eligible for selection by a sweep.
    Pending,
    /// Picked by a sweep, not yet dispatched.
    Queued,
    /// A command is open upstream; exactly one pending command exists.
    Searching,
    /// Waiting out a post-attempt delay; returns to pending when elapsed.
    Cooldown,
    /// Attempt budget spent; holds until a user clears it.
    Exhausted,
}

impl SearchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Searching => "searching",
            Self::Cooldown => "cooldown",
            Self::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for SearchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for SearchState {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "searching" => Ok(Self::Searching),
            "cooldown" => Ok(Self::Cooldown),
            "exhausted" => Ok(Self::Exhausted),
            _ => Err(format!("unknown search state: {s}")),
        }
    }
}

/// A durable intent-to-search row.
#[derive(Debug, Clone, FromRow)]
pub struct RegistryEntry {
    pub id: i64,
    pub connector_id: i64,
    pub content_id: i64,
    #[sqlx(try_from = "String")]
    pub search_type: SearchType,
    #[sqlx(try_from = "String")]
    pub state: SearchState,
    pub priority: i32,
    pub user_priority: f64,
    pub attempt_count: i32,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            SearchState::Pending,
            SearchState::Queued,
            SearchState::Searching,
            SearchState::Cooldown,
            SearchState::Exhausted,
        ] {
            let parsed = SearchState::try_from(state.as_str().to_string()).unwrap();
            assert_eq!(parsed, state);
        }
        assert!(SearchState::try_from("running".to_string()).is_err());
    }
}
