//! Throttle governor
//!
//! Per-connector rate budgets: a rolling per-minute window, an optional
//! daily budget on the connector timezone's calendar day, upstream-driven
//! pauses, and sweep-internal batch pacing. The governor holds the
//! authoritative admission decision; callers never count requests
//! themselves.

mod governor;
mod profile;

pub use governor::ThrottleGovernor;
pub use profile::ThrottleProfile;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a connector is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    UpstreamRateLimited,
    DailyBudgetExhausted,
    Manual,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpstreamRateLimited => "upstream_rate_limited",
            Self::DailyBudgetExhausted => "daily_budget_exhausted",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for PauseReason {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "upstream_rate_limited" => Ok(Self::UpstreamRateLimited),
            "daily_budget_exhausted" => Ok(Self::DailyBudgetExhausted),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("unknown pause reason: {s}")),
        }
    }
}

/// Outcome of one admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request-right is granted and has been charged to both counters.
    Allow,
    /// Come back after `retry_after`; nothing was charged.
    Defer { retry_after: chrono::Duration },
    /// The connector is paused until `until`; the sweep should stop.
    PausedUntil {
        until: DateTime<Utc>,
        reason: PauseReason,
    },
}

/// Per-connector counters and pause state. Process-resident; periodically
/// persisted for observability only.
#[derive(Debug, Clone, Serialize)]
pub struct ThrottleState {
    pub requests_this_minute: u32,
    pub minute_window_start: DateTime<Utc>,
    pub requests_today: u32,
    pub day_window_start: DateTime<Utc>,
    pub is_paused: bool,
    pub paused_until: Option<DateTime<Utc>>,
    pub pause_reason: Option<PauseReason>,
    pub last_batch_at: Option<DateTime<Utc>>,
    pub batch_run_length: u32,
}

impl ThrottleState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            requests_this_minute: 0,
            minute_window_start: now,
            requests_today: 0,
            day_window_start: now,
            is_paused: false,
            paused_until: None,
            pause_reason: None,
            last_batch_at: None,
            batch_run_length: 0,
        }
    }
}
