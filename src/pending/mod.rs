//! Pending commands
//!
//! Correlates a dispatched search command with the upstream command queue
//! and the eventual download. Exactly one open pending command exists per
//! content item, and every open pending command points at a registry row in
//! `searching` (and vice versa).

pub mod store;
pub mod tracker;

pub use store::{PgPendingCommandStore, SearchResolution};
pub use tracker::PendingCommandTracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::registry::SearchType;

/// Mirror of the upstream command lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Queued,
    Started,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Map a vendor status string. Aborted/cancelled/orphaned commands all
    /// count as failed; anything unrecognized is treated as still running.
    pub fn from_upstream(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "queued" => Self::Queued,
            "completed" => Self::Completed,
            "failed" | "aborted" | "cancelled" | "orphaned" => Self::Failed,
            _ => Self::Started,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for CommandStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "queued" => Ok(Self::Queued),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown command status: {s}")),
        }
    }
}

/// One dispatched search command awaiting its outcome.
#[derive(Debug, Clone, FromRow)]
pub struct PendingCommand {
    pub id: i64,
    pub connector_id: i64,
    /// Always set while the command is open; goes `NULL` once the registry
    /// row is deleted on success.
    pub registry_id: Option<i64>,
    pub upstream_command_id: i64,
    pub content_id: i64,
    #[sqlx(try_from = "String")]
    pub search_type: SearchType,
    #[sqlx(try_from = "String")]
    pub command_status: CommandStatus,
    pub file_acquired: Option<bool>,
    /// Set on season-pack commands; the command covers every searching row
    /// of this season, with `registry_id` as the representative.
    pub series_upstream_id: Option<i64>,
    pub season_number: Option<i32>,
    pub dispatched_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PendingCommand {
    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }

    pub fn is_season_pack(&self) -> bool {
        self.series_upstream_id.is_some() && self.season_number.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_status_mapping() {
        assert_eq!(CommandStatus::from_upstream("Queued"), CommandStatus::Queued);
        assert_eq!(
            CommandStatus::from_upstream("completed"),
            CommandStatus::Completed
        );
        assert_eq!(
            CommandStatus::from_upstream("aborted"),
            CommandStatus::Failed
        );
        assert_eq!(
            CommandStatus::from_upstream("orphaned"),
            CommandStatus::Failed
        );
        // Unknown in-flight statuses keep the command open.
        assert_eq!(
            CommandStatus::from_upstream("processing"),
            CommandStatus::Started
        );
    }
}
