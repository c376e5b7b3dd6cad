//! Content mirror
//!
//! Local normalized model of the upstream libraries: series context plus a
//! single polymorphic content table covering episodes and movies. Rows are
//! written only by the sync subsystem and removed only when a full
//! reconciliation no longer sees them upstream (or a 404 says so).

pub mod store;

pub use store::PgContentStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Content polymorphism tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Episode,
    Movie,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episode => "episode",
            Self::Movie => "movie",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for ContentKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "episode" => Ok(Self::Episode),
            "movie" => Ok(Self::Movie),
            _ => Err(format!("unknown content kind: {s}")),
        }
    }
}

/// One mirrored content item.
#[derive(Debug, Clone, FromRow)]
pub struct ContentItem {
    pub id: i64,
    pub connector_id: i64,
    #[sqlx(try_from = "String")]
    pub kind: ContentKind,
    pub upstream_id: i64,
    pub series_upstream_id: Option<i64>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub title: String,
    pub year: Option<i32>,
    /// User intent to acquire.
    pub monitored: bool,
    /// Acquired.
    pub has_file: bool,
    /// Acquired but below the quality profile cutoff.
    pub quality_cutoff_not_met: bool,
    pub air_date: Option<DateTime<Utc>>,
    /// First instant this row was seen monitored without a file.
    pub first_missing_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mirrored series context (episodic connectors only).
#[derive(Debug, Clone, FromRow)]
pub struct SeriesContext {
    pub id: i64,
    pub connector_id: i64,
    pub upstream_id: i64,
    pub title: String,
    pub next_airing: Option<DateTime<Utc>>,
}

/// Aggregate counts backing completion snapshots.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct CompletionCounts {
    pub monitored_count: i64,
    pub downloaded_count: i64,
}

impl CompletionCounts {
    /// Completion as basis points, 0..=10000.
    pub fn percent_bps(&self) -> i32 {
        if self.monitored_count <= 0 {
            return 10_000;
        }
        let bps = self.downloaded_count.max(0) * 10_000 / self.monitored_count;
        bps.clamp(0, 10_000) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_bps() {
        let counts = CompletionCounts {
            monitored_count: 200,
            downloaded_count: 150,
        };
        assert_eq!(counts.percent_bps(), 7_500);

        let empty = CompletionCounts {
            monitored_count: 0,
            downloaded_count: 0,
        };
        assert_eq!(empty.percent_bps(), 10_000);
    }
}
