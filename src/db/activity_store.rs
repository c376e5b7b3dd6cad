//! Sync activity log
//!
//! One row per sweep run, capturing counts, duration, and outcome. This is
//! the activity surface users see sweep failures and skipped connectors in.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::CoreResult;

/// How a sweep run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed,
    Failed,
    /// Stopped early on a throttle pause.
    Paused,
}

impl SweepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SweepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for SweepOutcome {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("unknown sweep outcome: {s}")),
        }
    }
}

/// Persisted activity row.
#[derive(Debug, Clone, FromRow)]
pub struct SyncActivity {
    pub id: i64,
    pub connector_id: Option<i64>,
    pub sweep_kind: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items_synced: i32,
    pub gaps_found: i32,
    pub upgrades_found: i32,
    pub commands_dispatched: i32,
    pub outcome: Option<String>,
    pub error: Option<String>,
    pub note: Option<String>,
    pub correlation_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct PgActivityStore {
    pool: PgPool,
}

impl PgActivityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open an activity row at sweep start; returns its id.
    pub async fn begin(
        &self,
        connector_id: Option<i64>,
        sweep_kind: &str,
        started_at: DateTime<Utc>,
        correlation_id: Uuid,
    ) -> CoreResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sync_activity (connector_id, sweep_kind, started_at, correlation_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(connector_id)
        .bind(sweep_kind)
        .bind(started_at)
        .bind(correlation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Close an activity row with its counts and outcome.
    #[allow(clippy::too_many_arguments)]
    pub async fn finish(
        &self,
        id: i64,
        finished_at: DateTime<Utc>,
        items_synced: i32,
        gaps_found: i32,
        upgrades_found: i32,
        commands_dispatched: i32,
        outcome: SweepOutcome,
        error: Option<&str>,
        note: Option<&str>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_activity
            SET finished_at = $2, items_synced = $3, gaps_found = $4,
                upgrades_found = $5, commands_dispatched = $6,
                outcome = $7, error = $8, note = $9
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(finished_at)
        .bind(items_synced)
        .bind(gaps_found)
        .bind(upgrades_found)
        .bind(commands_dispatched)
        .bind(outcome.as_str())
        .bind(error)
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> CoreResult<Vec<SyncActivity>> {
        let rows = sqlx::query_as::<_, SyncActivity>(
            "SELECT * FROM sync_activity ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
