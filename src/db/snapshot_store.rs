//! Completion snapshots
//!
//! Append-only trend rows per connector, captured hourly and pruned after
//! thirty days. Display-only data; nothing in the control plane reads it
//! back.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::CoreResult;

/// Snapshot retention window, days.
pub const RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, FromRow)]
pub struct CompletionSnapshot {
    pub id: i64,
    pub connector_id: i64,
    pub captured_at: DateTime<Utc>,
    pub monitored_count: i64,
    pub downloaded_count: i64,
    /// Completion in basis points, 0..=10000.
    pub percent_bps: i32,
}

#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        connector_id: i64,
        captured_at: DateTime<Utc>,
        monitored_count: i64,
        downloaded_count: i64,
        percent_bps: i32,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO completion_snapshots
                (connector_id, captured_at, monitored_count, downloaded_count, percent_bps)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(connector_id)
        .bind(captured_at)
        .bind(monitored_count)
        .bind(downloaded_count)
        .bind(percent_bps)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM completion_snapshots WHERE captured_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn recent(&self, connector_id: i64, limit: i64) -> CoreResult<Vec<CompletionSnapshot>> {
        let rows = sqlx::query_as::<_, CompletionSnapshot>(
            r#"
            SELECT * FROM completion_snapshots
            WHERE connector_id = $1
            ORDER BY captured_at DESC
            LIMIT $2
            "#,
        )
        .bind(connector_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
