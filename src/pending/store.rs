//! Pending command persistence
//!
//! Closure pairs the pending-command update with the registry transition in
//! one transaction so the searching-row/open-command invariant survives a
//! crash between the two writes.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::{CommandStatus, PendingCommand};
use crate::error::CoreResult;

/// How a finished search resolves its registry row.
#[derive(Debug, Clone)]
pub enum SearchResolution {
    /// File arrived: the registry row is deleted.
    Acquired,
    /// Attempt failed or found nothing: cooldown, or exhausted when the
    /// attempt budget is spent.
    Retry {
        next_eligible_at: DateTime<Utc>,
        error: Option<String>,
    },
    Exhausted { error: Option<String> },
}

#[derive(Clone)]
pub struct PgPendingCommandStore {
    pool: PgPool,
}

impl PgPendingCommandStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> CoreResult<Option<PendingCommand>> {
        let command =
            sqlx::query_as::<_, PendingCommand>("SELECT * FROM pending_commands WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(command)
    }

    /// Connector ids that currently have open commands.
    pub async fn connectors_with_open(&self) -> CoreResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT connector_id FROM pending_commands WHERE completed_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn open_for_connector(&self, connector_id: i64) -> CoreResult<Vec<PendingCommand>> {
        let commands = sqlx::query_as::<_, PendingCommand>(
            r#"
            SELECT * FROM pending_commands
            WHERE connector_id = $1 AND completed_at IS NULL
            ORDER BY dispatched_at
            "#,
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(commands)
    }

    /// At most one open pending command exists per content item; dispatch
    /// checks here before queuing a second intent for the same content.
    pub async fn has_open_for_content(&self, content_id: i64) -> CoreResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM pending_commands WHERE content_id = $1 AND completed_at IS NULL LIMIT 1",
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn open_count(&self) -> CoreResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pending_commands WHERE completed_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Advance the observed upstream status without closing the command.
    pub async fn update_status(&self, id: i64, status: CommandStatus) -> CoreResult<()> {
        sqlx::query(
            "UPDATE pending_commands SET command_status = $2 WHERE id = $1 AND completed_at IS NULL",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close the command and settle its registry row in one transaction.
    pub async fn resolve(
        &self,
        pending_id: i64,
        registry_id: i64,
        final_status: CommandStatus,
        resolution: SearchResolution,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let file_acquired = matches!(resolution, SearchResolution::Acquired);
        sqlx::query(
            r#"
            UPDATE pending_commands
            SET command_status = $2, file_acquired = $3, completed_at = $4
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(pending_id)
        .bind(final_status.as_str())
        .bind(file_acquired)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        match resolution {
            SearchResolution::Acquired => {
                sqlx::query("DELETE FROM search_registry WHERE id = $1")
                    .bind(registry_id)
                    .execute(&mut *tx)
                    .await?;
            }
            SearchResolution::Retry {
                next_eligible_at,
                error,
            } => {
                sqlx::query(
                    r#"
                    UPDATE search_registry
                    SET state = 'cooldown', attempt_count = attempt_count + 1,
                        next_eligible_at = $2, last_error = $3, updated_at = $4
                    WHERE id = $1 AND state = 'searching'
                    "#,
                )
                .bind(registry_id)
                .bind(next_eligible_at)
                .bind(error)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            SearchResolution::Exhausted { error } => {
                sqlx::query(
                    r#"
                    UPDATE search_registry
                    SET state = 'exhausted', attempt_count = attempt_count + 1,
                        next_eligible_at = NULL, last_error = $2, updated_at = $3
                    WHERE id = $1 AND state = 'searching'
                    "#,
                )
                .bind(registry_id)
                .bind(error)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!(pending_id, registry_id, status = %final_status, "pending command resolved");
        Ok(())
    }

    /// Close a command whose registry row is already gone. Should not
    /// happen while open; logged by the caller as an invariant violation.
    pub async fn close_orphaned(&self, id: i64, now: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE pending_commands
            SET command_status = 'failed', completed_at = $2
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Open commands dispatched before `cutoff` (the 24 h timeout sweep).
    pub async fn timed_out(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<PendingCommand>> {
        let commands = sqlx::query_as::<_, PendingCommand>(
            r#"
            SELECT * FROM pending_commands
            WHERE completed_at IS NULL AND dispatched_at < $1
            ORDER BY dispatched_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(commands)
    }

    /// Purge closed rows past the retention window.
    pub async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM pending_commands WHERE completed_at IS NOT NULL AND completed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
