//! Registry persistence
//!
//! Guarded state transitions over the `search_registry` table. Every
//! transition carries a `WHERE state = <expected>` predicate; a write that
//! matches zero rows lost the race to another sweep and yields.
//!
//! NOTE: queries are runtime-checked `sqlx::query()` because the tables are
//! created by migrations that may not exist at compile time.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::{RegistryEntry, SearchState, SearchType};
use crate::error::CoreResult;

/// Postgres-backed registry store.
#[derive(Clone)]
pub struct PgRegistryStore {
    pool: PgPool,
}

impl PgRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the intent row if it does not already exist. Returns whether
    /// a new row was inserted.
    pub async fn ensure(
        &self,
        connector_id: i64,
        content_id: i64,
        search_type: SearchType,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO search_registry (connector_id, content_id, search_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (connector_id, content_id, search_type) DO NOTHING
            "#,
        )
        .bind(connector_id)
        .bind(content_id)
        .bind(search_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&self, id: i64) -> CoreResult<Option<RegistryEntry>> {
        let entry = sqlx::query_as::<_, RegistryEntry>(
            "SELECT * FROM search_registry WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Move elapsed cooldown rows back to pending. Returns the number of
    /// rows promoted.
    pub async fn promote_elapsed_cooldowns(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = 'pending', next_eligible_at = NULL, updated_at = $1
            WHERE state = 'cooldown' AND next_eligible_at IS NOT NULL AND next_eligible_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Pending rows eligible for dispatch on the given connectors.
    pub async fn eligible(
        &self,
        connector_ids: &[i64],
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<RegistryEntry>> {
        let entries = sqlx::query_as::<_, RegistryEntry>(
            r#"
            SELECT * FROM search_registry
            WHERE connector_id = ANY($1)
              AND state = 'pending'
              AND (next_eligible_at IS NULL OR next_eligible_at <= $2)
            "#,
        )
        .bind(connector_ids)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Persist selection-time scores so the management surface sees the
    /// same ordering the dispatcher used.
    pub async fn update_priorities(&self, scores: &[(i64, i32)]) -> CoreResult<()> {
        if scores.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (id, priority) in scores {
            sqlx::query("UPDATE search_registry SET priority = $2 WHERE id = $1")
                .bind(id)
                .bind(priority)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Guarded transition. Returns false when the row was not in
    /// `expected` state (another writer won).
    pub async fn transition(
        &self,
        id: i64,
        expected: SearchState,
        to: SearchState,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = $3, updated_at = now()
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// pending → queued, picked by a sweep.
    pub async fn mark_queued(&self, id: i64) -> CoreResult<bool> {
        self.transition(id, SearchState::Pending, SearchState::Queued)
            .await
    }

    /// Throttle defer: stamp the retry time and leave the row pending.
    pub async fn defer(&self, id: i64, next_eligible_at: DateTime<Utc>) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = 'pending', next_eligible_at = $2, updated_at = now()
            WHERE id = $1 AND state IN ('pending', 'queued')
            "#,
        )
        .bind(id)
        .bind(next_eligible_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// queued → searching paired with the pending-command insert, in one
    /// transaction. Returns the pending command id, or `None` when the
    /// registry row was no longer `queued`.
    pub async fn dispatch(
        &self,
        id: i64,
        connector_id: i64,
        content_id: i64,
        search_type: SearchType,
        upstream_command_id: i64,
    ) -> CoreResult<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = 'searching', updated_at = now()
            WHERE id = $1 AND state = 'queued'
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO pending_commands
                (connector_id, registry_id, upstream_command_id, content_id, search_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(connector_id)
        .bind(id)
        .bind(upstream_command_id)
        .bind(content_id)
        .bind(search_type.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(registry_id = id, pending_id = row.0, "search dispatched");
        Ok(Some(row.0))
    }

    /// Season-pack dispatch: the whole group of queued rows transitions to
    /// searching together, with one pending command recorded against the
    /// representative row.
    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch_season(
        &self,
        representative_id: i64,
        group_ids: &[i64],
        connector_id: i64,
        content_id: i64,
        series_upstream_id: i64,
        season_number: i32,
        upstream_command_id: i64,
    ) -> CoreResult<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = 'searching', updated_at = now()
            WHERE id = ANY($1) AND state = 'queued'
            "#,
        )
        .bind(group_ids)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO pending_commands
                (connector_id, registry_id, upstream_command_id, content_id, search_type,
                 series_upstream_id, season_number)
            VALUES ($1, $2, $3, $4, 'gap', $5, $6)
            RETURNING id
            "#,
        )
        .bind(connector_id)
        .bind(representative_id)
        .bind(upstream_command_id)
        .bind(content_id)
        .bind(series_upstream_id)
        .bind(season_number)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            representative_id,
            pending_id = row.0,
            season_number,
            "season search dispatched"
        );
        Ok(Some(row.0))
    }

    /// Dispatch itself failed on a transient upstream error: the queued row
    /// takes a cooldown attempt without ever reaching searching.
    pub async fn fail_dispatch(
        &self,
        id: i64,
        next_eligible_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = 'cooldown',
                attempt_count = attempt_count + 1,
                next_eligible_at = $2,
                last_error = $3,
                updated_at = now()
            WHERE id = $1 AND state = 'queued'
            "#,
        )
        .bind(id)
        .bind(next_eligible_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// searching → cooldown after a failed or timed-out attempt. Counts the
    /// attempt.
    pub async fn record_attempt_cooldown(
        &self,
        id: i64,
        next_eligible_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = 'cooldown',
                attempt_count = attempt_count + 1,
                next_eligible_at = $2,
                last_error = $3,
                updated_at = now()
            WHERE id = $1 AND state = 'searching'
            "#,
        )
        .bind(id)
        .bind(next_eligible_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// searching → exhausted once the attempt budget is spent.
    pub async fn record_attempt_exhausted(&self, id: i64, error: Option<&str>) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = 'exhausted',
                attempt_count = attempt_count + 1,
                next_eligible_at = NULL,
                last_error = $2,
                updated_at = now()
            WHERE id = $1 AND state = 'searching'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Success terminal: the file arrived, the intent row goes away.
    pub async fn delete(&self, id: i64) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM search_registry WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drop all intent rows for a content item (upstream removed it).
    pub async fn delete_for_content(&self, content_id: i64) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM search_registry WHERE content_id = $1")
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// User "clear": back to pending with a fresh attempt budget. Allowed
    /// from any state.
    pub async fn clear(&self, id: i64) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = 'pending',
                attempt_count = 0,
                next_eligible_at = NULL,
                last_error = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// User "mark exhausted". Refused while a search is in flight.
    pub async fn mark_exhausted(&self, id: i64) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_registry
            SET state = 'exhausted', next_eligible_at = NULL, updated_at = now()
            WHERE id = $1 AND state <> 'searching'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Open (non-terminal) rows, for health's queue depth.
    pub async fn open_row_count(&self) -> CoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM search_registry
            WHERE state IN ('pending', 'queued', 'searching', 'cooldown')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Searching rows belonging to one season of one series, used when a
    /// season-pack command settles.
    pub async fn searching_for_season(
        &self,
        connector_id: i64,
        series_upstream_id: i64,
        season_number: i32,
    ) -> CoreResult<Vec<RegistryEntry>> {
        let entries = sqlx::query_as::<_, RegistryEntry>(
            r#"
            SELECT r.* FROM search_registry r
            JOIN content_items c ON c.id = r.content_id
            WHERE r.connector_id = $1 AND r.state = 'searching'
              AND c.series_upstream_id = $2 AND c.season_number = $3
            "#,
        )
        .bind(connector_id)
        .bind(series_upstream_id)
        .bind(season_number)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Rows currently `searching` for a connector, used by the tracker to
    /// cross-check invariant 1.
    pub async fn searching_for_connector(
        &self,
        connector_id: i64,
    ) -> CoreResult<Vec<RegistryEntry>> {
        let entries = sqlx::query_as::<_, RegistryEntry>(
            "SELECT * FROM search_registry WHERE connector_id = $1 AND state = 'searching'",
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
