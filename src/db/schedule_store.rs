//! Schedule persistence
//!
//! User-defined sweep schedules. The cron expression is validated under the
//! schedule's timezone before anything is written; `connector_id` is
//! immutable after creation, so updates never rebind a schedule to another
//! connector.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::cron::CronSpec;
use crate::error::CoreResult;
use crate::sweep::SweepKind;

/// A user-defined sweep schedule.
#[derive(Debug, Clone, FromRow)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub sweep_kind: SweepKind,
    pub cron_expression: String,
    pub timezone: String,
    /// `None` targets every enabled connector.
    pub connector_id: Option<i64>,
    pub throttle_profile_id: Option<i64>,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Parse the stored expression; stored rows were validated at write
    /// time, so a failure here means the row was edited out-of-band.
    pub fn cron_spec(&self) -> CoreResult<CronSpec> {
        CronSpec::parse(&self.cron_expression, &self.timezone)
    }

    /// Stable job id used by the orchestrator.
    pub fn job_id(&self) -> String {
        format!("schedule:{}", self.id)
    }
}

/// Creation payload.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub name: String,
    pub sweep_kind: SweepKind,
    pub cron_expression: String,
    pub timezone: String,
    pub connector_id: Option<i64>,
    pub throttle_profile_id: Option<i64>,
    pub enabled: bool,
}

#[derive(Clone)]
pub struct PgScheduleStore {
    pool: PgPool,
}

impl PgScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewSchedule, now: DateTime<Utc>) -> CoreResult<Schedule> {
        let spec = CronSpec::parse(&new.cron_expression, &new.timezone)?;
        let next_run_at = spec.next_after(now);

        let schedule = sqlx::query_as::<_, Schedule>(
            r#"
            INSERT INTO schedules
                (name, sweep_kind, cron_expression, timezone, connector_id,
                 throttle_profile_id, enabled, next_run_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&new.name)
        .bind(new.sweep_kind.as_str())
        .bind(spec.expression())
        .bind(&new.timezone)
        .bind(new.connector_id)
        .bind(new.throttle_profile_id)
        .bind(new.enabled)
        .bind(next_run_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(schedule)
    }

    /// Update everything except `connector_id`.
    pub async fn update(
        &self,
        id: i64,
        name: &str,
        sweep_kind: SweepKind,
        cron_expression: &str,
        timezone: &str,
        throttle_profile_id: Option<i64>,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let spec = CronSpec::parse(cron_expression, timezone)?;
        let next_run_at = spec.next_after(now);

        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET name = $2, sweep_kind = $3, cron_expression = $4, timezone = $5,
                throttle_profile_id = $6, enabled = $7, next_run_at = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(sweep_kind.as_str())
        .bind(spec.expression())
        .bind(timezone)
        .bind(throttle_profile_id)
        .bind(enabled)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get(&self, id: i64) -> CoreResult<Option<Schedule>> {
        let schedule = sqlx::query_as::<_, Schedule>("SELECT * FROM schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(schedule)
    }

    pub async fn list_enabled(&self) -> CoreResult<Vec<Schedule>> {
        let schedules =
            sqlx::query_as::<_, Schedule>("SELECT * FROM schedules WHERE enabled ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(schedules)
    }

    pub async fn delete(&self, id: i64) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Stamp a run and the next fire time together.
    pub async fn record_run(
        &self,
        id: i64,
        ran_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        sqlx::query("UPDATE schedules SET last_run_at = $2, next_run_at = $3 WHERE id = $1")
            .bind(id)
            .bind(ran_at)
            .bind(next_run_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
