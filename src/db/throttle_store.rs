//! Throttle profile and state persistence
//!
//! Profiles are user configuration; the partial unique index on
//! `is_default` keeps exactly one system-wide default. Throttle state rows
//! are observability copies of the governor's in-process counters, never
//! read back for admission.

use sqlx::PgPool;

use crate::error::CoreResult;
use crate::throttle::{ThrottleProfile, ThrottleState};

#[derive(Clone)]
pub struct PgThrottleProfileStore {
    pool: PgPool,
}

impl PgThrottleProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> CoreResult<Option<ThrottleProfile>> {
        let profile =
            sqlx::query_as::<_, ThrottleProfile>("SELECT * FROM throttle_profiles WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(profile)
    }

    /// The system-wide default profile. Falls back to the built-in when no
    /// row is flagged (fresh database).
    pub async fn default_profile(&self) -> CoreResult<ThrottleProfile> {
        let profile = sqlx::query_as::<_, ThrottleProfile>(
            "SELECT * FROM throttle_profiles WHERE is_default LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile.unwrap_or_else(ThrottleProfile::builtin_default))
    }

    pub async fn list(&self) -> CoreResult<Vec<ThrottleProfile>> {
        let profiles =
            sqlx::query_as::<_, ThrottleProfile>("SELECT * FROM throttle_profiles ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(profiles)
    }

    pub async fn create(&self, profile: &ThrottleProfile) -> CoreResult<i64> {
        profile.validate()?;
        let mut tx = self.pool.begin().await?;
        if profile.is_default {
            sqlx::query("UPDATE throttle_profiles SET is_default = false WHERE is_default")
                .execute(&mut *tx)
                .await?;
        }
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO throttle_profiles
                (name, requests_per_minute, daily_budget, batch_size,
                 batch_cooldown_seconds, rate_limit_pause_seconds, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&profile.name)
        .bind(profile.requests_per_minute)
        .bind(profile.daily_budget)
        .bind(profile.batch_size)
        .bind(profile.batch_cooldown_seconds)
        .bind(profile.rate_limit_pause_seconds)
        .bind(profile.is_default)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Reflag the default atomically.
    pub async fn set_default(&self, id: i64) -> CoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE throttle_profiles SET is_default = false WHERE is_default")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("UPDATE throttle_profiles SET is_default = true WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Clone)]
pub struct PgThrottleStateStore {
    pool: PgPool,
}

impl PgThrottleStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist the governor's current counters for one connector.
    pub async fn upsert(&self, connector_id: i64, state: &ThrottleState) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO throttle_states
                (connector_id, requests_this_minute, minute_window_start,
                 requests_today, day_window_start, is_paused, paused_until,
                 pause_reason, last_batch_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (connector_id) DO UPDATE SET
                requests_this_minute = EXCLUDED.requests_this_minute,
                minute_window_start = EXCLUDED.minute_window_start,
                requests_today = EXCLUDED.requests_today,
                day_window_start = EXCLUDED.day_window_start,
                is_paused = EXCLUDED.is_paused,
                paused_until = EXCLUDED.paused_until,
                pause_reason = EXCLUDED.pause_reason,
                last_batch_at = EXCLUDED.last_batch_at
            "#,
        )
        .bind(connector_id)
        .bind(state.requests_this_minute as i32)
        .bind(state.minute_window_start)
        .bind(state.requests_today as i32)
        .bind(state.day_window_start)
        .bind(state.is_paused)
        .bind(state.paused_until)
        .bind(state.pause_reason.map(|r| r.as_str()))
        .bind(state.last_batch_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
