//! Mirror persistence
//!
//! Upserts keyed on `(connector_id, kind, upstream_id)`. `first_missing_at`
//! is stamped the first time a row is seen monitored without a file and
//! cleared when the file arrives; the priority scorer reads it as the
//! missing-duration input.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{CompletionCounts, ContentItem, SeriesContext};
use crate::error::CoreResult;
use crate::upstream::{EpisodeResource, MovieResource, SeriesResource};

#[derive(Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_series(
        &self,
        connector_id: i64,
        series: &SeriesResource,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO series (connector_id, upstream_id, title, next_airing, last_seen_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (connector_id, upstream_id) DO UPDATE SET
                title = EXCLUDED.title,
                next_airing = EXCLUDED.next_airing,
                last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(connector_id)
        .bind(series.id)
        .bind(&series.title)
        .bind(series.next_airing)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_episode(
        &self,
        connector_id: i64,
        episode: &EpisodeResource,
        now: DateTime<Utc>,
    ) -> CoreResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO content_items
                (connector_id, kind, upstream_id, series_upstream_id, season_number,
                 episode_number, title, monitored, has_file, quality_cutoff_not_met,
                 air_date, first_missing_at, last_seen_at, updated_at)
            VALUES ($1, 'episode', $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    CASE WHEN $7 AND NOT $8 THEN $11 ELSE NULL END, $11, $11)
            ON CONFLICT (connector_id, kind, upstream_id) DO UPDATE SET
                series_upstream_id = EXCLUDED.series_upstream_id,
                season_number = EXCLUDED.season_number,
                episode_number = EXCLUDED.episode_number,
                title = EXCLUDED.title,
                monitored = EXCLUDED.monitored,
                has_file = EXCLUDED.has_file,
                quality_cutoff_not_met = EXCLUDED.quality_cutoff_not_met,
                air_date = EXCLUDED.air_date,
                first_missing_at = CASE
                    WHEN EXCLUDED.monitored AND NOT EXCLUDED.has_file
                        THEN COALESCE(content_items.first_missing_at, EXCLUDED.last_seen_at)
                    ELSE NULL
                END,
                last_seen_at = EXCLUDED.last_seen_at,
                updated_at = EXCLUDED.updated_at
            RETURNING id
            "#,
        )
        .bind(connector_id)
        .bind(episode.id)
        .bind(episode.series_id)
        .bind(episode.season_number)
        .bind(episode.episode_number)
        .bind(episode.title.clone().unwrap_or_default())
        .bind(episode.monitored)
        .bind(episode.has_file)
        .bind(episode.quality_cutoff_not_met)
        .bind(episode.air_date_utc)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn upsert_movie(
        &self,
        connector_id: i64,
        movie: &MovieResource,
        now: DateTime<Utc>,
    ) -> CoreResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO content_items
                (connector_id, kind, upstream_id, title, year, monitored, has_file,
                 quality_cutoff_not_met, first_missing_at, last_seen_at, updated_at)
            VALUES ($1, 'movie', $2, $3, $4, $5, $6, $7,
                    CASE WHEN $5 AND NOT $6 THEN $8 ELSE NULL END, $8, $8)
            ON CONFLICT (connector_id, kind, upstream_id) DO UPDATE SET
                title = EXCLUDED.title,
                year = EXCLUDED.year,
                monitored = EXCLUDED.monitored,
                has_file = EXCLUDED.has_file,
                quality_cutoff_not_met = EXCLUDED.quality_cutoff_not_met,
                first_missing_at = CASE
                    WHEN EXCLUDED.monitored AND NOT EXCLUDED.has_file
                        THEN COALESCE(content_items.first_missing_at, EXCLUDED.last_seen_at)
                    ELSE NULL
                END,
                last_seen_at = EXCLUDED.last_seen_at,
                updated_at = EXCLUDED.updated_at
            RETURNING id
            "#,
        )
        .bind(connector_id)
        .bind(movie.id)
        .bind(&movie.title)
        .bind(movie.year)
        .bind(movie.monitored)
        .bind(movie.has_file)
        .bind(movie.quality_cutoff_not_met)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Remove content a full reconciliation no longer saw upstream.
    /// Registry rows and pending commands cascade.
    pub async fn delete_absent(
        &self,
        connector_id: i64,
        sweep_started_at: DateTime<Utc>,
    ) -> CoreResult<u64> {
        sqlx::query("DELETE FROM series WHERE connector_id = $1 AND last_seen_at < $2")
            .bind(connector_id)
            .bind(sweep_started_at)
            .execute(&self.pool)
            .await?;
        let result =
            sqlx::query("DELETE FROM content_items WHERE connector_id = $1 AND last_seen_at < $2")
                .bind(connector_id)
                .bind(sweep_started_at)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Batch lookup for the dispatch phase's priority inputs.
    pub async fn get_many(&self, ids: &[i64]) -> CoreResult<Vec<ContentItem>> {
        let items =
            sqlx::query_as::<_, ContentItem>("SELECT * FROM content_items WHERE id = ANY($1)")
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
        Ok(items)
    }

    pub async fn get(&self, id: i64) -> CoreResult<Option<ContentItem>> {
        let item =
            sqlx::query_as::<_, ContentItem>("SELECT * FROM content_items WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(item)
    }

    /// Delete one content row (upstream reported 404 for it).
    pub async fn delete(&self, id: i64) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM content_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Monitored content without a file.
    pub async fn gaps(&self, connector_id: i64) -> CoreResult<Vec<ContentItem>> {
        let items = sqlx::query_as::<_, ContentItem>(
            r#"
            SELECT * FROM content_items
            WHERE connector_id = $1 AND monitored AND NOT has_file
            "#,
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Acquired content sitting below its quality cutoff.
    pub async fn upgrade_candidates(&self, connector_id: i64) -> CoreResult<Vec<ContentItem>> {
        let items = sqlx::query_as::<_, ContentItem>(
            r#"
            SELECT * FROM content_items
            WHERE connector_id = $1 AND monitored AND has_file AND quality_cutoff_not_met
            "#,
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn series_context(
        &self,
        connector_id: i64,
        series_upstream_id: i64,
    ) -> CoreResult<Option<SeriesContext>> {
        let series = sqlx::query_as::<_, SeriesContext>(
            "SELECT * FROM series WHERE connector_id = $1 AND upstream_id = $2",
        )
        .bind(connector_id)
        .bind(series_upstream_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(series)
    }

    /// Episode and missing counts for one season of one series.
    pub async fn season_counts(
        &self,
        connector_id: i64,
        series_upstream_id: i64,
        season_number: i32,
    ) -> CoreResult<(u32, u32)> {
        let (total, missing): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE monitored AND NOT has_file)
            FROM content_items
            WHERE connector_id = $1 AND kind = 'episode'
              AND series_upstream_id = $2 AND season_number = $3
            "#,
        )
        .bind(connector_id)
        .bind(series_upstream_id)
        .bind(season_number)
        .fetch_one(&self.pool)
        .await?;
        Ok((total.max(0) as u32, missing.max(0) as u32))
    }

    /// Library completion counts for trend snapshots.
    pub async fn completion_counts(&self, connector_id: i64) -> CoreResult<CompletionCounts> {
        let counts = sqlx::query_as::<_, CompletionCounts>(
            r#"
            SELECT COUNT(*) FILTER (WHERE monitored) AS monitored_count,
                   COUNT(*) FILTER (WHERE monitored AND has_file) AS downloaded_count
            FROM content_items
            WHERE connector_id = $1
            "#,
        )
        .bind(connector_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    /// All content rows a connector mirrors, newest first. Management
    /// surface support.
    pub async fn list_for_connector(
        &self,
        connector_id: i64,
        limit: i64,
    ) -> CoreResult<Vec<ContentItem>> {
        let items = sqlx::query_as::<_, ContentItem>(
            r#"
            SELECT * FROM content_items
            WHERE connector_id = $1
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
        )
        .bind(connector_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}
