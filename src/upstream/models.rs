//! Upstream wire models
//!
//! Typed views of the vendor JSON surface (`/api/v3/...`). Only the fields
//! the control plane consumes are modeled; unknown fields are ignored.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

/// `GET system/status`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatusResource {
    pub app_name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Season statistics as embedded in a series resource.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonStatisticsResource {
    #[serde(default)]
    pub episode_count: i32,
    #[serde(default)]
    pub episode_file_count: i32,
    #[serde(default)]
    pub total_episode_count: i32,
    #[serde(default)]
    pub next_airing: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonResource {
    pub season_number: i32,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub statistics: Option<SeasonStatisticsResource>,
}

/// `GET series` element (Sonarr/Whisparr).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesResource {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub seasons: Vec<SeasonResource>,
    #[serde(default)]
    pub next_airing: Option<DateTime<Utc>>,
    #[serde(default)]
    pub added: Option<DateTime<Utc>>,
}

/// `GET episode?seriesId=` element.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeResource {
    pub id: i64,
    pub series_id: i64,
    pub season_number: i32,
    pub episode_number: i32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub air_date_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub has_file: bool,
    /// Set when the file exists but sits below the quality profile cutoff.
    #[serde(default)]
    pub quality_cutoff_not_met: bool,
}

/// `GET movie` element (Radarr).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieResource {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub quality_cutoff_not_met: bool,
    #[serde(default)]
    pub in_cinemas: Option<NaiveDate>,
    #[serde(default)]
    pub added: Option<DateTime<Utc>>,
}

/// `POST command` / `GET command/{id}` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResource {
    pub id: i64,
    pub name: String,
    /// Vendor statuses: queued, started, completed, failed, aborted, orphaned.
    pub status: String,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
}

/// One page of `GET queue`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePage {
    pub page: i32,
    pub page_size: i32,
    pub total_records: i32,
    #[serde(default)]
    pub records: Vec<QueueItem>,
}

/// A download the upstream service is currently working on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: i64,
    #[serde(default)]
    pub series_id: Option<i64>,
    #[serde(default)]
    pub episode_id: Option<i64>,
    #[serde(default)]
    pub movie_id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Normalized result of a library enumeration, independent of variant.
#[derive(Debug, Clone, Default)]
pub struct RemoteLibrary {
    pub series: Vec<SeriesResource>,
    pub episodes: Vec<EpisodeResource>,
    pub movies: Vec<MovieResource>,
}

impl RemoteLibrary {
    pub fn is_empty(&self) -> bool {
        self.series.is_empty() && self.episodes.is_empty() && self.movies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_resource_parses_vendor_shape() {
        let raw = serde_json::json!({
            "id": 42,
            "title": "Example Show",
            "year": 2021,
            "monitored": true,
            "nextAiring": "2025-06-07T01:00:00Z",
            "seasons": [
                {"seasonNumber": 1, "monitored": true,
                 "statistics": {"episodeCount": 10, "episodeFileCount": 4, "totalEpisodeCount": 10}}
            ],
            "unknownVendorField": {"ignored": true}
        });
        let series: SeriesResource = serde_json::from_value(raw).unwrap();
        assert_eq!(series.id, 42);
        assert_eq!(series.seasons.len(), 1);
        let stats = series.seasons[0].statistics.as_ref().unwrap();
        assert_eq!(stats.episode_file_count, 4);
        assert!(series.next_airing.is_some());
    }

    #[test]
    fn test_queue_page_defaults_records() {
        let raw = serde_json::json!({"page": 1, "pageSize": 50, "totalRecords": 0});
        let page: QueuePage = serde_json::from_value(raw).unwrap();
        assert!(page.records.is_empty());
    }
}
