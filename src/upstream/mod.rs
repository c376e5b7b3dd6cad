//! Upstream client
//!
//! Typed HTTP client over the Sonarr/Radarr/Whisparr `/api/v3` surface. The
//! three variants share one capability set and differ only on the tag;
//! callers never branch on the vendor themselves.
//!
//! Every call carries an end-to-end deadline and classifies failures into
//! the closed [`UpstreamError`] taxonomy before returning.

pub mod error;
pub mod models;

pub use error::{NetworkCause, UpstreamError};
pub use models::{
    CommandResource, EpisodeResource, MovieResource, QueueItem, QueuePage, RemoteLibrary,
    SeasonResource, SeasonStatisticsResource, SeriesResource, SystemStatusResource,
};

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::CoreError;

/// Default end-to-end deadline for upstream calls.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Tighter deadline for liveness probes.
const PING_DEADLINE: Duration = Duration::from_secs(5);

/// Page size used when draining the download queue.
const QUEUE_PAGE_SIZE: i32 = 250;

/// Supported connector families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Sonarr,
    Radarr,
    Whisparr,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sonarr => "sonarr",
            Self::Radarr => "radarr",
            Self::Whisparr => "whisparr",
        }
    }

    /// Whether the variant's library is series/episode shaped.
    pub fn is_episodic(&self) -> bool {
        matches!(self, Self::Sonarr | Self::Whisparr)
    }
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for ConnectorKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "sonarr" => Ok(Self::Sonarr),
            "radarr" => Ok(Self::Radarr),
            "whisparr" => Ok(Self::Whisparr),
            _ => Err(format!("unknown connector kind: {s}")),
        }
    }
}

/// A search command to submit upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCommand {
    EpisodeSearch { episode_ids: Vec<i64> },
    SeasonSearch { series_id: i64, season_number: i32 },
    MoviesSearch { movie_ids: Vec<i64> },
}

impl SearchCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EpisodeSearch { .. } => "EpisodeSearch",
            Self::SeasonSearch { .. } => "SeasonSearch",
            Self::MoviesSearch { .. } => "MoviesSearch",
        }
    }

    /// Vendor command body.
    pub fn body(&self) -> serde_json::Value {
        match self {
            Self::EpisodeSearch { episode_ids } => serde_json::json!({
                "name": self.name(),
                "episodeIds": episode_ids,
            }),
            Self::SeasonSearch {
                series_id,
                season_number,
            } => serde_json::json!({
                "name": self.name(),
                "seriesId": series_id,
                "seasonNumber": season_number,
            }),
            Self::MoviesSearch { movie_ids } => serde_json::json!({
                "name": self.name(),
                "movieIds": movie_ids,
            }),
        }
    }
}

/// Connection parameters for one connector.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub kind: ConnectorKind,
    pub base_url: String,
    pub api_key: String,
}

/// Typed client for a single connector.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    config: UpstreamConfig,
    base: Url,
    http: reqwest::Client,
}

impl UpstreamClient {
    /// Build a client, validating the base URL.
    pub fn new(config: UpstreamConfig) -> Result<Self, CoreError> {
        let base = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            CoreError::InvalidConfig(format!("invalid base url {:?}: {e}", config.base_url))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(CoreError::InvalidConfig(format!(
                "base url must be http(s): {base}"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_DEADLINE)
            .build()
            .map_err(|e| CoreError::InvalidConfig(format!("http client: {e}")))?;

        Ok(Self { config, base, http })
    }

    pub fn kind(&self) -> ConnectorKind {
        self.config.kind
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v3/{path}", self.base.as_str().trim_end_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        deadline: Duration,
    ) -> Result<T, UpstreamError> {
        let response = self
            .http
            .get(self.endpoint(path))
            .query(query)
            .header("X-Api-Key", &self.config.api_key)
            .timeout(deadline)
            .send()
            .await
            .map_err(UpstreamError::from_transport)?;

        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    /// Liveness probe: `GET system/status` with a tight deadline.
    pub async fn ping(&self) -> Result<(), UpstreamError> {
        let _: SystemStatusResource = self
            .get_json("system/status", &[], PING_DEADLINE)
            .await?;
        Ok(())
    }

    pub async fn system_status(&self) -> Result<SystemStatusResource, UpstreamError> {
        self.get_json("system/status", &[], DEFAULT_DEADLINE).await
    }

    /// Enumerate the entire upstream library.
    pub async fn full_library(&self) -> Result<RemoteLibrary, UpstreamError> {
        let mut library = RemoteLibrary::default();

        if self.config.kind.is_episodic() {
            let series: Vec<SeriesResource> =
                self.get_json("series", &[], DEFAULT_DEADLINE).await?;
            for s in &series {
                let episodes: Vec<EpisodeResource> = self
                    .get_json(
                        "episode",
                        &[("seriesId", s.id.to_string())],
                        DEFAULT_DEADLINE,
                    )
                    .await?;
                library.episodes.extend(episodes);
            }
            library.series = series;
        } else {
            library.movies = self.get_json("movie", &[], DEFAULT_DEADLINE).await?;
        }

        debug!(
            series = library.series.len(),
            episodes = library.episodes.len(),
            movies = library.movies.len(),
            "enumerated upstream library"
        );
        Ok(library)
    }

    /// Enumerate content that changed after `since`.
    ///
    /// The vendor surface has no modified-since parameter, so the client
    /// enumerates and keeps series/movies added after the cutoff plus
    /// episodes that aired after it. Series rows are always returned in full
    /// so season context stays available to callers.
    pub async fn library_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<RemoteLibrary, UpstreamError> {
        let mut library = self.full_library().await?;
        library
            .episodes
            .retain(|e| e.air_date_utc.map(|t| t > since).unwrap_or(true));
        library
            .movies
            .retain(|m| m.added.map(|t| t > since).unwrap_or(true));
        Ok(library)
    }

    /// Fetch every episode of one series.
    pub async fn episodes_for_series(
        &self,
        series_id: i64,
    ) -> Result<Vec<EpisodeResource>, UpstreamError> {
        self.get_json(
            "episode",
            &[("seriesId", series_id.to_string())],
            DEFAULT_DEADLINE,
        )
        .await
    }

    /// Fetch a single episode by upstream id.
    pub async fn episode(&self, id: i64) -> Result<EpisodeResource, UpstreamError> {
        self.get_json(&format!("episode/{id}"), &[], DEFAULT_DEADLINE)
            .await
    }

    /// Fetch a single movie by upstream id.
    pub async fn movie(&self, id: i64) -> Result<MovieResource, UpstreamError> {
        self.get_json(&format!("movie/{id}"), &[], DEFAULT_DEADLINE)
            .await
    }

    /// Submit a search command; returns the upstream command id.
    pub async fn post_command(&self, command: &SearchCommand) -> Result<i64, UpstreamError> {
        let response = self
            .http
            .post(self.endpoint("command"))
            .header("X-Api-Key", &self.config.api_key)
            .timeout(DEFAULT_DEADLINE)
            .json(&command.body())
            .send()
            .await
            .map_err(UpstreamError::from_transport)?;

        let response = check_status(response).await?;
        let resource: CommandResource = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(resource.id)
    }

    pub async fn command_status(&self, id: i64) -> Result<CommandResource, UpstreamError> {
        self.get_json(&format!("command/{id}"), &[], DEFAULT_DEADLINE)
            .await
    }

    /// Drain the upstream download queue across pages.
    pub async fn queue(&self) -> Result<Vec<QueueItem>, UpstreamError> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let chunk: QueuePage = self
                .get_json(
                    "queue",
                    &[
                        ("page", page.to_string()),
                        ("pageSize", QUEUE_PAGE_SIZE.to_string()),
                    ],
                    DEFAULT_DEADLINE,
                )
                .await?;
            let total = chunk.total_records as usize;
            items.extend(chunk.records);
            if items.len() >= total || chunk.page_size == 0 {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    /// Determine the variant behind `base_url` by inspecting `appName` in
    /// the system status response. Deterministic; the caller does not need
    /// to know the variant in advance.
    pub async fn detect_kind(base_url: &str, api_key: &str) -> Result<ConnectorKind, CoreError> {
        // The probe client's own kind is irrelevant for system/status.
        let probe = UpstreamClient::new(UpstreamConfig {
            kind: ConnectorKind::Sonarr,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })?;
        let status = probe.system_status().await?;
        kind_from_app_name(&status.app_name).ok_or_else(|| {
            CoreError::InvalidConfig(format!("unrecognized upstream app: {}", status.app_name))
        })
    }
}

fn kind_from_app_name(app_name: &str) -> Option<ConnectorKind> {
    let name = app_name.to_lowercase();
    if name.contains("sonarr") {
        Some(ConnectorKind::Sonarr)
    } else if name.contains("radarr") {
        Some(ConnectorKind::Radarr)
    } else if name.contains("whisparr") {
        Some(ConnectorKind::Whisparr)
    } else {
        None
    }
}

/// Map an HTTP response status into the taxonomy, passing successes through.
async fn check_status(response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(UpstreamError::AuthFailed),
        StatusCode::NOT_FOUND => Err(UpstreamError::NotFound),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            Err(UpstreamError::RateLimited { retry_after })
        }
        // 5xx and any unexpected status both surface as a server error.
        s => {
            let message = response.text().await.unwrap_or_default();
            Err(UpstreamError::Server {
                status: s.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_app_name() {
        assert_eq!(kind_from_app_name("Sonarr"), Some(ConnectorKind::Sonarr));
        assert_eq!(kind_from_app_name("radarr"), Some(ConnectorKind::Radarr));
        assert_eq!(
            kind_from_app_name("Whisparr"),
            Some(ConnectorKind::Whisparr)
        );
        assert_eq!(kind_from_app_name("Plex"), None);
    }

    #[test]
    fn test_search_command_bodies() {
        let cmd = SearchCommand::EpisodeSearch {
            episode_ids: vec![10, 11],
        };
        let body = cmd.body();
        assert_eq!(body["name"], "EpisodeSearch");
        assert_eq!(body["episodeIds"], serde_json::json!([10, 11]));

        let cmd = SearchCommand::SeasonSearch {
            series_id: 5,
            season_number: 2,
        };
        let body = cmd.body();
        assert_eq!(body["name"], "SeasonSearch");
        assert_eq!(body["seriesId"], 5);
        assert_eq!(body["seasonNumber"], 2);

        let cmd = SearchCommand::MoviesSearch { movie_ids: vec![7] };
        assert_eq!(cmd.body()["movieIds"], serde_json::json!([7]));
    }

    #[test]
    fn test_client_rejects_bad_base_url() {
        let bad = UpstreamClient::new(UpstreamConfig {
            kind: ConnectorKind::Radarr,
            base_url: "not a url".into(),
            api_key: "k".into(),
        });
        assert!(matches!(bad, Err(CoreError::InvalidConfig(_))));

        let ftp = UpstreamClient::new(UpstreamConfig {
            kind: ConnectorKind::Radarr,
            base_url: "ftp://media.local".into(),
            api_key: "k".into(),
        });
        assert!(matches!(ftp, Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_endpoint_joins_api_base() {
        let client = UpstreamClient::new(UpstreamConfig {
            kind: ConnectorKind::Sonarr,
            base_url: "http://sonarr.local:8989/".into(),
            api_key: "k".into(),
        })
        .unwrap();
        assert_eq!(
            client.endpoint("system/status"),
            "http://sonarr.local:8989/api/v3/system/status"
        );
    }
}
