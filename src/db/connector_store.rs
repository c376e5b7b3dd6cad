//! Connector persistence
//!
//! Connectors are owned exclusively by the core. Uniqueness of
//! `(kind, name)` and of `base_url` is enforced by DB constraints; deletes
//! cascade to the mirror, registry, pending commands, and snapshots via
//! foreign keys.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use url::Url;

use crate::error::{CoreError, CoreResult};
use crate::upstream::ConnectorKind;

/// Connector liveness as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Offline,
    Unknown,
}

impl HealthStatus {
    /// The health transition an upstream failure implies, if any. Auth
    /// failures mark a connector unhealthy; connection-level failures mark
    /// it offline. Timeouts and 5xx stay transient.
    pub fn from_error(err: &crate::upstream::UpstreamError) -> Option<Self> {
        use crate::upstream::UpstreamError;
        match err {
            UpstreamError::AuthFailed => Some(Self::Unhealthy),
            UpstreamError::Network { .. } => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the reconnect supervisor should be probing this connector.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, Self::Unhealthy | Self::Offline)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for HealthStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "healthy" => Ok(Self::Healthy),
            "unhealthy" => Ok(Self::Unhealthy),
            "offline" => Ok(Self::Offline),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("unknown health status: {s}")),
        }
    }
}

/// One upstream service under management.
#[derive(Debug, Clone, FromRow)]
pub struct Connector {
    pub id: i64,
    #[sqlx(try_from = "String")]
    pub kind: ConnectorKind,
    pub name: String,
    pub base_url: String,
    pub api_key_cipher: String,
    pub enabled: bool,
    #[sqlx(try_from = "String")]
    pub health_status: HealthStatus,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub throttle_profile_id: Option<i64>,
    /// High-water mark for incremental sweeps.
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Connector {
    /// Build the typed client for this connector, opening the stored API
    /// key through the cipher seam.
    pub fn client(
        &self,
        cipher: &dyn crate::secrets::SecretCipher,
    ) -> CoreResult<crate::upstream::UpstreamClient> {
        let api_key = cipher.decrypt(&self.api_key_cipher)?;
        crate::upstream::UpstreamClient::new(crate::upstream::UpstreamConfig {
            kind: self.kind,
            base_url: self.base_url.clone(),
            api_key,
        })
    }
}

/// Creation payload.
#[derive(Debug, Clone)]
pub struct NewConnector {
    pub kind: ConnectorKind,
    pub name: String,
    pub base_url: String,
    pub api_key_cipher: String,
    pub enabled: bool,
    pub throttle_profile_id: Option<i64>,
}

impl NewConnector {
    fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidConfig("connector name is empty".into()));
        }
        let url = Url::parse(&self.base_url)
            .map_err(|e| CoreError::InvalidConfig(format!("invalid base url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::InvalidConfig(format!(
                "base url must be http(s): {}",
                self.base_url
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgConnectorStore {
    pool: PgPool,
}

impl PgConnectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewConnector) -> CoreResult<Connector> {
        new.validate()?;
        let connector = sqlx::query_as::<_, Connector>(
            r#"
            INSERT INTO connectors (kind, name, base_url, api_key_cipher, enabled, throttle_profile_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(new.kind.as_str())
        .bind(new.name.trim())
        .bind(new.base_url.trim_end_matches('/'))
        .bind(&new.api_key_cipher)
        .bind(new.enabled)
        .bind(new.throttle_profile_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(connector)
    }

    pub async fn get(&self, id: i64) -> CoreResult<Option<Connector>> {
        let connector = sqlx::query_as::<_, Connector>("SELECT * FROM connectors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(connector)
    }

    pub async fn list(&self) -> CoreResult<Vec<Connector>> {
        let connectors =
            sqlx::query_as::<_, Connector>("SELECT * FROM connectors ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(connectors)
    }

    pub async fn list_enabled(&self) -> CoreResult<Vec<Connector>> {
        let connectors = sqlx::query_as::<_, Connector>(
            "SELECT * FROM connectors WHERE enabled ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(connectors)
    }

    pub async fn update(
        &self,
        id: i64,
        name: &str,
        base_url: &str,
        api_key_cipher: &str,
        enabled: bool,
        throttle_profile_id: Option<i64>,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE connectors
            SET name = $2, base_url = $3, api_key_cipher = $4, enabled = $5,
                throttle_profile_id = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(name.trim())
        .bind(base_url.trim_end_matches('/'))
        .bind(api_key_cipher)
        .bind(enabled)
        .bind(throttle_profile_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Cascades to mirror, registry, pending commands, and snapshots.
    pub async fn delete(&self, id: i64) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM connectors WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record a health observation. Returns `true` when the status actually
    /// changed — callers notify once per transition, not per probe.
    pub async fn set_health(
        &self,
        id: i64,
        status: HealthStatus,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        sqlx::query("UPDATE connectors SET last_health_check_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            "UPDATE connectors SET health_status = $2 WHERE id = $1 AND health_status <> $2",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Advance the incremental-sweep high-water mark.
    pub async fn set_last_synced(&self, id: i64, at: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query("UPDATE connectors SET last_synced_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Connectors the reconnect supervisor should consider.
    pub async fn list_needing_reconnect(&self) -> CoreResult<Vec<Connector>> {
        let connectors = sqlx::query_as::<_, Connector>(
            r#"
            SELECT * FROM connectors
            WHERE enabled AND health_status IN ('unhealthy', 'offline')
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(connectors)
    }

    pub async fn unhealthy_count(&self) -> CoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM connectors WHERE enabled AND health_status <> 'healthy'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
