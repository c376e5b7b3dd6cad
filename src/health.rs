//! Health report
//!
//! Read-only contract exposed to the HTTP surface: overall status, database
//! reachability and latency, per-connector health, registry queue depth,
//! and the paused-connector count.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;

use crate::db::PgStores;
use crate::throttle::ThrottleGovernor;

/// Overall service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    /// Database reachable but at least one connector is not healthy.
    Degraded,
    /// Database unreachable.
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub reachable: bool,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorHealth {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub status: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub database: DatabaseHealth,
    pub connectors: Vec<ConnectorHealth>,
    /// Open registry rows awaiting work.
    pub queue_depth: i64,
    pub paused_connectors: usize,
}

pub struct HealthService {
    pool: PgPool,
    stores: Arc<PgStores>,
    governor: Arc<ThrottleGovernor>,
}

impl HealthService {
    pub fn new(pool: PgPool, stores: Arc<PgStores>, governor: Arc<ThrottleGovernor>) -> Self {
        Self {
            pool,
            stores,
            governor,
        }
    }

    pub async fn report(&self) -> HealthReport {
        let started = Instant::now();
        let reachable = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();
        let latency_ms = reachable.then(|| started.elapsed().as_millis() as i64);

        if !reachable {
            return HealthReport {
                status: OverallStatus::Unhealthy,
                database: DatabaseHealth {
                    reachable: false,
                    latency_ms: None,
                },
                connectors: Vec::new(),
                queue_depth: 0,
                paused_connectors: 0,
            };
        }

        let connectors = self
            .stores
            .connectors
            .list()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|c| ConnectorHealth {
                id: c.id,
                name: c.name,
                kind: c.kind.as_str().to_string(),
                status: c.health_status.as_str().to_string(),
                enabled: c.enabled,
            })
            .collect::<Vec<_>>();

        let any_unhealthy = connectors
            .iter()
            .any(|c| c.enabled && c.status != "healthy");
        let queue_depth = self.stores.registry.open_row_count().await.unwrap_or(0);
        let paused_connectors = self.governor.paused_count(Utc::now());

        HealthReport {
            status: if any_unhealthy {
                OverallStatus::Degraded
            } else {
                OverallStatus::Healthy
            },
            database: DatabaseHealth {
                reachable: true,
                latency_ms,
            },
            connectors,
            queue_depth,
            paused_connectors,
        }
    }
}
