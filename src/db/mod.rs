//! Database connection and store aggregate
//!
//! Connection management plus one store per entity. Construction follows a
//! single-pool, many-cheap-handles shape: every store clones the pool.

pub mod activity_store;
pub mod connector_store;
pub mod schedule_store;
pub mod snapshot_store;
pub mod throttle_store;

pub use activity_store::{PgActivityStore, SweepOutcome, SyncActivity};
pub use connector_store::{Connector, HealthStatus, NewConnector, PgConnectorStore};
pub use schedule_store::{NewSchedule, PgScheduleStore, Schedule};
pub use snapshot_store::{CompletionSnapshot, PgSnapshotStore};
pub use throttle_store::{PgThrottleProfileStore, PgThrottleStateStore};

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::CoreResult;
use crate::mirror::PgContentStore;
use crate::pending::PgPendingCommandStore;
use crate::registry::PgRegistryStore;
use crate::settings::PgSettingsStore;

/// Connection configuration, read from the environment by the binary.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("COMRADARR_DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/comradarr".to_string()),
            max_connections: std::env::var("COMRADARR_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Connect and run embedded migrations.
pub async fn connect(config: &DatabaseConfig) -> CoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connection_timeout)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;

    info!("database connected and migrated");
    Ok(pool)
}

/// Every store, constructed from a single pool.
pub struct PgStores {
    pub connectors: PgConnectorStore,
    pub schedules: PgScheduleStore,
    pub content: PgContentStore,
    pub registry: PgRegistryStore,
    pub pending: PgPendingCommandStore,
    pub activity: PgActivityStore,
    pub snapshots: PgSnapshotStore,
    pub throttle_profiles: PgThrottleProfileStore,
    pub throttle_states: PgThrottleStateStore,
    pub settings: PgSettingsStore,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            connectors: PgConnectorStore::new(pool.clone()),
            schedules: PgScheduleStore::new(pool.clone()),
            content: PgContentStore::new(pool.clone()),
            registry: PgRegistryStore::new(pool.clone()),
            pending: PgPendingCommandStore::new(pool.clone()),
            activity: PgActivityStore::new(pool.clone()),
            snapshots: PgSnapshotStore::new(pool.clone()),
            throttle_profiles: PgThrottleProfileStore::new(pool.clone()),
            throttle_states: PgThrottleStateStore::new(pool.clone()),
            settings: PgSettingsStore::new(pool),
        }
    }
}
