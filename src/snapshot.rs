//! Completion snapshot capture
//!
//! Hourly trend capture of per-connector completion, pruned after the
//! retention window. Drives the dashboard trend display and nothing else.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::db::{snapshot_store::RETENTION_DAYS, PgStores};
use crate::error::CoreResult;

pub struct SnapshotService {
    stores: Arc<PgStores>,
}

impl SnapshotService {
    pub fn new(stores: Arc<PgStores>) -> Self {
        Self { stores }
    }

    /// Capture one snapshot per enabled connector.
    pub async fn capture_all(&self) -> CoreResult<()> {
        let now = Utc::now();
        for connector in self.stores.connectors.list_enabled().await? {
            let counts = self.stores.content.completion_counts(connector.id).await?;
            self.stores
                .snapshots
                .insert(
                    connector.id,
                    now,
                    counts.monitored_count,
                    counts.downloaded_count,
                    counts.percent_bps(),
                )
                .await?;
        }
        Ok(())
    }

    /// Drop snapshots past retention. Driven by the daily prune job.
    pub async fn prune(&self) -> CoreResult<()> {
        let cutoff = Utc::now() - chrono::Duration::days(RETENTION_DAYS);
        let pruned = self.stores.snapshots.prune_before(cutoff).await?;
        if pruned > 0 {
            debug!(pruned, "pruned completion snapshots");
        }
        Ok(())
    }
}
