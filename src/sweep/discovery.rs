//! Discovery / sync
//!
//! Reconciles one connector's upstream library into the local mirror and
//! materializes registry rows for every gap and upgrade candidate that does
//! not have one yet.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::SweepKind;
use crate::db::{Connector, PgStores};
use crate::error::CoreResult;
use crate::registry::SearchType;
use crate::upstream::UpstreamClient;

/// What one sync pass touched.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncCounts {
    pub items_synced: i32,
    pub gaps_found: i32,
    pub upgrades_found: i32,
    pub deleted: i64,
}

/// Sync one connector's library into the mirror and emit registry rows.
///
/// `sweep_started_at` doubles as the last-seen stamp: a full reconciliation
/// deletes every row not re-stamped during this pass.
pub async fn sync_connector(
    stores: &PgStores,
    client: &UpstreamClient,
    connector: &Connector,
    kind: SweepKind,
    sweep_started_at: DateTime<Utc>,
) -> CoreResult<SyncCounts> {
    let library = match kind {
        SweepKind::Incremental => {
            // A connector that has never synced gets the full enumeration.
            let since = connector.last_synced_at.unwrap_or(DateTime::UNIX_EPOCH);
            client.library_since(since).await?
        }
        SweepKind::FullReconciliation => client.full_library().await?,
    };

    let mut counts = SyncCounts::default();

    for series in &library.series {
        stores
            .content
            .upsert_series(connector.id, series, sweep_started_at)
            .await?;
    }
    for episode in &library.episodes {
        stores
            .content
            .upsert_episode(connector.id, episode, sweep_started_at)
            .await?;
        counts.items_synced += 1;
    }
    for movie in &library.movies {
        stores
            .content
            .upsert_movie(connector.id, movie, sweep_started_at)
            .await?;
        counts.items_synced += 1;
    }

    if kind == SweepKind::FullReconciliation {
        counts.deleted = stores
            .content
            .delete_absent(connector.id, sweep_started_at)
            .await? as i64;
        if counts.deleted > 0 {
            debug!(
                connector_id = connector.id,
                deleted = counts.deleted,
                "removed content absent upstream"
            );
        }
    }

    // Diff against the mirror: a gap or upgrade gets a registry row the
    // first time it appears; existing rows are left untouched.
    for item in stores.content.gaps(connector.id).await? {
        if stores
            .registry
            .ensure(connector.id, item.id, SearchType::Gap)
            .await?
        {
            counts.gaps_found += 1;
        }
    }
    for item in stores.content.upgrade_candidates(connector.id).await? {
        if stores
            .registry
            .ensure(connector.id, item.id, SearchType::Upgrade)
            .await?
        {
            counts.upgrades_found += 1;
        }
    }

    stores
        .connectors
        .set_last_synced(connector.id, sweep_started_at)
        .await?;

    info!(
        connector_id = connector.id,
        kind = %kind,
        items = counts.items_synced,
        new_gaps = counts.gaps_found,
        new_upgrades = counts.upgrades_found,
        "sync completed"
    );
    Ok(counts)
}
