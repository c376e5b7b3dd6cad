//! Pending command tracker
//!
//! Background consumer that advances every open pending command on a fixed
//! tick: polls the upstream command endpoint, cross-checks the download
//! queue and the content's file state, and settles the registry row. Also
//! owns the 24-hour timeout sweep and retention purge, driven by the hourly
//! cleanup job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{CommandStatus, PendingCommand, SearchResolution};
use crate::context::{self, RequestContext};
use crate::db::{Connector, HealthStatus, PgStores};
use crate::error::CoreResult;
use crate::notify::{Notifier, NotifyEvent};
use crate::registry::SearchType;
use crate::secrets::SecretCipher;
use crate::settings::SettingsBridge;
use crate::upstream::{QueueItem, UpstreamClient, UpstreamError};

/// Poll cadence; the contract says at most 60 s between ticks.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Open commands older than this are force-closed as failed.
const COMMAND_TIMEOUT_HOURS: i64 = 24;

/// Closed rows are purged after this many days.
const RETENTION_DAYS: i64 = 7;

pub struct PendingCommandTracker {
    stores: Arc<PgStores>,
    settings: Arc<SettingsBridge>,
    cipher: Arc<dyn SecretCipher>,
    notifier: Arc<dyn Notifier>,
}

impl PendingCommandTracker {
    pub fn new(
        stores: Arc<PgStores>,
        settings: Arc<SettingsBridge>,
        cipher: Arc<dyn SecretCipher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            stores,
            settings,
            cipher,
            notifier,
        }
    }

    /// Tick loop; exits on shutdown. Open commands survive shutdown and are
    /// picked up again next start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("pending command tracker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let ctx = RequestContext::scheduler("pending-command-tracker");
            if let Err(e) = context::scope(ctx, self.tick()).await {
                warn!(error = %e, "tracker tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("pending command tracker stopped");
    }

    /// One pass over every connector with open commands.
    pub async fn tick(&self) -> CoreResult<()> {
        let connector_ids = self.stores.pending.connectors_with_open().await?;
        for connector_id in connector_ids {
            let Some(connector) = self.stores.connectors.get(connector_id).await? else {
                continue;
            };
            if !connector.enabled {
                continue;
            }
            if let Err(e) = self.track_connector(&connector).await {
                warn!(connector_id, error = %e, "tracking pass failed");
            }
        }
        Ok(())
    }

    async fn track_connector(&self, connector: &Connector) -> CoreResult<()> {
        let client = connector.client(self.cipher.as_ref())?;

        let queue = match client.queue().await {
            Ok(queue) => queue,
            Err(e) => {
                self.record_health_impact(connector, &e).await?;
                return Err(e.into());
            }
        };

        let open = self.stores.pending.open_for_connector(connector.id).await?;
        for command in open {
            if let Err(e) = self.advance(&client, connector, &command, &queue).await {
                warn!(
                    pending_id = command.id,
                    error = %e,
                    "failed to advance pending command"
                );
            }
        }
        Ok(())
    }

    /// Advance one pending command, settling it when the upstream command
    /// reached a terminal state and the download queue no longer holds the
    /// content.
    async fn advance(
        &self,
        client: &UpstreamClient,
        connector: &Connector,
        command: &PendingCommand,
        queue: &[QueueItem],
    ) -> CoreResult<()> {
        let status = match client.command_status(command.upstream_command_id).await {
            Ok(resource) => CommandStatus::from_upstream(&resource.status),
            // The upstream forgot the command (restart, queue prune): let
            // the content check below decide the outcome.
            Err(UpstreamError::NotFound) => CommandStatus::Failed,
            Err(e) => {
                self.record_health_impact(connector, &e).await?;
                return Err(e.into());
            }
        };

        if !status.is_terminal() {
            if status != command.command_status {
                self.stores.pending.update_status(command.id, status).await?;
            }
            return Ok(());
        }

        let Some(registry_id) = command.registry_id else {
            warn!(
                pending_id = command.id,
                "open pending command without registry row"
            );
            return self.stores.pending.close_orphaned(command.id, Utc::now()).await;
        };

        if command.is_season_pack() {
            return self.settle_season(client, connector, command, status, queue).await;
        }

        let Some(content) = self.stores.content.get(command.content_id).await? else {
            // Content row vanished (connector shrink); nothing to settle.
            self.stores
                .pending
                .resolve(
                    command.id,
                    registry_id,
                    status,
                    SearchResolution::Exhausted {
                        error: Some("content no longer mirrored".into()),
                    },
                    Utc::now(),
                )
                .await?;
            return Ok(());
        };

        // Still downloading: the command finished but the grab is in the
        // queue. Keep the pending command open.
        let in_queue = queue.iter().any(|item| {
            item.episode_id == Some(content.upstream_id) && content.kind == crate::mirror::ContentKind::Episode
                || item.movie_id == Some(content.upstream_id)
                    && content.kind == crate::mirror::ContentKind::Movie
        });
        if in_queue {
            if status != command.command_status {
                self.stores
                    .pending
                    .update_status(command.id, status)
                    .await?;
            }
            return Ok(());
        }

        // Consult the upstream file state for the verdict.
        let has_file = match content.kind {
            crate::mirror::ContentKind::Episode => match client.episode(content.upstream_id).await {
                Ok(episode) => {
                    self.stores
                        .content
                        .upsert_episode(connector.id, &episode, Utc::now())
                        .await?;
                    episode.has_file
                }
                Err(UpstreamError::NotFound) => {
                    return self.handle_content_removed(command, content.id).await;
                }
                Err(e) => {
                    self.record_health_impact(connector, &e).await?;
                    return Err(e.into());
                }
            },
            crate::mirror::ContentKind::Movie => match client.movie(content.upstream_id).await {
                Ok(movie) => {
                    self.stores
                        .content
                        .upsert_movie(connector.id, &movie, Utc::now())
                        .await?;
                    movie.has_file
                }
                Err(UpstreamError::NotFound) => {
                    return self.handle_content_removed(command, content.id).await;
                }
                Err(e) => {
                    self.record_health_impact(connector, &e).await?;
                    return Err(e.into());
                }
            },
        };

        // Upgrades count as acquired when the cutoff is satisfied now.
        let acquired = if command.search_type == SearchType::Upgrade {
            has_file && !self.cutoff_still_unmet(command.content_id).await?
        } else {
            has_file
        };

        if acquired {
            self.stores
                .pending
                .resolve(
                    command.id,
                    registry_id,
                    CommandStatus::Completed,
                    SearchResolution::Acquired,
                    Utc::now(),
                )
                .await?;
            self.notifier
                .notify(
                    NotifyEvent::SearchSuccess,
                    serde_json::json!({
                        "connector_id": connector.id,
                        "content_id": command.content_id,
                        "title": content.title,
                        "search_type": command.search_type.as_str(),
                    }),
                )
                .await;
            return Ok(());
        }

        let error = match status {
            CommandStatus::Failed => Some("upstream command failed".to_string()),
            _ => Some("search completed without results".to_string()),
        };
        self.settle_attempt(connector.id, command, status, error)
            .await
    }

    /// Settle a season-pack command: refresh the season's episodes from
    /// upstream, then settle every sibling searching row. The pending
    /// command itself closes with the representative row's outcome.
    async fn settle_season(
        &self,
        client: &UpstreamClient,
        connector: &Connector,
        command: &PendingCommand,
        status: CommandStatus,
        queue: &[QueueItem],
    ) -> CoreResult<()> {
        let series_id = command
            .series_upstream_id
            .ok_or_else(|| crate::error::CoreError::Invariant("season pack without series".into()))?;
        let season_number = command
            .season_number
            .ok_or_else(|| crate::error::CoreError::Invariant("season pack without season".into()))?;

        let episodes = match client.episodes_for_series(series_id).await {
            Ok(episodes) => episodes,
            Err(UpstreamError::NotFound) => {
                // Series gone upstream; the representative content row's
                // removal cascades the command away.
                return self.handle_content_removed(command, command.content_id).await;
            }
            Err(e) => {
                self.record_health_impact(connector, &e).await?;
                return Err(e.into());
            }
        };
        let now = Utc::now();
        for episode in episodes.iter().filter(|e| e.season_number == season_number) {
            self.stores
                .content
                .upsert_episode(connector.id, episode, now)
                .await?;
        }

        // A grab from the pack still downloading keeps the command open.
        let season_episode_ids: Vec<i64> = episodes
            .iter()
            .filter(|e| e.season_number == season_number)
            .map(|e| e.id)
            .collect();
        let downloading = queue
            .iter()
            .any(|item| item.episode_id.map(|id| season_episode_ids.contains(&id)).unwrap_or(false));
        if downloading {
            if status != command.command_status {
                self.stores.pending.update_status(command.id, status).await?;
            }
            return Ok(());
        }

        let cooldown = self.settings.cooldown_config().await?;
        let siblings = self
            .stores
            .registry
            .searching_for_season(connector.id, series_id, season_number)
            .await?;

        for sibling in siblings {
            let acquired = self
                .stores
                .content
                .get(sibling.content_id)
                .await?
                .map(|c| c.has_file)
                .unwrap_or(false);

            if Some(sibling.id) == command.registry_id {
                // Representative: settle through the pending command.
                if acquired {
                    self.stores
                        .pending
                        .resolve(
                            command.id,
                            sibling.id,
                            CommandStatus::Completed,
                            SearchResolution::Acquired,
                            now,
                        )
                        .await?;
                } else {
                    self.settle_attempt(
                        connector.id,
                        command,
                        status,
                        Some("season search completed without results".into()),
                    )
                    .await?;
                }
                continue;
            }

            // Sibling rows carry no pending command of their own.
            if acquired {
                self.stores.registry.delete(sibling.id).await?;
            } else {
                let attempts_after = sibling.attempt_count.max(0) as u32 + 1;
                if cooldown.attempts_exhausted(attempts_after) {
                    self.stores
                        .registry
                        .record_attempt_exhausted(sibling.id, Some("season search found nothing"))
                        .await?;
                } else {
                    let delay = cooldown.delay_for_attempt(attempts_after);
                    self.stores
                        .registry
                        .record_attempt_cooldown(
                            sibling.id,
                            now + delay,
                            Some("season search found nothing"),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn cutoff_still_unmet(&self, content_id: i64) -> CoreResult<bool> {
        Ok(self
            .stores
            .content
            .get(content_id)
            .await?
            .map(|c| c.quality_cutoff_not_met)
            .unwrap_or(false))
    }

    async fn handle_content_removed(
        &self,
        command: &PendingCommand,
        content_id: i64,
    ) -> CoreResult<()> {
        // Upstream removed the content: drop the mirror row; registry rows
        // and this pending command cascade with it.
        debug!(
            content_id,
            pending_id = command.id,
            "upstream removed content; dropping mirror row"
        );
        self.stores.content.delete(content_id).await?;
        Ok(())
    }

    /// Count a failed attempt: cooldown, or exhausted past the budget.
    async fn settle_attempt(
        &self,
        connector_id: i64,
        command: &PendingCommand,
        status: CommandStatus,
        error: Option<String>,
    ) -> CoreResult<()> {
        let Some(registry_id) = command.registry_id else {
            return self.stores.pending.close_orphaned(command.id, Utc::now()).await;
        };
        let cooldown = self.settings.cooldown_config().await?;
        let entry = self.stores.registry.get(registry_id).await?;
        let attempts_after = entry.map(|e| e.attempt_count.max(0) as u32 + 1).unwrap_or(1);

        let resolution = if cooldown.attempts_exhausted(attempts_after) {
            self.notifier
                .notify(
                    NotifyEvent::SearchExhausted,
                    serde_json::json!({
                        "connector_id": connector_id,
                        "content_id": command.content_id,
                        "attempts": attempts_after,
                    }),
                )
                .await;
            SearchResolution::Exhausted { error }
        } else {
            let delay = cooldown.delay_for_attempt(attempts_after);
            SearchResolution::Retry {
                next_eligible_at: Utc::now() + delay,
                error,
            }
        };

        self.stores
            .pending
            .resolve(command.id, registry_id, status, resolution, Utc::now())
            .await
    }

    async fn record_health_impact(
        &self,
        connector: &Connector,
        error: &UpstreamError,
    ) -> CoreResult<()> {
        if let Some(status) = HealthStatus::from_error(error) {
            let changed = self
                .stores
                .connectors
                .set_health(connector.id, status, Utc::now())
                .await?;
            if changed {
                self.notifier
                    .notify(
                        NotifyEvent::ConnectorHealthChanged,
                        serde_json::json!({
                            "connector_id": connector.id,
                            "name": connector.name,
                            "status": status.as_str(),
                        }),
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Force-close open commands older than 24 h as failed; the registry
    /// row returns to cooldown with the timeout counted as an attempt.
    /// Also purges closed rows past retention. Driven by the hourly
    /// cleanup job.
    pub async fn cleanup_timeouts(&self) -> CoreResult<()> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::hours(COMMAND_TIMEOUT_HOURS);

        let stale = self.stores.pending.timed_out(cutoff).await?;
        for command in stale {
            warn!(
                pending_id = command.id,
                dispatched_at = %command.dispatched_at,
                "pending command timed out"
            );
            self.settle_attempt(
                command.connector_id,
                &command,
                CommandStatus::Failed,
                Some("timed out after 24h".to_string()),
            )
            .await?;
        }

        let purged = self
            .stores
            .pending
            .purge_completed_before(now - chrono::Duration::days(RETENTION_DAYS))
            .await?;
        if purged > 0 {
            debug!(purged, "purged completed pending commands");
        }
        Ok(())
    }
}
