//! Sweep runner
//!
//! Executes one sweep: discovery over the target connectors, then the
//! dispatch phase — pick eligible registry rows in priority order, pass
//! each through the throttle governor, batch season packs, post commands,
//! and record pending commands. Stops early on a governor pause and yields
//! between rows on cancellation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::discovery::{sync_connector, SyncCounts};
use super::SweepKind;
use crate::batcher::{determine_batching, BatchDecision, SeasonPackThresholds, SeasonStats};
use crate::context;
use crate::db::{Connector, HealthStatus, PgStores, Schedule, SweepOutcome};
use crate::error::{CoreError, CoreResult};
use crate::mirror::{ContentItem, ContentKind};
use crate::notify::{Notifier, NotifyEvent};
use crate::registry::{priority, CooldownConfig, PriorityInput, RegistryEntry, SearchType};
use crate::secrets::SecretCipher;
use crate::settings::SettingsBridge;
use crate::throttle::{Admission, ThrottleGovernor, ThrottleProfile};
use crate::upstream::{SearchCommand, UpstreamClient, UpstreamError};

/// What a finished sweep reports back to the orchestrator and the activity
/// log.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub items_synced: i32,
    pub gaps_found: i32,
    pub upgrades_found: i32,
    pub commands_dispatched: i32,
    pub paused: bool,
    pub failed: bool,
    pub notes: Vec<String>,
}

impl SweepReport {
    fn outcome(&self) -> SweepOutcome {
        if self.failed {
            SweepOutcome::Failed
        } else if self.paused {
            SweepOutcome::Paused
        } else {
            SweepOutcome::Completed
        }
    }

    fn absorb_sync(&mut self, counts: &SyncCounts) {
        self.items_synced += counts.items_synced;
        self.gaps_found += counts.gaps_found;
        self.upgrades_found += counts.upgrades_found;
    }
}

/// Outcome of attempting to dispatch one row (or one season group).
enum RowOutcome {
    Dispatched,
    Skipped,
    /// Stop the dispatch phase for this connector.
    Stop(String),
}

pub struct SweepRunner {
    stores: Arc<PgStores>,
    governor: Arc<ThrottleGovernor>,
    settings: Arc<SettingsBridge>,
    cipher: Arc<dyn SecretCipher>,
    notifier: Arc<dyn Notifier>,
}

impl SweepRunner {
    pub fn new(
        stores: Arc<PgStores>,
        governor: Arc<ThrottleGovernor>,
        settings: Arc<SettingsBridge>,
        cipher: Arc<dyn SecretCipher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            stores,
            governor,
            settings,
            cipher,
            notifier,
        }
    }

    /// Run a scheduled sweep.
    pub async fn run_schedule(
        &self,
        schedule: &Schedule,
        cancel: watch::Receiver<bool>,
    ) -> CoreResult<SweepReport> {
        self.run_sweep(
            schedule.sweep_kind,
            schedule.connector_id,
            schedule.throttle_profile_id,
            cancel,
        )
        .await
    }

    /// Run a sweep over one connector, or over every enabled connector
    /// when `connector_id` is `None`. Also the entry point for manual
    /// sweeps from the HTTP surface.
    pub async fn run_sweep(
        &self,
        kind: SweepKind,
        connector_id: Option<i64>,
        profile_override: Option<i64>,
        cancel: watch::Receiver<bool>,
    ) -> CoreResult<SweepReport> {
        let started_at = Utc::now();
        let ctx = context::current();
        let activity_id = self
            .stores
            .activity
            .begin(connector_id, kind.as_str(), started_at, ctx.correlation_id)
            .await?;

        self.notifier
            .notify(
                NotifyEvent::SweepStarted,
                serde_json::json!({
                    "sweep_kind": kind.as_str(),
                    "connector_id": connector_id,
                    "correlation_id": ctx.correlation_id,
                }),
            )
            .await;

        let targets: Vec<Connector> = match connector_id {
            Some(id) => self
                .stores
                .connectors
                .get(id)
                .await?
                .into_iter()
                .collect(),
            None => self.stores.connectors.list_enabled().await?,
        };

        let mut report = SweepReport::default();
        if targets.is_empty() {
            report
                .notes
                .push("no enabled connectors to sweep".to_string());
        }

        for connector in &targets {
            if *cancel.borrow() {
                report.notes.push("cancelled".to_string());
                break;
            }
            if !connector.enabled {
                continue;
            }
            // Unhealthy connectors are skipped, not failed — but the skip
            // is surfaced in the activity note rather than silently.
            if connector.health_status.needs_reconnect() {
                report.notes.push(format!(
                    "skipped {} ({})",
                    connector.name, connector.health_status
                ));
                continue;
            }

            self.sweep_connector(connector, kind, profile_override, &cancel, &mut report)
                .await?;
        }

        let finished_at = Utc::now();
        let note = if report.notes.is_empty() {
            None
        } else {
            Some(report.notes.join("; "))
        };
        self.stores
            .activity
            .finish(
                activity_id,
                finished_at,
                report.items_synced,
                report.gaps_found,
                report.upgrades_found,
                report.commands_dispatched,
                report.outcome(),
                None,
                note.as_deref(),
            )
            .await?;

        self.notifier
            .notify(
                NotifyEvent::SweepCompleted,
                serde_json::json!({
                    "sweep_kind": kind.as_str(),
                    "connector_id": connector_id,
                    "outcome": report.outcome().as_str(),
                    "items_synced": report.items_synced,
                    "commands_dispatched": report.commands_dispatched,
                    "duration_ms": (finished_at - started_at).num_milliseconds(),
                }),
            )
            .await;

        info!(
            outcome = %report.outcome(),
            dispatched = report.commands_dispatched,
            "sweep finished"
        );
        Ok(report)
    }

    /// Sync + dispatch for one connector. Upstream failures are absorbed
    /// into the report; only persistence failures propagate.
    async fn sweep_connector(
        &self,
        connector: &Connector,
        kind: SweepKind,
        profile_override: Option<i64>,
        cancel: &watch::Receiver<bool>,
        report: &mut SweepReport,
    ) -> CoreResult<()> {
        let client = match connector.client(self.cipher.as_ref()) {
            Ok(client) => client,
            Err(e) => {
                report.failed = true;
                report
                    .notes
                    .push(format!("{}: {e}", connector.name));
                return Ok(());
            }
        };

        let sync_started_at = Utc::now();
        match sync_connector(&self.stores, &client, connector, kind, sync_started_at).await {
            Ok(counts) => {
                report.absorb_sync(&counts);
                self.notifier
                    .notify(
                        NotifyEvent::SyncCompleted,
                        serde_json::json!({
                            "connector_id": connector.id,
                            "items_synced": counts.items_synced,
                            "new_gaps": counts.gaps_found,
                            "new_upgrades": counts.upgrades_found,
                        }),
                    )
                    .await;
            }
            Err(e) => {
                if let CoreError::Upstream(upstream) = &e {
                    self.record_health_impact(connector, upstream).await?;
                }
                warn!(connector_id = connector.id, error = %e, "sync failed");
                report.failed = true;
                report
                    .notes
                    .push(format!("{}: sync failed: {e}", connector.name));
                self.notifier
                    .notify(
                        NotifyEvent::SyncFailed,
                        serde_json::json!({
                            "connector_id": connector.id,
                            "error": e.to_string(),
                        }),
                    )
                    .await;
                return Ok(());
            }
        }

        self.dispatch_connector(connector, &client, profile_override, cancel, report)
            .await
    }

    /// The dispatch phase for one connector.
    async fn dispatch_connector(
        &self,
        connector: &Connector,
        client: &UpstreamClient,
        profile_override: Option<i64>,
        cancel: &watch::Receiver<bool>,
        report: &mut SweepReport,
    ) -> CoreResult<()> {
        let now = Utc::now();
        let profile = self.resolve_profile(connector, profile_override).await?;
        self.governor.begin_sweep(connector.id);

        self.stores.registry.promote_elapsed_cooldowns(now).await?;
        let rows = self.stores.registry.eligible(&[connector.id], now).await?;
        if rows.is_empty() {
            return Ok(());
        }

        let weights = self.settings.priority_weights().await?;
        let cooldown = self.settings.cooldown_config().await?;
        let thresholds = self.settings.season_pack_thresholds().await?;

        let content_ids: Vec<i64> = rows.iter().map(|r| r.content_id).collect();
        let contents: HashMap<i64, ContentItem> = self
            .stores
            .content
            .get_many(&content_ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        // Priority is recomputed at selection time; ties break on
        // created_at then id.
        let mut scored: Vec<(u8, RegistryEntry)> = rows
            .into_iter()
            .map(|entry| {
                let first_missing_at = contents
                    .get(&entry.content_id)
                    .and_then(|c| c.first_missing_at);
                let input =
                    PriorityInput::from_entry(&entry, first_missing_at, cooldown.max_attempts);
                (priority::score(&input, &weights, now), entry)
            })
            .collect();
        scored.sort_by(|a, b| {
            priority::dispatch_order(
                (a.0, a.1.created_at, a.1.id),
                (b.0, b.1.created_at, b.1.id),
            )
        });

        let score_updates: Vec<(i64, i32)> =
            scored.iter().map(|(s, e)| (e.id, *s as i32)).collect();
        self.stores.registry.update_priorities(&score_updates).await?;

        let mut handled: HashSet<i64> = HashSet::new();
        for index in 0..scored.len() {
            // Cancellation finishes the current row, not the whole batch.
            if *cancel.borrow() {
                report.notes.push("cancelled".to_string());
                break;
            }
            let entry = &scored[index].1;
            if handled.contains(&entry.id) {
                continue;
            }

            let Some(content) = contents.get(&entry.content_id).cloned() else {
                // Mirror row vanished under us; the intent is moot.
                self.stores.registry.delete(entry.id).await?;
                handled.insert(entry.id);
                continue;
            };

            // One open pending command per content item, across sweeps.
            if self.stores.pending.has_open_for_content(entry.content_id).await? {
                handled.insert(entry.id);
                continue;
            }

            match self.governor.admit(connector.id, &profile) {
                Admission::Allow => {}
                Admission::Defer { retry_after } => {
                    self.stores
                        .registry
                        .defer(entry.id, Utc::now() + retry_after)
                        .await?;
                    handled.insert(entry.id);
                    continue;
                }
                Admission::PausedUntil { until, reason } => {
                    report.paused = true;
                    report.notes.push(format!(
                        "{}: paused until {until} ({reason})",
                        connector.name
                    ));
                    break;
                }
            }

            let outcome = self
                .dispatch_row(
                    connector,
                    client,
                    &scored,
                    index,
                    &content,
                    &contents,
                    &thresholds,
                    &cooldown,
                    &profile,
                    &mut handled,
                )
                .await?;
            match outcome {
                RowOutcome::Dispatched => report.commands_dispatched += 1,
                RowOutcome::Skipped => {}
                RowOutcome::Stop(note) => {
                    report.paused = true;
                    report.notes.push(format!("{}: {note}", connector.name));
                    break;
                }
            }
        }
        Ok(())
    }

    /// Dispatch one row, folding season peers when the batcher says so.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_row(
        &self,
        connector: &Connector,
        client: &UpstreamClient,
        scored: &[(u8, RegistryEntry)],
        index: usize,
        content: &ContentItem,
        contents: &HashMap<i64, ContentItem>,
        thresholds: &SeasonPackThresholds,
        cooldown: &CooldownConfig,
        profile: &ThrottleProfile,
        handled: &mut HashSet<i64>,
    ) -> CoreResult<RowOutcome> {
        let entry = &scored[index].1;
        handled.insert(entry.id);

        match content.kind {
            ContentKind::Movie => {
                let command = SearchCommand::MoviesSearch {
                    movie_ids: vec![content.upstream_id],
                };
                self.dispatch_single(connector, client, entry, content, command, cooldown, profile)
                    .await
            }
            ContentKind::Episode => {
                let (Some(series_id), Some(season_number)) =
                    (content.series_upstream_id, content.season_number)
                else {
                    return Err(CoreError::Invariant(format!(
                        "episode content {} without series context",
                        content.id
                    )));
                };

                // Only gap searches fold into season packs; upgrades stay
                // per-episode.
                let decision = if entry.search_type == SearchType::Gap {
                    self.season_decision(connector, series_id, season_number, thresholds)
                        .await?
                } else {
                    BatchDecision::EpisodeSearches
                };

                match decision {
                    BatchDecision::EpisodeSearches => {
                        let command = SearchCommand::EpisodeSearch {
                            episode_ids: vec![content.upstream_id],
                        };
                        self.dispatch_single(
                            connector, client, entry, content, command, cooldown, profile,
                        )
                        .await
                    }
                    BatchDecision::SeasonSearch => {
                        self.dispatch_season_group(
                            connector,
                            client,
                            scored,
                            entry,
                            content,
                            contents,
                            series_id,
                            season_number,
                            cooldown,
                            profile,
                            handled,
                        )
                        .await
                    }
                }
            }
        }
    }

    async fn dispatch_single(
        &self,
        connector: &Connector,
        client: &UpstreamClient,
        entry: &RegistryEntry,
        content: &ContentItem,
        command: SearchCommand,
        cooldown: &CooldownConfig,
        profile: &ThrottleProfile,
    ) -> CoreResult<RowOutcome> {
        if !self.stores.registry.mark_queued(entry.id).await? {
            // Another sweep took the row first.
            return Ok(RowOutcome::Skipped);
        }

        match client.post_command(&command).await {
            Ok(command_id) => {
                let dispatched = self
                    .stores
                    .registry
                    .dispatch(
                        entry.id,
                        connector.id,
                        content.id,
                        entry.search_type,
                        command_id,
                    )
                    .await?;
                if dispatched.is_none() {
                    warn!(
                        registry_id = entry.id,
                        upstream_command_id = command_id,
                        "lost dispatch race after posting command"
                    );
                    return Ok(RowOutcome::Skipped);
                }
                Ok(RowOutcome::Dispatched)
            }
            Err(e) => {
                self.handle_dispatch_error(connector, &[entry], content, e, cooldown, profile)
                    .await
            }
        }
    }

    /// Fold every eligible gap row of the season into one SeasonSearch.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_season_group(
        &self,
        connector: &Connector,
        client: &UpstreamClient,
        scored: &[(u8, RegistryEntry)],
        representative: &RegistryEntry,
        content: &ContentItem,
        contents: &HashMap<i64, ContentItem>,
        series_id: i64,
        season_number: i32,
        cooldown: &CooldownConfig,
        profile: &ThrottleProfile,
        handled: &mut HashSet<i64>,
    ) -> CoreResult<RowOutcome> {
        let mut group: Vec<&RegistryEntry> = vec![representative];
        for (_, peer) in scored {
            if peer.id == representative.id || handled.contains(&peer.id) {
                continue;
            }
            if peer.search_type != SearchType::Gap {
                continue;
            }
            let same_season = contents
                .get(&peer.content_id)
                .map(|c| {
                    c.series_upstream_id == Some(series_id)
                        && c.season_number == Some(season_number)
                })
                .unwrap_or(false);
            if same_season {
                handled.insert(peer.id);
                group.push(peer);
            }
        }

        let mut queued_ids = Vec::with_capacity(group.len());
        for peer in &group {
            if self.stores.registry.mark_queued(peer.id).await? {
                queued_ids.push(peer.id);
            }
        }
        if queued_ids.is_empty() {
            return Ok(RowOutcome::Skipped);
        }
        // The pending command must reference a row we actually own; if the
        // representative was taken by another sweep, roll the peers back.
        if !queued_ids.contains(&representative.id) {
            for id in &queued_ids {
                self.stores
                    .registry
                    .transition(
                        *id,
                        crate::registry::SearchState::Queued,
                        crate::registry::SearchState::Pending,
                    )
                    .await?;
            }
            return Ok(RowOutcome::Skipped);
        }

        let command = SearchCommand::SeasonSearch {
            series_id,
            season_number,
        };
        match client.post_command(&command).await {
            Ok(command_id) => {
                let dispatched = self
                    .stores
                    .registry
                    .dispatch_season(
                        representative.id,
                        &queued_ids,
                        connector.id,
                        content.id,
                        series_id,
                        season_number,
                        command_id,
                    )
                    .await?;
                if dispatched.is_none() {
                    warn!(
                        registry_id = representative.id,
                        "lost season dispatch race after posting command"
                    );
                    return Ok(RowOutcome::Skipped);
                }
                Ok(RowOutcome::Dispatched)
            }
            Err(e) => {
                let rows: Vec<&RegistryEntry> = group
                    .iter()
                    .filter(|peer| queued_ids.contains(&peer.id))
                    .copied()
                    .collect();
                self.handle_dispatch_error(connector, &rows, content, e, cooldown, profile)
                    .await
            }
        }
    }

    /// React to a failed command post according to the error taxonomy. The
    /// affected rows are still `queued` and are rolled back here.
    async fn handle_dispatch_error(
        &self,
        connector: &Connector,
        rows: &[&RegistryEntry],
        content: &ContentItem,
        error: UpstreamError,
        cooldown: &CooldownConfig,
        profile: &ThrottleProfile,
    ) -> CoreResult<RowOutcome> {
        match &error {
            UpstreamError::RateLimited { retry_after } => {
                let retry_after = *retry_after;
                self.governor
                    .on_upstream_rate_limited(connector.id, retry_after, profile);
                let pause_secs = retry_after
                    .unwrap_or(0)
                    .max(profile.rate_limit_pause_seconds as u64);
                let resume_at = Utc::now() + chrono::Duration::seconds(pause_secs as i64);
                for row in rows {
                    self.stores.registry.defer(row.id, resume_at).await?;
                }
                Ok(RowOutcome::Stop("upstream rate limited".to_string()))
            }
            UpstreamError::AuthFailed | UpstreamError::Network { .. } => {
                self.record_health_impact(connector, &error).await?;
                for row in rows {
                    self.stores
                        .registry
                        .transition(
                            row.id,
                            crate::registry::SearchState::Queued,
                            crate::registry::SearchState::Pending,
                        )
                        .await?;
                }
                Ok(RowOutcome::Stop(format!("dispatch aborted: {error}")))
            }
            UpstreamError::NotFound => {
                // Upstream no longer knows the content; drop the mirror
                // row, its intents cascade. Any other queued rows in the
                // group return to pending.
                self.stores.content.delete(content.id).await?;
                for row in rows {
                    self.stores
                        .registry
                        .transition(
                            row.id,
                            crate::registry::SearchState::Queued,
                            crate::registry::SearchState::Pending,
                        )
                        .await?;
                }
                Ok(RowOutcome::Skipped)
            }
            UpstreamError::Timeout | UpstreamError::Server { .. } | UpstreamError::Decode(_) => {
                for row in rows {
                    let attempts_after = row.attempt_count.max(0) as u32 + 1;
                    let delay = cooldown.delay_for_attempt(attempts_after);
                    self.stores
                        .registry
                        .fail_dispatch(row.id, Utc::now() + delay, &error.to_string())
                        .await?;
                }
                Ok(RowOutcome::Skipped)
            }
        }
    }

    async fn season_decision(
        &self,
        connector: &Connector,
        series_id: i64,
        season_number: i32,
        thresholds: &SeasonPackThresholds,
    ) -> CoreResult<BatchDecision> {
        let currently_airing = self
            .stores
            .content
            .series_context(connector.id, series_id)
            .await?
            .map(|s| s.next_airing.is_some())
            .unwrap_or(false);
        let (episode_count, missing_count) = self
            .stores
            .content
            .season_counts(connector.id, series_id, season_number)
            .await?;
        let stats = SeasonStats {
            currently_airing,
            episode_count,
            missing_count,
        };
        Ok(determine_batching(&stats, thresholds))
    }

    /// Profile resolution order: sweep override, connector assignment,
    /// system default.
    async fn resolve_profile(
        &self,
        connector: &Connector,
        profile_override: Option<i64>,
    ) -> CoreResult<ThrottleProfile> {
        let profile_id = profile_override.or(connector.throttle_profile_id);
        let profile = match profile_id {
            Some(id) => match self.stores.throttle_profiles.get(id).await? {
                Some(profile) => profile,
                None => self.stores.throttle_profiles.default_profile().await?,
            },
            None => self.stores.throttle_profiles.default_profile().await?,
        };
        profile.validate()?;
        Ok(profile)
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
}
