//! Auto-reconnect supervisor
//!
//! Probes unhealthy and offline connectors with capped exponential backoff
//! and jitter. A per-connector user pause stops probing entirely; a manual
//! reconnect bypasses the backoff but still respects the pause.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::db::{Connector, HealthStatus, PgStores};
use crate::error::CoreResult;
use crate::notify::{Notifier, NotifyEvent};
use crate::secrets::SecretCipher;

/// First retry delay.
const BASE_BACKOFF_SECS: i64 = 30;

/// Backoff ceiling.
const MAX_BACKOFF_SECS: i64 = 30 * 60;

/// Failure counter cap; keeps the exponent bounded.
const MAX_COUNTED_FAILURES: u32 = 10;

/// Backoff doubling factor.
const MULTIPLIER: f64 = 2.0;

/// Per-connector reconnect bookkeeping. Process-resident.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectState {
    pub consecutive_failures: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub paused: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ReconnectState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            consecutive_failures: 0,
            next_attempt_at: now,
            paused: false,
            last_attempt_at: None,
        }
    }
}

/// Deterministic core of the backoff: `base * multiplier^failures` capped.
/// `jitter_factor` spreads probes out, 0.5..=1.5 in production.
pub fn backoff_delay(failures: u32, jitter_factor: f64) -> Duration {
    let failures = failures.min(MAX_COUNTED_FAILURES);
    let raw = BASE_BACKOFF_SECS as f64 * MULTIPLIER.powi(failures as i32);
    let capped = raw.min(MAX_BACKOFF_SECS as f64);
    Duration::seconds((capped * jitter_factor).round() as i64)
}

pub struct ReconnectSupervisor {
    stores: Arc<PgStores>,
    cipher: Arc<dyn SecretCipher>,
    notifier: Arc<dyn Notifier>,
    states: Mutex<HashMap<i64, ReconnectState>>,
}

impl ReconnectSupervisor {
    pub fn new(
        stores: Arc<PgStores>,
        cipher: Arc<dyn SecretCipher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            stores,
            cipher,
            notifier,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// One supervisor pass: probe every due connector. Driven by the
    /// 30-second system job and once at startup.
    pub async fn tick(&self) -> CoreResult<()> {
        let now = Utc::now();
        let candidates = self.stores.connectors.list_needing_reconnect().await?;
        for connector in candidates {
            let due = {
                let Ok(mut states) = self.states.lock() else {
                    continue;
                };
                let state = states
                    .entry(connector.id)
                    .or_insert_with(|| ReconnectState::new(now));
                !state.paused && now >= state.next_attempt_at
            };
            if due {
                self.probe(&connector).await?;
            }
        }
        Ok(())
    }

    /// Manual reconnect: skips the backoff wait but refuses while the
    /// connector's reconnect is user-paused. Returns whether the probe ran.
    pub async fn reconnect_now(&self, connector_id: i64) -> CoreResult<bool> {
        let paused = self
            .states
            .lock()
            .ok()
            .and_then(|states| states.get(&connector_id).map(|s| s.paused))
            .unwrap_or(false);
        if paused {
            return Ok(false);
        }
        let Some(connector) = self.stores.connectors.get(connector_id).await? else {
            return Ok(false);
        };
        self.probe(&connector).await?;
        Ok(true)
    }

    /// User pause/resume of automatic reconnection for one connector.
    pub fn set_paused(&self, connector_id: i64, paused: bool) {
        if let Ok(mut states) = self.states.lock() {
            let state = states
                .entry(connector_id)
                .or_insert_with(|| ReconnectState::new(Utc::now()));
            state.paused = paused;
        }
    }

    /// Forget state for a deleted connector.
    pub fn forget(&self, connector_id: i64) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(&connector_id);
        }
    }

    pub fn state_of(&self, connector_id: i64) -> Option<ReconnectState> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(&connector_id).copied())
    }

    async fn probe(&self, connector: &Connector) -> CoreResult<()> {
        let now = Utc::now();
        let outcome = match connector.client(self.cipher.as_ref()) {
            Ok(client) => client.ping().await,
            Err(e) => {
                warn!(connector_id = connector.id, error = %e, "cannot build client for probe");
                return Ok(());
            }
        };

        match outcome {
            Ok(()) => {
                if let Ok(mut states) = self.states.lock() {
                    let state = states
                        .entry(connector.id)
                        .or_insert_with(|| ReconnectState::new(now));
                    state.consecutive_failures = 0;
                    state.next_attempt_at = now;
                    state.last_attempt_at = Some(now);
                }
                let changed = self
                    .stores
                    .connectors
                    .set_health(connector.id, HealthStatus::Healthy, now)
                    .await?;
                if changed {
                    info!(connector_id = connector.id, "connector recovered");
                    self.notifier
                        .notify(
                            NotifyEvent::ConnectorHealthChanged,
                            serde_json::json!({
                                "connector_id": connector.id,
                                "name": connector.name,
                                "status": "healthy",
                            }),
                        )
                        .await;
                }
            }
            Err(e) => {
                let status = HealthStatus::from_error(&e).unwrap_or(HealthStatus::Offline);
                let (failures, next_attempt_at) = {
                    let jitter = rand::thread_rng().gen_range(0.5..=1.5);
                    match self.states.lock() {
                        Ok(mut states) => {
                            let state = states
                                .entry(connector.id)
                                .or_insert_with(|| ReconnectState::new(now));
                            state.consecutive_failures =
                                (state.consecutive_failures + 1).min(MAX_COUNTED_FAILURES);
                            state.next_attempt_at =
                                now + backoff_delay(state.consecutive_failures, jitter);
                            state.last_attempt_at = Some(now);
                            (state.consecutive_failures, state.next_attempt_at)
                        }
                        Err(_) => (0, now),
                    }
                };
                debug!(
                    connector_id = connector.id,
                    failures,
                    next_attempt_at = %next_attempt_at,
                    error = %e,
                    "reconnect probe failed"
                );
                let changed = self
                    .stores
                    .connectors
                    .set_health(connector.id, status, now)
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
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_escalates_and_caps() {
        assert_eq!(backoff_delay(1, 1.0), Duration::seconds(60));
        assert_eq!(backoff_delay(2, 1.0), Duration::seconds(120));
        assert_eq!(backoff_delay(5, 1.0), Duration::seconds(960));
        // Past the cap everything clamps to 30 minutes.
        assert_eq!(backoff_delay(7, 1.0), Duration::seconds(1800));
        assert_eq!(backoff_delay(50, 1.0), Duration::seconds(1800));
    }

    #[test]
    fn test_backoff_jitter_scales() {
        assert_eq!(backoff_delay(1, 0.5), Duration::seconds(30));
        assert_eq!(backoff_delay(1, 1.5), Duration::seconds(90));
    }
}
