//! Outbound notification callback
//!
//! The core announces lifecycle events through a channel-agnostic callback;
//! delivery, batching, and quiet-hours belong to the collaborator behind
//! the trait. Emission is fire-and-forget: a failing notifier never fails
//! the operation that triggered it.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Events the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    SweepStarted,
    SweepCompleted,
    SearchSuccess,
    SearchExhausted,
    ConnectorHealthChanged,
    SyncCompleted,
    SyncFailed,
    AppStarted,
    UpdateAvailable,
}

impl NotifyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SweepStarted => "sweep_started",
            Self::SweepCompleted => "sweep_completed",
            Self::SearchSuccess => "search_success",
            Self::SearchExhausted => "search_exhausted",
            Self::ConnectorHealthChanged => "connector_health_changed",
            Self::SyncCompleted => "sync_completed",
            Self::SyncFailed => "sync_failed",
            Self::AppStarted => "app_started",
            Self::UpdateAvailable => "update_available",
        }
    }
}

impl std::fmt::Display for NotifyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channel-agnostic dispatch callback.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotifyEvent, payload: serde_json::Value);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: NotifyEvent, _payload: serde_json::Value) {}
}

/// Logs each event; the default wiring until a real sender is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: NotifyEvent, payload: serde_json::Value) {
        info!(event = event.as_str(), %payload, "notification");
    }
}
