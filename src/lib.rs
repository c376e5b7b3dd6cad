//! Comradarr core
//!
//! Automation control plane for Sonarr/Radarr/Whisparr-style media
//! libraries: a cron-driven sweep scheduler, a discovery/sync subsystem
//! maintaining a local content mirror, a prioritized search registry with
//! cooldown and exhaustion, a per-connector throttle governor, a command
//! dispatcher with pending-command tracking, and an auto-reconnect
//! supervisor. The management surface (auth, UI, notification senders,
//! backup) lives outside this crate and collaborates through the stores,
//! the settings bridge, the log sink, and the notifier callback.

pub mod batcher;
pub mod context;
pub mod cron;
pub mod db;
pub mod error;
pub mod health;
pub mod logging;
pub mod mirror;
pub mod notify;
pub mod pending;
pub mod reconnect;
pub mod registry;
pub mod scheduler;
pub mod secrets;
pub mod settings;
pub mod snapshot;
pub mod sweep;
pub mod throttle;
pub mod upstream;

pub use error::{CoreError, CoreResult};
