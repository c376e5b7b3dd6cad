//! Sweeps
//!
//! A sweep is one scheduled traversal over one or more connectors: sync the
//! mirror against upstream, then dispatch searches for eligible registry
//! rows under the throttle budget.

pub mod discovery;
pub mod runner;

pub use discovery::{sync_connector, SyncCounts};
pub use runner::{SweepReport, SweepRunner};

use serde::{Deserialize, Serialize};

/// The two sweep shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// Sync changes since the connector's high-water mark, then dispatch.
    Incremental,
    /// Enumerate everything, delete local content absent upstream, then
    /// dispatch.
    FullReconciliation,
}

impl SweepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::FullReconciliation => "full_reconciliation",
        }
    }
}

impl std::fmt::Display for SweepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for SweepKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "incremental" => Ok(Self::Incremental),
            "full_reconciliation" => Ok(Self::FullReconciliation),
            _ => Err(format!("unknown sweep kind: {s}")),
        }
    }
}
