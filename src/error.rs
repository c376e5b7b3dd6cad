//! Core error taxonomy
//!
//! Every error produced by the control plane is classified into one of the
//! variants below. Upstream transport errors are classified once, at the
//! client boundary, and never leak raw `reqwest` errors past it.

use thiserror::Error;

use crate::upstream::UpstreamError;

/// Result alias used across the core.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced by the core itself.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad cron expression, URL, out-of-range budget, unknown timezone.
    /// Surfaced to the caller; never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Classified upstream failure (auth, transport, throttle, server).
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Persistence failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Should-not-happen state observed at runtime. Logged at `error`; the
    /// current operation fails and the caller moves on to the next item.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl CoreError {
    /// Whether a retry may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::InvalidConfig(_) | CoreError::Invariant(_) => false,
            CoreError::Upstream(e) => e.is_transient(),
            CoreError::Database(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_is_not_transient() {
        let err = CoreError::InvalidConfig("bad cron".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_upstream_timeout_is_transient() {
        let err = CoreError::Upstream(UpstreamError::Timeout);
        assert!(err.is_transient());
    }
}
