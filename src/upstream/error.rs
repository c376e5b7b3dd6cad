//! Upstream error classification
//!
//! Transport and protocol failures are mapped into a closed taxonomy at the
//! client boundary. Nothing above the client ever sees a raw `reqwest` error.

use thiserror::Error;

/// Root cause of a network-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCause {
    DnsFailure,
    ConnectionRefused,
    TlsFailure,
    Unknown,
}

impl NetworkCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DnsFailure => "dns_failure",
            Self::ConnectionRefused => "connection_refused",
            Self::TlsFailure => "tls_failure",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for NetworkCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classified upstream failure.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// API key rejected (401/403).
    #[error("upstream rejected the API key")]
    AuthFailed,

    /// The addressed resource no longer exists upstream (404).
    #[error("resource not found upstream")]
    NotFound,

    /// Upstream returned 429; `retry_after` carries the integer-seconds
    /// `Retry-After` header when present.
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<u64> },

    /// End-to-end deadline expired.
    #[error("upstream request timed out")]
    Timeout,

    /// Connection-level failure before any HTTP response.
    #[error("network failure ({cause})")]
    Network { cause: NetworkCause },

    /// Upstream 5xx.
    #[error("upstream server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Response body did not match the documented surface.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Classify a transport-level `reqwest` error (no HTTP response seen).
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }

        let cause = classify_network_cause(&err);
        Self::Network { cause }
    }

    /// Transient failures transition the registry row to cooldown; the rest
    /// have dedicated reactions in the sweep runner and tracker.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Server { .. } | Self::RateLimited { .. } | Self::Network { .. }
        )
    }
}

/// Walk the source chain looking for a recognizable cause. `reqwest` hides
/// the concrete io/tls error types, so this matches on rendered messages.
fn classify_network_cause(err: &reqwest::Error) -> NetworkCause {
    let mut messages = Vec::new();
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        messages.push(e.to_string().to_lowercase());
        source = e.source();
    }
    let rendered = messages.join(" | ");

    if rendered.contains("dns") || rendered.contains("failed to lookup address") {
        NetworkCause::DnsFailure
    } else if rendered.contains("certificate") || rendered.contains("tls") {
        NetworkCause::TlsFailure
    } else if rendered.contains("connection refused") {
        NetworkCause::ConnectionRefused
    } else {
        NetworkCause::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classes() {
        assert!(UpstreamError::Timeout.is_transient());
        assert!(UpstreamError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(UpstreamError::RateLimited { retry_after: None }.is_transient());
        assert!(!UpstreamError::AuthFailed.is_transient());
        assert!(!UpstreamError::NotFound.is_transient());
    }
}
