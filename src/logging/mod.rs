//! Structured log sink
//!
//! A process-wide singleton with explicit init/shutdown. Every recorded
//! entry lands in the in-memory ring buffer; when persistence is enabled a
//! batching writer also stores it. Entries carry the ambient request
//! context's correlation id and source tag.

pub mod ring;
pub mod writer;

pub use ring::{RingBuffer, DEFAULT_CAPACITY, MIN_CAPACITY};
pub use writer::LogWriter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::context;

/// Entry severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        match s.as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown log level: {s}")),
        }
    }
}

/// One structured entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub logged_at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    pub correlation_id: Option<Uuid>,
    pub fields: serde_json::Value,
}

impl LogEntry {
    /// Build an entry stamped with the current task's context.
    pub fn new(level: LogLevel, message: impl Into<String>, fields: serde_json::Value) -> Self {
        let ctx = context::current();
        Self {
            logged_at: Utc::now(),
            level,
            message: message.into(),
            source: ctx.source.as_str().to_string(),
            correlation_id: Some(ctx.correlation_id),
            fields,
        }
    }
}

/// The singleton sink.
pub struct LogSink {
    ring: Mutex<RingBuffer>,
    persist_tx: Mutex<Option<mpsc::UnboundedSender<LogEntry>>>,
    persistence_enabled: AtomicBool,
}

static SINK: OnceLock<LogSink> = OnceLock::new();

/// Initialize the sink. Idempotent; later calls return the existing sink
/// without touching its capacity.
pub fn init(capacity: usize) -> &'static LogSink {
    SINK.get_or_init(|| LogSink {
        ring: Mutex::new(RingBuffer::new(capacity)),
        persist_tx: Mutex::new(None),
        persistence_enabled: AtomicBool::new(false),
    })
}

/// The sink, when initialized.
pub fn sink() -> Option<&'static LogSink> {
    SINK.get()
}

/// Record an entry if the sink is up; a missing sink drops silently (the
/// tracing line at the call site still exists).
pub fn record(level: LogLevel, message: impl Into<String>, fields: serde_json::Value) {
    if let Some(sink) = SINK.get() {
        sink.record(LogEntry::new(level, message, fields));
    }
}

/// Detach the persistence channel so the writer drains and exits.
pub fn shutdown() {
    if let Some(sink) = SINK.get() {
        sink.detach_writer();
    }
}

impl LogSink {
    pub fn record(&self, entry: LogEntry) {
        if self.persistence_enabled.load(Ordering::Relaxed) {
            if let Ok(tx) = self.persist_tx.lock() {
                if let Some(tx) = tx.as_ref() {
                    let _ = tx.send(entry.clone());
                }
            }
        }
        if let Ok(mut ring) = self.ring.lock() {
            ring.push(entry);
        }
    }

    /// Wire a persistence channel (the writer owns the receiving end).
    pub fn attach_writer(&self, tx: mpsc::UnboundedSender<LogEntry>) {
        if let Ok(mut slot) = self.persist_tx.lock() {
            *slot = Some(tx);
        }
        self.persistence_enabled.store(true, Ordering::Relaxed);
    }

    pub fn detach_writer(&self) {
        self.persistence_enabled.store(false, Ordering::Relaxed);
        if let Ok(mut slot) = self.persist_tx.lock() {
            *slot = None;
        }
    }

    /// Toggle persistence without tearing down the channel.
    pub fn set_persistence_enabled(&self, enabled: bool) {
        self.persistence_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.ring
            .lock()
            .map(|ring| ring.recent(limit))
            .unwrap_or_default()
    }

    pub fn resize(&self, capacity: usize) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.resize(capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_records_into_ring_and_channel() {
        let sink = init(MIN_CAPACITY);
        let (tx, mut rx) = mpsc::unbounded_channel();
        sink.attach_writer(tx);

        record(LogLevel::Warn, "sweep stopped early", serde_json::json!({"connector_id": 3}));

        // The sink is a process-wide singleton; skip entries other tests
        // may have recorded before ours.
        let persisted = loop {
            let entry = rx.recv().await.unwrap();
            if entry.message == "sweep stopped early" {
                break entry;
            }
        };
        assert_eq!(persisted.level, LogLevel::Warn);
        assert_eq!(persisted.source, "unknown");

        let recent = sink.recent(10);
        assert!(recent.iter().any(|e| e.message == "sweep stopped early"));

        sink.detach_writer();
        record(LogLevel::Info, "after detach", serde_json::json!({}));
        assert!(rx.recv().await.is_none());
    }
}
