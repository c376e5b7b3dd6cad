//! Batching log writer
//!
//! Single consumer draining the persistence channel into the `log_entries`
//! table. Batches up to [`MAX_BATCH`] entries or [`FLUSH_INTERVAL`],
//! whichever comes first, and drains fully when the channel closes at
//! shutdown.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, warn};

use super::LogEntry;
use crate::error::CoreResult;

/// Entries per flush.
const MAX_BATCH: usize = 100;

/// Time-based flush bound.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

pub struct LogWriter {
    pool: PgPool,
    rx: mpsc::UnboundedReceiver<LogEntry>,
}

impl LogWriter {
    pub fn new(pool: PgPool, rx: mpsc::UnboundedReceiver<LogEntry>) -> Self {
        Self { pool, rx }
    }

    /// Consume until the sending side is detached, then flush what is left.
    pub async fn run(mut self) {
        let mut batch: Vec<LogEntry> = Vec::with_capacity(MAX_BATCH);
        let mut ticker = interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                received = self.rx.recv() => {
                    match received {
                        Some(entry) => {
                            batch.push(entry);
                            if batch.len() >= MAX_BATCH {
                                self.flush(&mut batch).await;
                            }
                        }
                        None => {
                            self.flush(&mut batch).await;
                            debug!("log writer drained and stopped");
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut batch).await;
                }
            }
        }
    }

    async fn flush(&self, batch: &mut Vec<LogEntry>) {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = insert_batch(&self.pool, batch).await {
            // Entries stay visible in the ring; losing the persisted copy
            // is acceptable, losing the process is not.
            warn!(error = %e, dropped = batch.len(), "failed to persist log batch");
        }
        batch.clear();
    }
}

async fn insert_batch(pool: &PgPool, batch: &[LogEntry]) -> CoreResult<()> {
    let mut tx = pool.begin().await?;
    for entry in batch {
        sqlx::query(
            r#"
            INSERT INTO log_entries (logged_at, level, message, source, correlation_id, fields)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.logged_at)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&entry.source)
        .bind(entry.correlation_id)
        .bind(&entry.fields)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Remove persisted entries older than `cutoff`. Driven by the daily prune
/// job.
pub async fn prune_before(pool: &PgPool, cutoff: DateTime<Utc>) -> CoreResult<u64> {
    let result = sqlx::query("DELETE FROM log_entries WHERE logged_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
