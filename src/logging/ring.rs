//! In-memory log ring
//!
//! Bounded FIFO of recent entries. Always receives entries, whether or not
//! persistence is enabled; the log-viewer surface reads from here.

use std::collections::VecDeque;

use super::LogEntry;

/// Capacity floor; resize requests below it are raised to it.
pub const MIN_CAPACITY: usize = 100;

/// Default capacity when none is configured.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct RingBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Shrink or grow; shrinking drops the oldest entries.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(MIN_CAPACITY);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Most recent entries, newest last, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    fn entry(n: usize) -> LogEntry {
        LogEntry::new(LogLevel::Info, format!("entry {n}"), serde_json::json!({}))
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut ring = RingBuffer::new(MIN_CAPACITY);
        for n in 0..150 {
            ring.push(entry(n));
        }
        assert_eq!(ring.len(), MIN_CAPACITY);
        let recent = ring.recent(1);
        assert_eq!(recent[0].message, "entry 149");
        // Oldest surviving entry is 50.
        let all = ring.recent(usize::MAX);
        assert_eq!(all[0].message, "entry 50");
    }

    #[test]
    fn test_capacity_floor() {
        let ring = RingBuffer::new(10);
        assert_eq!(ring.capacity(), MIN_CAPACITY);

        let mut ring = RingBuffer::new(500);
        ring.resize(1);
        assert_eq!(ring.capacity(), MIN_CAPACITY);
    }

    #[test]
    fn test_resize_drops_oldest() {
        let mut ring = RingBuffer::new(1000);
        for n in 0..500 {
            ring.push(entry(n));
        }
        ring.resize(200);
        assert_eq!(ring.len(), 200);
        assert_eq!(ring.recent(usize::MAX)[0].message, "entry 300");
    }
}
