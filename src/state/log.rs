//! Bounded log of recent server events.
//!
//! A fixed-capacity FIFO ring: when full, the oldest entry is evicted to make
//! room. Memory stays bounded no matter how chatty the backend is.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::identifiers::{CorrelationId, LogEntryId};
use crate::protocol::LogKind;

// ============================================================================
// Constants
// ============================================================================

/// Default ring capacity.
pub const DEFAULT_LOG_CAPACITY: usize = 50;

// ============================================================================
// LogEntry
// ============================================================================

/// One retained log/ack event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Monotonic id within the ring.
    pub id: LogEntryId,
    /// Receipt time.
    pub received_at: DateTime<Utc>,
    /// Entry class.
    pub kind: LogKind,
    /// Message text.
    pub message: String,
    /// Correlated command, if any.
    pub correlation_id: Option<CorrelationId>,
}

// ============================================================================
// LogRing
// ============================================================================

#[derive(Debug)]
struct RingInner {
    entries: VecDeque<LogEntry>,
    next_id: u64,
}

/// Fixed-capacity ring buffer of [`LogEntry`].
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    inner: RwLock<RingInner>,
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogRing {
    /// Creates a ring holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(RingInner {
                entries: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
        }
    }

    /// Maximum number of retained entries.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns `true` if the ring is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn push(
        &self,
        kind: LogKind,
        message: impl Into<String>,
        correlation_id: Option<CorrelationId>,
    ) -> LogEntry {
        let mut inner = self.inner.write();

        let entry = LogEntry {
            id: LogEntryId::new(inner.next_id),
            received_at: Utc::now(),
            kind,
            message: message.into(),
            correlation_id,
        };
        inner.next_id += 1;

        while inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(entry.clone());

        entry
    }

    /// Returns all retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.read().entries.iter().cloned().collect()
    }

    /// Returns up to `n` entries, newest first.
    #[must_use]
    pub fn latest(&self, n: usize) -> Vec<LogEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .rev()
            .take(n)
            .cloned()
            .collect()
    }

    /// Drops every entry. Ids keep increasing.
    pub fn clear(&self) {
        self.inner.write().entries.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(LogRing::default().capacity(), 50);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let ring = LogRing::new(0);
        ring.push(LogKind::Info, "a", None);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let ring = LogRing::new(3);
        for i in 0..5 {
            ring.push(LogKind::Info, format!("m{i}"), None);
        }

        let messages: Vec<_> = ring.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, ["m2", "m3", "m4"]);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let ring = LogRing::new(2);
        let a = ring.push(LogKind::Info, "a", None);
        let b = ring.push(LogKind::Warning, "b", None);
        ring.clear();
        let c = ring.push(LogKind::Error, "c", None);
        assert!(a.id < b.id && b.id < c.id);
    }

    #[test]
    fn test_latest_is_newest_first() {
        let ring = LogRing::new(10);
        ring.push(LogKind::Info, "old", None);
        ring.push(LogKind::Ack, "new", Some(CorrelationId::from("c")));

        let latest = ring.latest(1);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].message, "new");
        assert_eq!(latest[0].correlation_id, Some(CorrelationId::from("c")));
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(capacity in 1usize..64, pushes in 0usize..200) {
            let ring = LogRing::new(capacity);
            for i in 0..pushes {
                ring.push(LogKind::Info, i.to_string(), None);
                prop_assert!(ring.len() <= capacity);
            }
            let retained = ring.entries();
            prop_assert_eq!(retained.len(), pushes.min(capacity));
            if let Some(last) = retained.last() {
                prop_assert_eq!(last.message.clone(), (pushes - 1).to_string());
            }
            if let Some(first) = retained.first() {
                prop_assert_eq!(first.message.clone(), (pushes - retained.len()).to_string());
            }
        }
    }
}
