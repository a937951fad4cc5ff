// Bounded session history
//
// Keeps the first entry of the session as the time origin and a ring of the
// most recent entries after it, so elapsed-time and mass deltas stay anchored
// to session start while memory stays bounded.

use crate::entry::TelemetryEntry;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

/// Default number of recent entries kept after the origin
pub const DEFAULT_HISTORY_CAPACITY: usize = 120;

/// Metrics for buffer monitoring
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct HistoryMetrics {
    pub total_appended: u64,
    pub total_evicted: u64,
    pub current_size: usize,
    pub capacity: usize,
}

/// History of the active session
///
/// Holds at most `capacity + 1` entries: the session's first entry plus the
/// `capacity` most recent ones. Appends are O(1).
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    origin: Option<Arc<TelemetryEntry>>,
    recent: VecDeque<Arc<TelemetryEntry>>,
    capacity: usize,
    version: u64,
    total_appended: u64,
    total_evicted: u64,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// Create a buffer retaining `capacity` recent entries besides the origin.
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            origin: None,
            recent: VecDeque::with_capacity(capacity + 1),
            capacity,
            version: 0,
            total_appended: 0,
            total_evicted: 0,
        }
    }

    pub fn append(&mut self, entry: impl Into<Arc<TelemetryEntry>>) {
        let entry = entry.into();
        if self.origin.is_none() {
            self.origin = Some(entry);
        } else {
            self.recent.push_back(entry);
            if self.recent.len() > self.capacity {
                self.recent.pop_front();
                self.total_evicted += 1;
            }
        }
        self.total_appended += 1;
        self.version += 1;
    }

    pub fn clear(&mut self) {
        self.origin = None;
        self.recent.clear();
        self.version += 1;
    }

    pub fn latest(&self) -> Option<&Arc<TelemetryEntry>> {
        self.recent.back().or(self.origin.as_ref())
    }

    /// The session's first entry (the time origin)
    pub fn first(&self) -> Option<&Arc<TelemetryEntry>> {
        self.origin.as_ref()
    }

    /// Copy out an immutable view of the whole history in order
    pub fn snapshot(&self) -> HistorySnapshot {
        let entries = self.iter().cloned().collect();
        HistorySnapshot {
            version: self.version,
            entries,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TelemetryEntry>> {
        self.origin.iter().chain(self.recent.iter())
    }

    pub fn len(&self) -> usize {
        self.origin.iter().count() + self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origin.is_none()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bumped on every mutation, including `clear`
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn metrics(&self) -> HistoryMetrics {
        HistoryMetrics {
            total_appended: self.total_appended,
            total_evicted: self.total_evicted,
            current_size: self.len(),
            capacity: self.capacity,
        }
    }
}

/// Immutable, ordered copy of the history taken under the session lock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    version: u64,
    entries: Vec<Arc<TelemetryEntry>>,
}

impl HistorySnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entries(&self) -> &[Arc<TelemetryEntry>] {
        &self.entries
    }
}

impl Deref for HistorySnapshot {
    type Target = [Arc<TelemetryEntry>];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}
