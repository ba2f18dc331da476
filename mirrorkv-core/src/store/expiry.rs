//! Key expiration index for the in-process store

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Heap entries allowed per live deadline before stale entries are dropped
const COMPACTION_RATIO: usize = 2;

/// Entry in the expiration heap
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExpirationEntry {
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

impl Ord for ExpirationEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest expiration first)
        other
            .expires_at
            .cmp(&self.expires_at)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for ExpirationEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct IndexState {
    heap: BinaryHeap<ExpirationEntry>,
    /// Authoritative deadline per key; heap entries that disagree are stale
    deadlines: HashMap<String, DateTime<Utc>>,
}

impl IndexState {
    /// Rebuild the heap from the live deadlines once stale entries dominate
    fn compact_if_sparse(&mut self) {
        if self.heap.len() <= COMPACTION_RATIO * self.deadlines.len().max(1) {
            return;
        }
        self.heap = self
            .deadlines
            .iter()
            .map(|(key, expires_at)| ExpirationEntry {
                key: key.clone(),
                expires_at: *expires_at,
            })
            .collect();
    }
}

/// Tracks key deadlines with a min-heap
///
/// Removing or re-arming a key only touches the deadline map. Superseded heap
/// entries are skipped when they surface in [`ExpiryIndex::take_expired`].
#[derive(Debug, Default)]
pub struct ExpiryIndex {
    state: Mutex<IndexState>,
}

impl ExpiryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a deadline for a key
    pub fn arm(&self, key: &str, expires_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.deadlines.insert(key.to_string(), expires_at);
        state.heap.push(ExpirationEntry {
            key: key.to_string(),
            expires_at,
        });
        state.compact_if_sparse();
    }

    /// Drop any deadline for a key
    pub fn disarm(&self, key: &str) {
        let mut state = self.state.lock();
        if state.deadlines.remove(key).is_some() {
            state.compact_if_sparse();
        }
    }

    pub fn deadline(&self, key: &str) -> Option<DateTime<Utc>> {
        self.state.lock().deadlines.get(key).copied()
    }

    /// Remove and return every key whose deadline is at or before `now`
    pub fn take_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut state = self.state.lock();
        let mut expired = Vec::new();

        while let Some(entry) = state.heap.peek() {
            if entry.expires_at > now {
                break;
            }
            let Some(entry) = state.heap.pop() else {
                break;
            };
            if state.deadlines.get(&entry.key) == Some(&entry.expires_at) {
                state.deadlines.remove(&entry.key);
                expired.push(entry.key);
            }
        }

        expired
    }

    /// Earliest live deadline, if any
    pub fn next_expiration(&self) -> Option<DateTime<Utc>> {
        self.state.lock().deadlines.values().min().copied()
    }

    /// Number of keys with a live deadline
    pub fn len(&self) -> usize {
        self.state.lock().deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.heap.clear();
        state.deadlines.clear();
    }
}
