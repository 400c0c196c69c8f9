//! Bounded History - fixed-capacity FIFO log
//!
//! Every list that must not grow without bound (outcome records, context
//! signatures, breakthrough snapshots, failure logs) is one of these.
//! Pushing past capacity evicts exactly one entry, always the oldest.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// An item together with the id assigned at push time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry<T> {
    pub id: u64,
    pub item: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundedHistory<T> {
    capacity: usize,
    entries: VecDeque<HistoryEntry<T>>,
    next_id: u64,
    overflow_count: u64,
}

impl<T> BoundedHistory<T> {
    /// Create an empty history. Capacity must be positive.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(OrchestratorError::invalid_config(
                "bounded history capacity must be greater than zero",
            ));
        }
        Ok(Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            next_id: 0,
            overflow_count: 0,
        })
    }

    /// Append an item, evicting the oldest one when full. Returns the item's id.
    pub fn push(&mut self, item: T) -> u64 {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.overflow_count += 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(HistoryEntry { id, item });
        id
    }

    /// All retained items, oldest first
    pub fn all(&self) -> Vec<&T> {
        self.entries.iter().map(|e| &e.item).collect()
    }

    /// The last `n` items, still in insertion order
    pub fn recent(&self, n: usize) -> Vec<&T> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).map(|e| &e.item).collect()
    }

    pub fn find<P>(&self, mut predicate: P) -> Vec<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.entries
            .iter()
            .map(|e| &e.item)
            .filter(|item| predicate(item))
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<T>> {
        self.entries.iter()
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

    /// Number of items evicted since construction
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: PartialEq> BoundedHistory<T> {
    pub fn contains(&self, item: &T) -> bool {
        self.entries.iter().any(|e| &e.item == item)
    }

    /// Push only if an equal item is not already retained
    pub fn push_unique(&mut self, item: T) -> Option<u64> {
        if self.contains(&item) {
            None
        } else {
            Some(self.push(item))
        }
    }
}

// Deserialization goes through the raw shape so imported snapshots are
// re-checked against the capacity invariant.
#[derive(Deserialize)]
struct RawHistory<T> {
    capacity: usize,
    entries: VecDeque<HistoryEntry<T>>,
    next_id: u64,
    overflow_count: u64,
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for BoundedHistory<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawHistory::<T>::deserialize(deserializer)?;
        if raw.capacity == 0 {
            return Err(serde::de::Error::custom("bounded history capacity must be greater than zero"));
        }
        if raw.entries.len() > raw.capacity {
            return Err(serde::de::Error::custom(format!(
                "bounded history holds {} entries but capacity is {}",
                raw.entries.len(),
                raw.capacity
            )));
        }
        Ok(Self {
            capacity: raw.capacity,
            entries: raw.entries,
            next_id: raw.next_id,
            overflow_count: raw.overflow_count,
        })
    }
}
