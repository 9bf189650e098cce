//! Segment identity and time accumulation.
//!
//! A segment is a named stretch of trail. Map records how long each chunk
//! spent on every segment it matched; Reduce merges those records across
//! chunks. Both merge strictly by [`SegmentKey`] value, never by time.

use std::collections::btree_map::{BTreeMap, Entry};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a trail segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentKey(pub String);

impl From<&str> for SegmentKey {
    fn from(value: &str) -> Self {
        SegmentKey(value.to_string())
    }
}

impl From<String> for SegmentKey {
    fn from(value: String) -> Self {
        SegmentKey(value)
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Time spent within one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub key: SegmentKey,
    /// Accumulated time in seconds
    pub time: f64,
}

impl SegmentStats {
    pub fn new(key: SegmentKey, time: f64) -> Self {
        Self { key, time }
    }

    /// Add time from another traversal of the same segment.
    pub fn add_time(&mut self, time: f64) {
        self.time += time;
    }
}

/// Segment times keyed by segment identity.
///
/// Iteration (and [`SegmentTimes::into_stats`]) is ordered by key, so the
/// output does not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentTimes {
    entries: BTreeMap<SegmentKey, SegmentStats>,
}

impl SegmentTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `time` seconds against `key`.
    pub fn add(&mut self, key: &SegmentKey, time: f64) {
        match self.entries.get_mut(key) {
            Some(existing) => existing.add_time(time),
            None => {
                self.entries
                    .insert(key.clone(), SegmentStats::new(key.clone(), time));
            }
        }
    }

    /// Merge one segment entry: appended as-is if unseen, otherwise only its
    /// time is added to the existing entry.
    pub fn merge(&mut self, stats: &SegmentStats) {
        match self.entries.entry(stats.key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(stats.clone());
            }
            Entry::Occupied(mut slot) => slot.get_mut().add_time(stats.time),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &SegmentKey) -> Option<f64> {
        self.entries.get(key).map(|s| s.time)
    }

    pub fn into_stats(self) -> Vec<SegmentStats> {
        self.entries.into_values().collect()
    }
}
