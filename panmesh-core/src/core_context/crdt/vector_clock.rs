/*
    vector_clock.rs - Vector clock for causal ordering across brokers

    Each shared context carries a vector clock with one counter per
    participating broker. Counters only ever grow:
    - A broker increments its own counter when it drives a sync round
    - Merging takes the pointwise maximum
    - A broker joining a context appears with counter 0

    Comparing two clocks classifies them as happened-before, equal,
    or concurrent, which is what the merge path keys on.
*/

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Vector clock keyed by broker DID
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VectorClock {
    /// Map from broker DID to logical counter
    clock: HashMap<String, u64>,
}

impl VectorClock {
    /// Create a new empty vector clock
    pub fn new() -> Self {
        VectorClock {
            clock: HashMap::new(),
        }
    }

    /// Increment the counter for a broker
    pub fn increment(&mut self, broker: &str) {
        let counter = self.clock.entry(broker.to_string()).or_insert(0);
        *counter += 1;
    }

    /// Get the counter for a broker (0 if absent)
    pub fn get(&self, broker: &str) -> u64 {
        self.clock.get(broker).copied().unwrap_or(0)
    }

    /// Set the counter for a broker
    pub fn set(&mut self, broker: &str, counter: u64) {
        self.clock.insert(broker.to_string(), counter);
    }

    /// Register a broker at counter 0 if it has no entry yet.
    /// Called when a context gains a participant.
    pub fn observe_participant(&mut self, broker: &str) {
        self.clock.entry(broker.to_string()).or_insert(0);
    }

    /// Merge another clock into this one (pointwise maximum).
    /// No counter ever decreases.
    pub fn merge(&mut self, other: &VectorClock) {
        for (broker, &counter) in &other.clock {
            let current = self.clock.entry(broker.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// True if every entry in self <= other and at least one is strictly less
    pub fn happened_before(&self, other: &VectorClock) -> bool {
        let mut strictly_less = false;

        for (broker, &self_count) in &self.clock {
            let other_count = other.get(broker);
            if self_count > other_count {
                return false;
            }
            if self_count < other_count {
                strictly_less = true;
            }
        }

        // Entries other has that self lacks count as 0 < n
        for (broker, &other_count) in &other.clock {
            if !self.clock.contains_key(broker) && other_count > 0 {
                strictly_less = true;
            }
        }

        strictly_less
    }

    /// True if neither clock happened before the other and they differ
    pub fn is_concurrent(&self, other: &VectorClock) -> bool {
        !self.happened_before(other) && !other.happened_before(self) && self != other
    }

    /// Causal comparison: Equal, Less, Greater, or None when concurrent
    pub fn partial_cmp(&self, other: &VectorClock) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.happened_before(other) {
            Some(Ordering::Less)
        } else if other.happened_before(self) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    /// All broker DIDs with an entry in this clock
    pub fn brokers(&self) -> Vec<String> {
        self.clock.keys().cloned().collect()
    }

    /// Whether the clock has no entries
    pub fn is_empty(&self) -> bool {
        self.clock.is_empty()
    }

    /// Number of brokers tracked
    pub fn len(&self) -> usize {
        self.clock.len()
    }
}
