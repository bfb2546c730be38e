//! Bounded cache of validation results.
//!
//! Keyed by (package digest, event type). Insertion-ordered eviction keeps
//! memory predictable on long-running nodes.

use std::collections::{HashMap, VecDeque};

use verinet_types::{EventType, EvidenceDigest, ValidationResult};

type Key = (EvidenceDigest, EventType);

#[derive(Debug)]
pub struct ResultCache {
    results: HashMap<Key, ValidationResult>,
    /// Insertion order for eviction (front = oldest).
    order: VecDeque<Key>,
    max_size: usize,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    /// A cache holding at most `max_size` results (at least one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            results: HashMap::with_capacity(max_size.min(1_024)),
            order: VecDeque::with_capacity(max_size.min(1_024)),
            max_size,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, digest: &EvidenceDigest, event_type: EventType) -> Option<ValidationResult> {
        let found = self.results.get(&(*digest, event_type)).cloned();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    pub fn insert(&mut self, event_type: EventType, result: ValidationResult) {
        let key = (result.digest, event_type);
        if self.results.contains_key(&key) {
            return;
        }
        if self.results.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.results.remove(&oldest);
            }
        }
        self.results.insert(key, result);
        self.order.push_back(key);
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
