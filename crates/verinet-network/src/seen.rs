//! Bounded set of message ids already handled.
//!
//! Oldest ids are evicted first once the cache is full, so memory stays
//! flat on long-running nodes. An evicted id that comes around again is
//! treated as new; the hop limit bounds how long a message circulates.

use std::collections::{HashSet, VecDeque};

use verinet_types::MessageId;

#[derive(Debug)]
pub struct SeenCache {
    seen: HashSet<MessageId>,
    /// Insertion order for eviction (front = oldest).
    order: VecDeque<MessageId>,
    max_size: usize,
}

impl SeenCache {
    /// A cache remembering at most `max_size` ids (at least one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            seen: HashSet::with_capacity(max_size.min(4_096)),
            order: VecDeque::with_capacity(max_size.min(4_096)),
            max_size,
        }
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: MessageId) -> bool {
        if self.seen.contains(&id) {
            return false;
        }
        if self.seen.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id);
        self.order.push_back(id);
        true
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_insert_reports_duplicate() {
        let mut cache = SeenCache::new(10);
        let id = MessageId::new();
        assert!(cache.insert(id));
        assert!(!cache.insert(id));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn oldest_is_evicted_at_capacity() {
        let mut cache = SeenCache::new(3);
        let ids: Vec<MessageId> = (0..4).map(|_| MessageId::new()).collect();
        for id in &ids {
            cache.insert(*id);
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&ids[0]));
        assert!(cache.contains(&ids[3]));
    }

    #[test]
    fn zero_capacity_still_holds_one() {
        let mut cache = SeenCache::new(0);
        assert!(cache.insert(MessageId::new()));
        assert_eq!(cache.len(), 1);
    }
}
