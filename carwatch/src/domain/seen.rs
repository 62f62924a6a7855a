//! Bounded per-filter memory of listings already reported or suppressed.

use std::collections::{HashSet, VecDeque};

/// Bounded set of dedup keys, evicting the least recently seen.
///
/// Once `capacity` keys are held, inserting a new key evicts the one seen
/// longest ago. Seeing a held key again makes it the most recent, so keys that
/// keep showing up on a page outlive keys that dropped off it. A capacity of
/// zero is treated as one.
#[derive(Debug, Clone)]
pub struct SeenSet {
    keys: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenSet {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            keys: HashSet::with_capacity(capacity.min(1024)),
            order: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Record a key. Returns `true` if it was not already present.
    pub fn insert(&mut self, key: String) -> bool {
        if self.keys.contains(&key) {
            if let Some(pos) = self.order.iter().position(|k| *k == key)
                && let Some(held) = self.order.remove(pos)
            {
                self.order.push_back(held);
            }
            return false;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_new_keys() {
        let mut seen = SeenSet::with_capacity(10);
        assert!(seen.insert("a".into()));
        assert!(!seen.insert("a".into()));
        assert!(seen.insert("b".into()));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_evicts_oldest() {
        let mut seen = SeenSet::with_capacity(3);
        for key in ["a", "b", "c", "d"] {
            seen.insert(key.into());
        }
        assert_eq!(seen.len(), 3);
        assert!(!seen.contains("a"));
        assert!(seen.contains("d"));

        // re-inserting an evicted key counts as new
        assert!(seen.insert("a".into()));
        assert!(!seen.contains("b"));
    }

    #[test]
    fn test_seeing_again_refreshes_key() {
        let mut seen = SeenSet::with_capacity(3);
        for key in ["a", "b", "c"] {
            seen.insert(key.into());
        }
        assert!(!seen.insert("a".into()));

        // "b" is now the least recently seen
        assert!(seen.insert("d".into()));
        assert!(seen.contains("a"));
        assert!(!seen.contains("b"));
        assert!(seen.contains("c"));
    }

    #[test]
    fn test_clear() {
        let mut seen = SeenSet::with_capacity(0);
        assert_eq!(seen.capacity(), 1);
        seen.insert("a".into());
        seen.clear();
        assert!(seen.is_empty());
        assert!(!seen.contains("a"));
    }
}
