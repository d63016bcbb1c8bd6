//! Backlog queue and the bounded completed ring.
//!
//! The queue stores issue ids in insertion order; scheduling order is derived
//! on every decision by [`scheduler::compare_issues`] and never stored.

pub mod scheduler;

pub use scheduler::{compare_issues, pick_next, sorted_ids};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Issues kept in the completed ring before the oldest is evicted.
pub const COMPLETED_CAPACITY: usize = 10;

/// Ordered set of issue ids. Duplicates are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Queue {
    ids: Vec<String>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id. Returns false if it was already queued.
    pub fn add(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Insert at the front (used when a refactor request re-queues an issue).
    pub fn push_front(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.contains(&id) {
            return false;
        }
        self.ids.insert(0, id);
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|i| i != id);
        self.ids.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

impl<S: Into<String>> FromIterator<S> for Queue {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut q = Queue::new();
        for id in iter {
            q.add(id);
        }
        q
    }
}

/// The most recent completions, newest last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CompletedRing {
    ids: VecDeque<String>,
}

impl CompletedRing {
    pub fn push(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.ids.retain(|i| *i != id);
        if self.ids.len() >= COMPLETED_CAPACITY {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|i| i != id);
        self.ids.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl From<Vec<String>> for CompletedRing {
    fn from(ids: Vec<String>) -> Self {
        let mut ring = CompletedRing::default();
        for id in ids {
            ring.push(id);
        }
        ring
    }
}

impl From<CompletedRing> for Vec<String> {
    fn from(ring: CompletedRing) -> Self {
        ring.ids.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_rejects_duplicates() {
        let mut q = Queue::new();
        assert!(q.add("bd-1"));
        assert!(!q.add("bd-1"));
        assert!(!q.push_front("bd-1"));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_queue_push_front_and_remove() {
        let mut q: Queue = ["a", "b"].into_iter().collect();
        assert!(q.push_front("c"));
        assert_eq!(q.ids(), &["c", "a", "b"]);
        assert!(q.remove("a"));
        assert!(!q.remove("a"));
        assert_eq!(q.ids(), &["c", "b"]);
    }

    #[test]
    fn test_completed_ring_evicts_oldest() {
        let mut ring = CompletedRing::default();
        for i in 0..COMPLETED_CAPACITY {
            ring.push(format!("i{}", i));
        }
        assert_eq!(ring.len(), COMPLETED_CAPACITY);
        ring.push("i10");
        assert_eq!(ring.len(), COMPLETED_CAPACITY);
        assert!(!ring.contains("i0"));
        assert!(ring.contains("i1"));
        assert_eq!(ring.iter().last().map(String::as_str), Some("i10"));
    }

    #[test]
    fn test_completed_ring_from_oversized_vec() {
        let ids: Vec<String> = (0..15).map(|i| format!("i{}", i)).collect();
        let ring: CompletedRing = serde_json::from_str(&serde_json::to_string(&ids).unwrap()).unwrap();
        assert_eq!(ring.len(), COMPLETED_CAPACITY);
        assert!(ring.contains("i14"));
        assert!(!ring.contains("i4"));
    }

    #[test]
    fn test_queue_serializes_as_array() {
        let q: Queue = ["x", "y"].into_iter().collect();
        assert_eq!(serde_json::to_string(&q).unwrap(), r#"["x","y"]"#);
    }
}
