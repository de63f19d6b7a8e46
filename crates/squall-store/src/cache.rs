//! Recency cache.
//!
//! The identity map only holds weak references, so an object with no
//! outside holders would be collected immediately. The recency cache pins
//! the last N retrieved objects with strong references, strict LRU order.
//! A dirty object is never evicted: its pending changes must survive until
//! the next flush.

use std::collections::VecDeque;

use crate::info::ObjectRef;

/// Bounded LRU of strong object references. Capacity 0 disables pinning.
#[derive(Debug)]
pub struct RecencyCache {
    capacity: usize,
    /// Front is most recently used.
    entries: VecDeque<ObjectRef>,
}

impl RecencyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a use of `obj`, moving it to the front and evicting from the
    /// cold end past capacity. Dirty entries are skipped by eviction; the
    /// cache may exceed capacity while many objects hold pending changes.
    pub fn note(&mut self, obj: &ObjectRef) {
        if self.capacity == 0 {
            return;
        }
        if let Some(pos) = self.position(obj) {
            self.entries.remove(pos);
        }
        self.entries.push_front(obj.clone());
        self.evict();
    }

    /// Drop an object from the cache entirely.
    pub fn remove(&mut self, obj: &ObjectRef) {
        if let Some(pos) = self.position(obj) {
            self.entries.remove(pos);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, obj: &ObjectRef) -> bool {
        self.position(obj).is_some()
    }

    fn position(&self, obj: &ObjectRef) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.object_id() == obj.object_id())
    }

    fn evict(&mut self) {
        let mut excess = self.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        // Scan from the cold end, skipping dirty entries.
        let mut index = self.entries.len();
        while excess > 0 && index > 0 {
            index -= 1;
            if !self.entries[index].is_dirty() {
                self.entries.remove(index);
                excess -= 1;
            }
        }
    }
}
