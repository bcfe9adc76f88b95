//! Bounded cache of parsed MFT entries.
//!
//! Entries are shared out as `Arc` handles; an entry whose handle is
//! still held by a caller is pinned and will not be evicted. Eviction is
//! least-recently-used among the unpinned entries. When every resident
//! entry is pinned the cache grows past its capacity rather than serving
//! a second live copy of the same index, and shrinks back as pins drop.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::mft::entry::MftEntry;

#[derive(Debug)]
pub struct EntryCache {
    capacity: usize,
    entries: BTreeMap<u64, Arc<MftEntry>>,
    /// Use order, oldest first.
    order: VecDeque<u64>,
}

impl EntryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: BTreeMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up an entry, marking it most recently used.
    pub fn get(&mut self, index: u64) -> Option<Arc<MftEntry>> {
        let entry = self.entries.get(&index)?.clone();
        self.touch(index);
        Some(entry)
    }

    /// Insert a freshly parsed entry, evicting if needed.
    ///
    /// If another thread has cached the same index in the meantime, its
    /// copy wins so the cache never serves two live objects for one
    /// index.
    pub fn insert(&mut self, index: u64, entry: MftEntry) -> Arc<MftEntry> {
        if let Some(existing) = self.entries.get(&index) {
            let existing = existing.clone();
            self.touch(index);
            return existing;
        }

        while self.entries.len() >= self.capacity {
            if !self.evict_one() {
                break;
            }
        }

        let entry = Arc::new(entry);
        self.entries.insert(index, entry.clone());
        self.order.push_back(index);
        entry
    }

    /// Evict the least-recently-used unpinned entry. Returns false when
    /// everything resident is pinned.
    fn evict_one(&mut self) -> bool {
        let victim = self
            .order
            .iter()
            .position(|index| {
                self.entries
                    .get(index)
                    .is_some_and(|e| Arc::strong_count(e) == 1)
            });
        let Some(pos) = victim else {
            return false;
        };
        let index = self.order.remove(pos).unwrap();
        self.entries.remove(&index);
        true
    }

    /// Whether any cached entry is still held outside the cache.
    pub fn has_pinned(&self) -> bool {
        self.entries.values().any(|e| Arc::strong_count(e) > 1)
    }

    fn touch(&mut self, index: u64) {
        if let Some(pos) = self.order.iter().position(|&i| i == index) {
            self.order.remove(pos);
            self.order.push_back(index);
        }
    }
}
