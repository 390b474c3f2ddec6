//! Canonical directory to direct-member slot set.
//!
//! The scanner registers a directory before any file beneath it; file
//! registration treats a missing parent entry as a broken invariant (policy
//! in `manager.rs`).

use std::path::{Path, PathBuf};

use fnv::{FnvHashMap, FnvHashSet};

#[derive(Debug, Default)]
pub struct DirectoryIndex {
    entries: FnvHashMap<PathBuf, FnvHashSet<u32>>,
}

impl DirectoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Registers a directory with an empty slot set. Returns false when it
    /// was already registered (overlapping configured roots).
    pub fn register(&mut self, dir: &Path) -> bool {
        if self.entries.contains_key(dir) {
            return false;
        }
        self.entries.insert(dir.to_path_buf(), FnvHashSet::default());
        true
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.entries.contains_key(dir)
    }

    /// Adds a slot to an already-registered directory. Returns false when the
    /// directory entry is absent.
    pub fn insert(&mut self, dir: &Path, slot: u32) -> bool {
        match self.entries.get_mut(dir) {
            Some(slots) => {
                slots.insert(slot);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, dir: &Path, slot: u32) {
        if let Some(slots) = self.entries.get_mut(dir) {
            slots.remove(&slot);
        }
    }

    pub fn members(&self, dir: &Path) -> Option<&FnvHashSet<u32>> {
        self.entries.get(dir)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
