//! Content hash to slot-set index.

use fnv::{FnvHashMap, FnvHashSet};

use crate::types::Urn;

#[derive(Debug, Default)]
pub struct UrnIndex {
    entries: FnvHashMap<Urn, FnvHashSet<u32>>,
}

impl UrnIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn insert(&mut self, urn: Urn, slot: u32) {
        self.entries.entry(urn).or_default().insert(slot);
    }

    /// Removes a slot from a urn's set. When the set empties the entry is
    /// removed outright: `contains` doubling as a liveness check is what the
    /// creation-time eviction relies on.
    pub fn remove(&mut self, urn: &Urn, slot: u32) {
        if let Some(slots) = self.entries.get_mut(urn) {
            slots.remove(&slot);
            if slots.is_empty() {
                self.entries.remove(urn);
            }
        }
    }

    pub fn lookup(&self, urn: &Urn) -> Option<&FnvHashSet<u32>> {
        self.entries.get(urn)
    }

    pub fn contains(&self, urn: &Urn) -> bool {
        self.entries.contains_key(urn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
