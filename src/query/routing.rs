//! The routing table: a Bloom-style membership filter over every shared
//! keyword and primary content hash.
//!
//! Peers probe it with "do you probably have X" lookups, so false positives
//! are acceptable and false negatives are not. The live copy is memoized
//! behind the table lock with a dirty flag; callers always receive a clone.

use serde::Serialize;

/// Two probe positions per token keeps the false-positive rate low at the
/// 2x-entry sizing used by [`RoutingTable::with_capacity`].
const PROBES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingTable {
    bits: Vec<u64>,
    /// Bit-position mask; capacity is always a power of two.
    mask: u64,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl RoutingTable {
    /// Creates a filter sized for roughly `entries` tokens.
    pub fn with_capacity(entries: usize) -> Self {
        let capacity = (entries.saturating_mul(2)).max(64).next_power_of_two();
        Self {
            bits: vec![0u64; capacity / 64],
            mask: (capacity - 1) as u64,
        }
    }

    fn positions(&self, token: &str) -> [u64; PROBES] {
        let digest = blake3::hash(token.as_bytes());
        let bytes = digest.as_bytes();
        let a = u64::from_le_bytes(bytes[0..8].try_into().expect("8-byte slice"));
        let b = u64::from_le_bytes(bytes[8..16].try_into().expect("8-byte slice"));
        [a & self.mask, b & self.mask]
    }

    pub fn insert(&mut self, token: &str) {
        for position in self.positions(token) {
            self.bits[(position / 64) as usize] |= 1u64 << (position % 64);
        }
    }

    /// Advisory membership test: may report tokens never inserted, never
    /// misses one that was.
    pub fn contains(&self, token: &str) -> bool {
        self.positions(token).iter().all(|position| {
            self.bits[(*position / 64) as usize] & (1u64 << (position % 64)) != 0
        })
    }

    /// Number of bit positions in the filter.
    pub fn capacity(&self) -> usize {
        self.bits.len() * 64
    }
}

/// Dirty-flag memoization of the routing table. Every index mutation marks it
/// dirty; the next fetch rebuilds under the same lock that guards the source
/// data.
#[derive(Debug)]
pub struct RoutingCache {
    table: RoutingTable,
    dirty: bool,
}

impl Default for RoutingCache {
    fn default() -> Self {
        Self {
            table: RoutingTable::default(),
            // Dirty from the start so the first fetch builds from live state.
            dirty: true,
        }
    }
}

impl RoutingCache {
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns a copy of the table, rebuilding first iff dirty.
    pub fn snapshot(&mut self, rebuild: impl FnOnce() -> RoutingTable) -> RoutingTable {
        if self.dirty {
            self.table = rebuild();
            self.dirty = false;
        }
        self.table.clone()
    }
}
