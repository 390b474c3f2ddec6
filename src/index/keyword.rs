//! Case-insensitive prefix index over path keywords.
//!
//! Keys live in a `BTreeMap` so a prefix search is a bounded range scan and
//! iteration order is deterministic.

use std::collections::BTreeMap;
use std::ops::Bound;

use fnv::FnvHashSet;

/// The fixed delimiter set used for both indexing and query tokenization.
pub const KEYWORD_DELIMITERS: &[char] =
    &[' ', '-', '.', '_', '+', '/', '*', '(', ')', '\\'];

/// Splits an already-normalized path string into lowercase keywords. Empty
/// tokens are discarded; duplicates keep first position.
pub fn extract_keywords(normalized: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for token in normalized.split(|c| KEYWORD_DELIMITERS.contains(&c)) {
        if token.is_empty() {
            continue;
        }
        let token = token.to_lowercase();
        if !keywords.contains(&token) {
            keywords.push(token);
        }
    }
    keywords
}

#[derive(Debug, Default)]
pub struct KeywordIndex {
    keys: BTreeMap<String, FnvHashSet<u32>>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Adds a slot under a keyword. The keyword must already be lowercase,
    /// as produced by [`extract_keywords`].
    pub fn insert(&mut self, keyword: &str, slot: u32) {
        self.keys.entry(keyword.to_string()).or_default().insert(slot);
    }

    /// Removes a slot from a keyword's set. Absent keywords are a no-op;
    /// emptied sets are pruned.
    pub fn remove(&mut self, keyword: &str, slot: u32) {
        if let Some(slots) = self.keys.get_mut(keyword) {
            slots.remove(&slot);
            if slots.is_empty() {
                self.keys.remove(keyword);
            }
        }
    }

    /// All slot sets whose key starts with `prefix`. The prefix must be
    /// lowercased by the caller, matching insert-time canonicalization.
    pub fn prefix_search<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a FnvHashSet<u32>> {
        self.keys
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(_, slots)| slots)
    }

    /// Exact-key membership test, used by the deep consistency check.
    pub fn contains(&self, keyword: &str, slot: u32) -> bool {
        self.keys
            .get(keyword)
            .is_some_and(|slots| slots.contains(&slot))
    }

    /// All (keyword, slot set) pairs, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FnvHashSet<u32>)> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Memory-compaction pass after a full rescan. A performance hint only.
    pub fn trim(&mut self) {
        for slots in self.keys.values_mut() {
            slots.shrink_to_fit();
        }
    }
}
