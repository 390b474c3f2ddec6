//! The file table: a growable slot array of records plus the canonical-path
//! map.
//!
//! Slot allocation is monotonic. A removed record's slot is tombstoned and the
//! index is never handed to a new record, so a slot number published to peers
//! stays valid for the record's whole lifetime. This is why the table carries
//! no freelist.

use std::path::{Path, PathBuf};

use fnv::FnvHashMap;

use crate::error::{canonicalize_strict, Result, ShareError};
use crate::types::{FileRecord, MAX_FILE_SIZE};

#[derive(Debug, Default)]
pub struct FileTable {
    slots: Vec<Option<FileRecord>>,
    by_path: FnvHashMap<PathBuf, u32>,
    total_size: u64,
    complete_count: u32,
    incomplete_count: u32,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears everything. Used by the scanner's full rebuild.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.by_path.clear();
        self.total_size = 0;
        self.complete_count = 0;
        self.incomplete_count = 0;
    }

    /// Reserves the next slot index. The caller fills it with [`put`].
    ///
    /// [`put`]: FileTable::put
    pub fn allocate_slot(&mut self) -> u32 {
        let index = self.slots.len() as u32;
        self.slots.push(None);
        index
    }

    /// Installs a record into a freshly allocated slot and the path map.
    pub fn put(&mut self, index: u32, record: FileRecord) {
        debug_assert_eq!(record.slot(), index, "record slot mismatch");
        debug_assert!(
            self.slots[index as usize].is_none(),
            "slot already occupied"
        );
        debug_assert!(
            !self.by_path.contains_key(record.canonical_path()),
            "path already registered"
        );
        self.by_path
            .insert(record.canonical_path().to_path_buf(), index);
        match &record {
            FileRecord::Complete(f) => {
                self.total_size = self
                    .total_size
                    .saturating_add(f.size_bytes.min(MAX_FILE_SIZE));
                self.complete_count += 1;
            }
            FileRecord::Incomplete(_) => self.incomplete_count += 1,
        }
        self.slots[index as usize] = Some(record);
    }

    /// Empties a slot, returning the record that occupied it. The index is
    /// never reassigned.
    pub fn tombstone(&mut self, index: u32) -> Option<FileRecord> {
        let record = self.slots.get_mut(index as usize)?.take()?;
        self.by_path.remove(record.canonical_path());
        match &record {
            FileRecord::Complete(f) => {
                self.total_size = self
                    .total_size
                    .saturating_sub(f.size_bytes.min(MAX_FILE_SIZE));
                self.complete_count -= 1;
            }
            FileRecord::Incomplete(_) => self.incomplete_count -= 1,
        }
        Some(record)
    }

    /// Slot access. Out-of-bounds indices are a programmer error and fail
    /// loudly; a tombstoned slot is `Ok(None)`.
    pub fn get(&self, index: usize) -> Result<Option<&FileRecord>> {
        self.slots
            .get(index)
            .map(Option::as_ref)
            .ok_or(ShareError::IndexOutOfRange(index))
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut FileRecord> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Looks a record up by path, canonicalizing first. A path that no longer
    /// resolves yields `None` rather than an error.
    pub fn lookup_by_path(&self, path: &Path) -> Option<&FileRecord> {
        let canonical = canonicalize_strict(path)?;
        self.lookup_canonical(&canonical)
    }

    /// Looks up by an already canonical path.
    pub fn lookup_canonical(&self, canonical: &Path) -> Option<&FileRecord> {
        let index = *self.by_path.get(canonical)?;
        self.slots[index as usize].as_ref()
    }

    /// Live complete records in slot order. Slot order makes browse-style
    /// enumerations deterministic.
    pub fn all_live(&self) -> Vec<&FileRecord> {
        self.slots
            .iter()
            .flatten()
            .filter(|record| record.is_complete())
            .collect()
    }

    /// All live records, complete and incomplete, in slot order.
    pub fn iter_live(&self) -> impl Iterator<Item = &FileRecord> {
        self.slots.iter().flatten()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Sum of live complete sizes, each clamped to [`MAX_FILE_SIZE`] for
    /// reporting.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn complete_count(&self) -> u32 {
        self.complete_count
    }

    pub fn incomplete_count(&self) -> u32 {
        self.incomplete_count
    }

    /// Deep consistency check: recomputes every aggregate and verifies the
    /// path map against the slot array. Debug builds assert on this after
    /// every mutation.
    pub fn invariants_hold(&self) -> bool {
        let mut total = 0u64;
        let mut complete = 0u32;
        let mut incomplete = 0u32;
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(record) = slot else { continue };
            if record.slot() as usize != index {
                return false;
            }
            if self.by_path.get(record.canonical_path()) != Some(&(index as u32)) {
                return false;
            }
            match record {
                FileRecord::Complete(f) => {
                    total = total.saturating_add(f.size_bytes.min(MAX_FILE_SIZE));
                    complete += 1;
                }
                FileRecord::Incomplete(_) => incomplete += 1,
            }
        }
        self.by_path.len() == (complete + incomplete) as usize
            && total == self.total_size
            && complete == self.complete_count
            && incomplete == self.incomplete_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompleteFile, Urn};
    use std::collections::BTreeSet;

    fn complete(slot: u32, path: &str, size: u64) -> FileRecord {
        FileRecord::Complete(CompleteFile {
            slot,
            canonical_path: PathBuf::from(path),
            size_bytes: size,
            urns: BTreeSet::from([Urn::from_bytes([slot as u8 + 1; 32])]),
            hit_count: 0,
            modified_at: 0,
        })
    }

    #[test]
    fn slots_are_monotonic_and_never_reused() {
        let mut table = FileTable::new();
        let a = table.allocate_slot();
        table.put(a, complete(a, "/a", 10));
        let b = table.allocate_slot();
        table.put(b, complete(b, "/b", 20));
        assert_eq!((a, b), (0, 1));

        table.tombstone(a);
        let c = table.allocate_slot();
        assert_eq!(c, 2);
        table.put(c, complete(c, "/c", 30));

        assert!(table.get(0).unwrap().is_none());
        assert!(table.get(2).unwrap().is_some());
        assert!(table.invariants_hold());
    }

    #[test]
    fn out_of_range_get_is_an_error() {
        let table = FileTable::new();
        assert!(matches!(
            table.get(5),
            Err(ShareError::IndexOutOfRange(5))
        ));
    }

    #[test]
    fn aggregates_track_mutations() {
        let mut table = FileTable::new();
        let a = table.allocate_slot();
        table.put(a, complete(a, "/a", 10));
        let b = table.allocate_slot();
        table.put(b, complete(b, "/b", 20));
        assert_eq!(table.total_size(), 30);
        assert_eq!(table.complete_count(), 2);

        table.tombstone(a);
        assert_eq!(table.total_size(), 20);
        assert_eq!(table.complete_count(), 1);
        assert!(table.invariants_hold());
    }

    #[test]
    fn oversized_record_is_clamped_for_reporting() {
        let mut table = FileTable::new();
        let a = table.allocate_slot();
        table.put(a, complete(a, "/big", u64::MAX));
        assert_eq!(table.total_size(), MAX_FILE_SIZE);
    }

    #[test]
    fn tombstone_twice_is_a_noop() {
        let mut table = FileTable::new();
        let a = table.allocate_slot();
        table.put(a, complete(a, "/a", 10));
        assert!(table.tombstone(a).is_some());
        assert!(table.tombstone(a).is_none());
        assert!(table.invariants_hold());
    }

    #[test]
    fn all_live_is_in_slot_order() {
        let mut table = FileTable::new();
        for (i, path) in ["/x", "/y", "/z"].iter().enumerate() {
            let slot = table.allocate_slot();
            table.put(slot, complete(slot, path, i as u64));
        }
        table.tombstone(1);
        let live: Vec<_> = table
            .all_live()
            .iter()
            .map(|r| r.canonical_path().to_path_buf())
            .collect();
        assert_eq!(live, vec![PathBuf::from("/x"), PathBuf::from("/z")]);
    }
}
