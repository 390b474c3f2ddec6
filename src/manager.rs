//! The share manager: the public facade composing the file table, the three
//! indices, the scanner lifecycle, and the query engine.
//!
//! ## Locking
//!
//! Two locks, never held across each other's blocking points:
//!
//! - the **table lock** (`Shared::table`) guards every index and table
//!   mutation, query evaluation, and the routing-table rebuild. Content
//!   hashing happens outside it; the lock is re-acquired briefly per file to
//!   commit a registration.
//! - the **scan lock** (`ShareManager::scan`) guards the running-scan handle.
//!   Replacing a scan cancels the old token and joins the old thread while
//!   holding only this lock, so the dying scanner can still acquire the table
//!   lock to finish its in-flight commit.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{canonicalize_existing_path, canonicalize_strict, Result};
use crate::ext::{
    CreationTimeCache, HashService, IdentityNormalizer, InMemoryCreationTimes, MetadataSource,
    NoMetadata, NullObserver, ObserverSink, PathNormalizer, SettingsProvider, ShareSettings,
};
use crate::hash::Blake3Hasher;
use crate::index::{extract_keywords, DirectoryIndex, KeywordIndex, UrnIndex};
use crate::query::{evaluate, RoutingCache, RoutingTable};
use crate::scanner::{self, ProgressSnapshot, ScanProgress};
use crate::table::FileTable;
use crate::types::{
    CompleteFile, FileRecord, IncompleteFile, QueryRequest, Response, ShareEvent, Urn,
    VerificationRanges,
};

/// Extensions the installer-artifact heuristic recognizes. Bundled installers
/// carry the product prefix; recording their modification time as a creation
/// time would pollute "recently added" views.
const INSTALLER_EXTENSIONS: &[&str] = &["exe", "msi", "bin", "dmg"];

/// Everything guarded by the table lock. The indices hold slot numbers only;
/// the table owns the records.
#[derive(Debug, Default)]
pub(crate) struct TableState {
    pub table: FileTable,
    pub keywords: KeywordIndex,
    pub urns: UrnIndex,
    pub dirs: DirectoryIndex,
    pub routing: RoutingCache,
}

impl TableState {
    /// Drops every record and index entry. The scanner's full rebuild starts
    /// here.
    pub fn reset(&mut self) {
        self.table.reset();
        self.keywords.clear();
        self.urns.clear();
        self.dirs.clear();
        self.routing.mark_dirty();
    }
}

/// State shared between the facade and the scanner thread.
pub(crate) struct Shared {
    pub table: Mutex<TableState>,
    pub progress: ScanProgress,
    pub settings: Arc<dyn SettingsProvider>,
    pub hasher: Arc<dyn HashService>,
    pub normalizer: Arc<dyn PathNormalizer>,
    pub ctimes: Arc<dyn CreationTimeCache>,
    pub observer: Arc<dyn ObserverSink>,
    pub metadata: Arc<dyn MetadataSource>,
}

impl Shared {
    /// Registers a complete file: canonicalize, check shareability, hash
    /// outside the lock, then commit into the table and all three indices in
    /// one critical section. Any failure skips the file and returns `None`.
    pub(crate) fn register_complete(
        &self,
        path: &Path,
        settings: &ShareSettings,
        token: &CancelToken,
        notify: bool,
    ) -> Option<FileRecord> {
        let canonical = canonicalize_strict(path)?;
        if !scanner::is_shareable(&canonical, settings) {
            return None;
        }

        // The dominant cost of a scan; must not block concurrent queries.
        let urns = match self.hasher.compute_hashes(&canonical, token) {
            Ok(urns) if !urns.is_empty() => urns,
            Ok(_) => {
                debug!(path = %canonical.display(), "no hashes produced, skipping");
                return None;
            }
            Err(error) => {
                debug!(path = %canonical.display(), %error, "hashing failed, skipping");
                return None;
            }
        };
        // Registration after cancellation would outlive the scan that asked
        // for it; discard instead.
        if token.is_cancelled() {
            return None;
        }

        let meta = fs::metadata(&canonical).ok()?;
        let size_bytes = meta.len();
        let modified_at = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);

        let record = {
            let mut state = self.table.lock();
            if state.table.lookup_canonical(&canonical).is_some() {
                // Raced with another registration of the same path.
                return None;
            }
            let slot = state.table.allocate_slot();
            let record = FileRecord::Complete(CompleteFile {
                slot,
                canonical_path: canonical.clone(),
                size_bytes,
                urns: urns.clone(),
                hit_count: 0,
                modified_at,
            });
            state.table.put(slot, record.clone());

            if let Some(parent) = canonical.parent() {
                if !state.dirs.insert(parent, slot) {
                    debug_assert!(
                        false,
                        "parent directory {} not registered",
                        parent.display()
                    );
                    warn!(
                        parent = %parent.display(),
                        file = %canonical.display(),
                        "parent directory missing from index, file left out of directory index"
                    );
                }
            }
            let normalized = self.normalizer.normalize(&canonical.to_string_lossy());
            for keyword in extract_keywords(&normalized) {
                state.keywords.insert(&keyword, slot);
            }
            for urn in &urns {
                state.urns.insert(*urn, slot);
            }
            state.routing.mark_dirty();
            debug_assert!(self.consistent(&state));
            record
        };

        if notify {
            self.observer.notify(ShareEvent::FileAdded(record.clone()));
        }

        // Opportunistic creation-time recording: first sighting of this
        // content gets the file's modification time, installers excepted.
        if let Some(primary) = record.primary_urn() {
            if self.ctimes.get(primary).is_none()
                && !is_installer_artifact(&record.file_name(), settings)
            {
                self.ctimes.add(*primary, modified_at);
                self.ctimes.commit(primary);
            }
        }
        Some(record)
    }

    /// Removes a registered file. Complete records come back to the caller;
    /// incomplete records are unregistered but reported as `None` (nothing
    /// was "really" unshared).
    fn remove_inner(&self, path: &Path, notify: bool) -> Option<FileRecord> {
        let canonical = canonicalize_existing_path(path);
        let (removed, evicted_ctime) = {
            let mut state = self.table.lock();
            let slot = state.table.lookup_canonical(&canonical)?.slot();
            let record = state.table.tombstone(slot)?;
            let mut evicted = None;
            match &record {
                FileRecord::Incomplete(incomplete) => {
                    for urn in &incomplete.urns {
                        state.urns.remove(urn, slot);
                    }
                }
                FileRecord::Complete(complete) => {
                    if let Some(parent) = complete.canonical_path.parent() {
                        state.dirs.remove(parent, slot);
                    }
                    let normalized = self
                        .normalizer
                        .normalize(&complete.canonical_path.to_string_lossy());
                    for keyword in extract_keywords(&normalized) {
                        state.keywords.remove(&keyword, slot);
                    }
                    for urn in &complete.urns {
                        state.urns.remove(urn, slot);
                    }
                    // Last reference gone: the creation-time entry follows.
                    if let Some(primary) = record.primary_urn() {
                        if !state.urns.contains(primary) {
                            evicted = Some(*primary);
                        }
                    }
                }
            }
            state.routing.mark_dirty();
            debug_assert!(self.consistent(&state));
            (record, evicted)
        };

        if let Some(urn) = evicted_ctime {
            self.ctimes.remove(&urn);
        }
        match removed {
            FileRecord::Incomplete(_) => None,
            complete => {
                if notify {
                    self.observer.notify(ShareEvent::FileRemoved(complete.clone()));
                }
                Some(complete)
            }
        }
    }

    /// Deep cross-index consistency check (`repOk`). Debug builds assert it
    /// after every mutation; release builds never call it.
    fn consistent(&self, state: &TableState) -> bool {
        if !state.table.invariants_hold() {
            return false;
        }
        for record in state.table.iter_live() {
            let slot = record.slot();
            match record {
                FileRecord::Complete(complete) => {
                    let normalized = self
                        .normalizer
                        .normalize(&complete.canonical_path.to_string_lossy());
                    for keyword in extract_keywords(&normalized) {
                        if !state.keywords.contains(&keyword, slot) {
                            return false;
                        }
                    }
                    if let Some(parent) = complete.canonical_path.parent() {
                        if let Some(members) = state.dirs.members(parent) {
                            if !members.contains(&slot) {
                                return false;
                            }
                        }
                    }
                    for urn in &complete.urns {
                        if !state.urns.lookup(urn).is_some_and(|s| s.contains(&slot)) {
                            return false;
                        }
                    }
                }
                FileRecord::Incomplete(incomplete) => {
                    for urn in &incomplete.urns {
                        if !state.urns.lookup(urn).is_some_and(|s| s.contains(&slot)) {
                            return false;
                        }
                    }
                }
            }
        }
        // No keyword set may reference a dead or incomplete slot.
        for (_, slots) in state.keywords.iter() {
            for slot in slots {
                let live_complete = state
                    .table
                    .get(*slot as usize)
                    .ok()
                    .flatten()
                    .is_some_and(FileRecord::is_complete);
                if !live_complete {
                    return false;
                }
            }
        }
        true
    }
}

/// The running scan: its cancel token and the thread to join when replacing
/// it.
struct ScanHandle {
    token: CancelToken,
    thread: JoinHandle<()>,
}

/// The shared-file library facade. One owned instance, handed by reference to
/// collaborators; no process-wide state.
pub struct ShareManager {
    shared: Arc<Shared>,
    scan: Mutex<Option<ScanHandle>>,
}

impl ShareManager {
    /// A manager with default collaborators: blake3 hashing, pass-through
    /// normalization, in-memory creation times, no observer, no metadata.
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self::with_collaborators(
            settings,
            Arc::new(Blake3Hasher),
            Arc::new(IdentityNormalizer),
            Arc::new(InMemoryCreationTimes::default()),
            Arc::new(NullObserver),
            Arc::new(NoMetadata),
        )
    }

    pub fn with_collaborators(
        settings: Arc<dyn SettingsProvider>,
        hasher: Arc<dyn HashService>,
        normalizer: Arc<dyn PathNormalizer>,
        ctimes: Arc<dyn CreationTimeCache>,
        observer: Arc<dyn ObserverSink>,
        metadata: Arc<dyn MetadataSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(TableState::default()),
                progress: ScanProgress::default(),
                settings,
                hasher,
                normalizer,
                ctimes,
                observer,
                metadata,
            }),
            scan: Mutex::new(None),
        }
    }

    /// Starts a background scan of the configured shared roots. A running
    /// scan is cancelled and joined first, so rapid settings changes always
    /// converge to the newest configuration.
    pub fn start_scan(&self) {
        let mut scan = self.scan.lock();
        if let Some(handle) = scan.take() {
            handle.token.cancel();
            let _ = handle.thread.join();
        }
        let token = CancelToken::new();
        let shared = Arc::clone(&self.shared);
        let scan_token = token.clone();
        let thread = thread::spawn(move || scanner::run_scan(&shared, &scan_token));
        *scan = Some(ScanHandle { token, thread });
    }

    /// Alias for [`start_scan`](Self::start_scan).
    pub fn rescan(&self) {
        self.start_scan();
    }

    /// Blocks until the current scan, if any, has exited.
    pub fn wait_for_scan(&self) {
        let handle = self.scan.lock().take();
        if let Some(handle) = handle {
            let _ = handle.thread.join();
        }
    }

    /// Shares a single file now. Fails (`None`) when the path does not
    /// resolve, is not shareable under current settings, or hashing fails.
    pub fn add_file(&self, path: &Path) -> Option<FileRecord> {
        let settings = self.shared.settings.settings();
        self.shared
            .register_complete(path, &settings, &CancelToken::new(), true)
    }

    /// Registers an in-progress download for partial-file sharing. A second
    /// call with a hash already resolving to the same path is a no-op, so a
    /// download known by content is never double-registered. Requires at
    /// least one hash.
    pub fn add_incomplete(
        &self,
        path: &Path,
        urns: BTreeSet<Urn>,
        declared_final_name: &str,
        declared_final_size: u64,
        verification: VerificationRanges,
    ) {
        if urns.is_empty() {
            return;
        }
        let canonical = canonicalize_existing_path(path);
        let record = {
            let mut state = self.shared.table.lock();
            for urn in &urns {
                let already_known = state.urns.lookup(urn).is_some_and(|slots| {
                    slots.iter().any(|slot| {
                        state
                            .table
                            .get(*slot as usize)
                            .ok()
                            .flatten()
                            .is_some_and(|record| record.canonical_path() == canonical)
                    })
                });
                if already_known {
                    return;
                }
            }
            if state.table.lookup_canonical(&canonical).is_some() {
                return;
            }
            let slot = state.table.allocate_slot();
            let record = FileRecord::Incomplete(IncompleteFile {
                slot,
                canonical_path: canonical,
                size_bytes: declared_final_size,
                urns: urns.clone(),
                declared_final_name: declared_final_name.to_string(),
                declared_final_size,
                verification,
            });
            state.table.put(slot, record.clone());
            for urn in &urns {
                state.urns.insert(*urn, slot);
            }
            state.routing.mark_dirty();
            debug_assert!(self.shared.consistent(&state));
            record
        };
        self.shared.observer.notify(ShareEvent::FileAdded(record));
    }

    /// Unshares a file. Returns the removed record for complete files; `None`
    /// for unknown paths and for incomplete files (which are unregistered but
    /// were never "really" shared). Removing an already-removed path mutates
    /// nothing.
    pub fn remove_file(&self, path: &Path) -> Option<FileRecord> {
        self.shared.remove_inner(path, true)
    }

    /// Moves a registration from `old` to `new` as remove-then-add.
    ///
    /// Not atomic: when re-registration of `new` fails, `old` is already
    /// unshared and stays that way; the observer sees a `FileRemoved` event
    /// in that case instead of `FileRenamed`.
    pub fn rename_file(&self, old: &Path, new: &Path) -> Option<FileRecord> {
        let old_record = self.shared.remove_inner(old, false)?;
        let settings = self.shared.settings.settings();
        match self
            .shared
            .register_complete(new, &settings, &CancelToken::new(), false)
        {
            Some(new_record) => {
                self.shared.observer.notify(ShareEvent::FileRenamed {
                    old: old_record,
                    new: new_record.clone(),
                });
                Some(new_record)
            }
            None => {
                self.shared
                    .observer
                    .notify(ShareEvent::FileRemoved(old_record));
                None
            }
        }
    }

    /// Re-registers a file whose content changed, preserving its recorded
    /// creation time across the hash change. Observers see `FileChanged` when
    /// both sides succeed and `FileRemoved` when the new content could not be
    /// registered.
    pub fn file_changed(&self, path: &Path) -> Option<FileRecord> {
        let preserved = {
            let canonical = canonicalize_existing_path(path);
            let state = self.shared.table.lock();
            let record = state.table.lookup_canonical(&canonical)?;
            record.primary_urn().and_then(|urn| self.shared.ctimes.get(urn))
        };
        let old_record = self.shared.remove_inner(path, false)?;
        let settings = self.shared.settings.settings();
        match self
            .shared
            .register_complete(path, &settings, &CancelToken::new(), false)
        {
            Some(new_record) => {
                if let (Some(timestamp), Some(primary)) = (preserved, new_record.primary_urn()) {
                    self.shared.ctimes.add(*primary, timestamp);
                    self.shared.ctimes.commit(primary);
                }
                self.shared.observer.notify(ShareEvent::FileChanged {
                    old: old_record,
                    new: new_record.clone(),
                });
                Some(new_record)
            }
            None => {
                self.shared
                    .observer
                    .notify(ShareEvent::FileRemoved(old_record));
                None
            }
        }
    }

    /// Evaluates a query. Never fails; no match is an empty vector.
    pub fn query(&self, request: &QueryRequest) -> Vec<Response> {
        let outcome = {
            let mut state = self.shared.table.lock();
            let TableState {
                table,
                keywords,
                urns,
                ..
            } = &mut *state;
            evaluate(
                table,
                keywords,
                urns,
                &*self.shared.ctimes,
                &*self.shared.normalizer,
                &*self.shared.metadata,
                request,
            )
        };
        for record in outcome.touched {
            self.shared.observer.notify(ShareEvent::FileTouched(record));
        }
        outcome.responses
    }

    /// A copy of the routing table, rebuilt first if any mutation happened
    /// since the last fetch.
    pub fn get_routing_table(&self) -> RoutingTable {
        let mut state = self.shared.table.lock();
        let TableState {
            table,
            keywords,
            routing,
            ..
        } = &mut *state;
        routing.snapshot(|| {
            let entries = keywords.len() + table.complete_count() as usize;
            let mut rebuilt = RoutingTable::with_capacity(entries);
            for (keyword, _) in keywords.iter() {
                rebuilt.insert(keyword);
            }
            for record in table.all_live() {
                if let Some(primary) = record.primary_urn() {
                    rebuilt.insert(&primary.to_string());
                }
            }
            rebuilt
        })
    }

    /// Slot access; out-of-range indices are a programmer error.
    pub fn get(&self, slot: usize) -> Result<Option<FileRecord>> {
        self.shared
            .table
            .lock()
            .table
            .get(slot)
            .map(|record| record.cloned())
    }

    pub fn get_by_path(&self, path: &Path) -> Option<FileRecord> {
        self.shared.table.lock().table.lookup_by_path(path).cloned()
    }

    /// Any live record carrying this hash, lowest slot first.
    pub fn get_by_urn(&self, urn: &Urn) -> Option<FileRecord> {
        let state = self.shared.table.lock();
        let slots = state.urns.lookup(urn)?;
        let mut sorted: Vec<u32> = slots.iter().copied().collect();
        sorted.sort_unstable();
        sorted
            .into_iter()
            .find_map(|slot| state.table.get(slot as usize).ok().flatten().cloned())
    }

    pub fn contains_urn(&self, urn: &Urn) -> bool {
        self.shared.table.lock().urns.contains(urn)
    }

    pub fn all_complete(&self) -> Vec<FileRecord> {
        self.shared
            .table
            .lock()
            .table
            .all_live()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn all_incomplete(&self) -> Vec<FileRecord> {
        self.shared
            .table
            .lock()
            .table
            .iter_live()
            .filter(|record| !record.is_complete())
            .cloned()
            .collect()
    }

    /// Sum of live complete sizes, clamped per record for reporting.
    pub fn total_size(&self) -> u64 {
        self.shared.table.lock().table.total_size()
    }

    pub fn complete_count(&self) -> u32 {
        self.shared.table.lock().table.complete_count()
    }

    pub fn incomplete_count(&self) -> u32 {
        self.shared.table.lock().table.incomplete_count()
    }

    /// Files discovered by the running scan but not yet hashed and
    /// registered.
    pub fn pending_count(&self) -> usize {
        self.shared.progress.pending()
    }

    pub fn scan_progress(&self) -> ProgressSnapshot {
        self.shared.progress.snapshot()
    }

    /// The shareability predicate under current settings, exposed for UI
    /// validation.
    pub fn is_shareable(&self, path: &Path) -> bool {
        scanner::is_shareable(path, &self.shared.settings.settings())
    }
}

impl Drop for ShareManager {
    fn drop(&mut self) {
        // Leave no scanner thread mutating a dead manager's state.
        let handle = self.scan.lock().take();
        if let Some(handle) = handle {
            handle.token.cancel();
            let _ = handle.thread.join();
        }
    }
}

fn is_installer_artifact(name: &str, settings: &ShareSettings) -> bool {
    if !settings.matches_product_prefix(name) {
        return false;
    }
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    INSTALLER_EXTENSIONS.contains(&extension.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::{ExtensionMediaFilter, StaticSettings};
    use crate::hash::digest_bytes;
    use crate::types::{BROWSE_QUERY, INDEXING_QUERY};
    use std::io::Write;
    use std::path::PathBuf;

    struct Fixture {
        manager: ShareManager,
        settings: Arc<StaticSettings>,
        observer: Arc<CollectingObserver>,
        ctimes: Arc<InMemoryCreationTimes>,
        root: tempfile::TempDir,
    }

    #[derive(Default)]
    struct CollectingObserver {
        events: Mutex<Vec<ShareEvent>>,
    }

    impl ObserverSink for CollectingObserver {
        fn notify(&self, event: ShareEvent) {
            self.events.lock().push(event);
        }
    }

    impl CollectingObserver {
        fn count_where(&self, pred: impl Fn(&ShareEvent) -> bool) -> usize {
            self.events.lock().iter().filter(|e| pred(e)).count()
        }
    }

    fn fixture(extensions: &[&str]) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let settings = Arc::new(StaticSettings::new(ShareSettings {
            shared_roots: vec![root.path().to_path_buf()],
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            product_prefix: "fileshare".into(),
        }));
        let observer = Arc::new(CollectingObserver::default());
        let ctimes = Arc::new(InMemoryCreationTimes::default());
        let manager = ShareManager::with_collaborators(
            settings.clone(),
            Arc::new(Blake3Hasher),
            Arc::new(IdentityNormalizer),
            ctimes.clone(),
            observer.clone(),
            Arc::new(NoMetadata),
        );
        Fixture {
            manager,
            settings,
            observer,
            ctimes,
            root,
        }
    }

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    fn scan(fx: &Fixture) {
        fx.manager.start_scan();
        fx.manager.wait_for_scan();
    }

    fn names(responses: &[Response]) -> Vec<String> {
        let mut names: Vec<String> = responses.iter().map(|r| r.name.clone()).collect();
        names.sort();
        names
    }

    #[test]
    fn scan_registers_shareable_files_and_counts() {
        let fx = fixture(&["txt"]);
        write_file(fx.root.path(), "foo bar.txt", b"one");
        write_file(fx.root.path(), "foo baz.txt", b"two three");
        write_file(fx.root.path(), "ignored.dat", b"nope");
        scan(&fx);

        assert_eq!(fx.manager.complete_count(), 2);
        assert_eq!(fx.manager.total_size(), 3 + 9);
        assert_eq!(fx.manager.pending_count(), 0);
        assert!(!fx.manager.scan_progress().running);
        assert_eq!(
            fx.observer.count_where(|e| matches!(e, ShareEvent::ScanCompleted)),
            1
        );
        assert_eq!(
            fx.observer
                .count_where(|e| matches!(e, ShareEvent::DirectoryAdded { .. })),
            1
        );
    }

    #[test]
    fn scan_recurses_into_subdirectories() {
        let fx = fixture(&["txt"]);
        let sub = fx.root.path().join("albums");
        fs::create_dir(&sub).unwrap();
        write_file(&sub, "deep.txt", b"deep");
        write_file(fx.root.path(), "top.txt", b"top");
        scan(&fx);

        assert_eq!(fx.manager.complete_count(), 2);
        let deep = fx.manager.get_by_path(&sub.join("deep.txt")).unwrap();
        assert!(deep.is_complete());
    }

    #[test]
    fn registration_round_trip() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let path = write_file(fx.root.path(), "added.txt", b"later");

        let record = fx.manager.add_file(&path).unwrap();
        assert_eq!(record.canonical_path(), canonicalize_strict(&path).unwrap());

        let looked_up = fx.manager.get_by_path(&path).unwrap();
        assert_eq!(looked_up.slot(), record.slot());

        let removed = fx.manager.remove_file(&path).unwrap();
        assert_eq!(removed.slot(), record.slot());
        assert!(fx.manager.get_by_path(&path).is_none());
    }

    #[test]
    fn removal_is_idempotent_and_unknown_paths_are_none() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let path = write_file(fx.root.path(), "gone.txt", b"x");
        fx.manager.add_file(&path).unwrap();

        assert!(fx.manager.remove_file(&path).is_some());
        let before = fx.manager.complete_count();
        assert!(fx.manager.remove_file(&path).is_none());
        assert!(fx.manager.remove_file(Path::new("/never/registered")).is_none());
        assert_eq!(fx.manager.complete_count(), before);
    }

    #[test]
    fn query_is_and_of_prefix_ors() {
        let fx = fixture(&["txt"]);
        write_file(fx.root.path(), "foo bar.txt", b"1");
        write_file(fx.root.path(), "foo baz.txt", b"2");
        write_file(fx.root.path(), "qux.txt", b"3");
        scan(&fx);

        let foo = fx.manager.query(&QueryRequest::keywords("foo"));
        assert_eq!(names(&foo), vec!["foo bar.txt", "foo baz.txt"]);

        let foo_bar = fx.manager.query(&QueryRequest::keywords("foo bar"));
        assert_eq!(names(&foo_bar), vec!["foo bar.txt"]);

        assert!(fx.manager.query(&QueryRequest::keywords("nomatch")).is_empty());
        // Prefixes match: "ba" ORs bar and baz.
        let ba = fx.manager.query(&QueryRequest::keywords("foo ba"));
        assert_eq!(names(&ba), vec!["foo bar.txt", "foo baz.txt"]);
    }

    #[test]
    fn query_matching_is_case_insensitive() {
        let fx = fixture(&["txt"]);
        write_file(fx.root.path(), "Foo Bar.TXT", b"1");
        scan(&fx);
        assert_eq!(fx.manager.query(&QueryRequest::keywords("FOO")).len(), 1);
        assert_eq!(fx.manager.query(&QueryRequest::keywords("bar")).len(), 1);
    }

    #[test]
    fn special_queries_return_all_complete_and_no_incomplete() {
        let fx = fixture(&["txt"]);
        write_file(fx.root.path(), "a.txt", b"a");
        write_file(fx.root.path(), "b.txt", b"b");
        scan(&fx);
        let partial = write_file(fx.root.path(), "movie.part", b"partial");
        fx.manager.add_incomplete(
            &partial,
            BTreeSet::from([digest_bytes(b"final content")]),
            "movie.avi",
            100,
            VerificationRanges::default(),
        );

        for text in [INDEXING_QUERY, BROWSE_QUERY] {
            let responses = fx.manager.query(&QueryRequest::keywords(text));
            assert_eq!(names(&responses), vec!["a.txt", "b.txt"], "query {text:?}");
        }
    }

    #[test]
    fn urn_lookup_and_eviction_on_removal() {
        let fx = fixture(&["txt"]);
        let path = write_file(fx.root.path(), "hashed.txt", b"hash me");
        scan(&fx);

        let urn = digest_bytes(b"hash me");
        let record = fx.manager.get_by_urn(&urn).unwrap();
        assert_eq!(record.canonical_path(), canonicalize_strict(&path).unwrap());
        assert!(fx.manager.contains_urn(&urn));

        fx.manager.remove_file(&path);
        assert!(fx.manager.get_by_urn(&urn).is_none());
        assert!(!fx.manager.contains_urn(&urn));
        // The creation-time entry followed the last reference out.
        assert!(fx.ctimes.get(&urn).is_none());
    }

    #[test]
    fn urn_query_intersects_with_keywords() {
        let fx = fixture(&["txt"]);
        write_file(fx.root.path(), "alpha.txt", b"A");
        write_file(fx.root.path(), "beta.txt", b"B");
        scan(&fx);

        let alpha_urn = digest_bytes(b"A");
        let hits = fx.manager.query(&QueryRequest::urn(alpha_urn));
        assert_eq!(names(&hits), vec!["alpha.txt"]);

        // Keywords AND urns: mismatched combination yields nothing.
        let mismatched = fx
            .manager
            .query(&QueryRequest::keywords("beta").with_urns(vec![alpha_urn]));
        assert!(mismatched.is_empty());

        let matched = fx
            .manager
            .query(&QueryRequest::keywords("alpha").with_urns(vec![alpha_urn]));
        assert_eq!(names(&matched), vec!["alpha.txt"]);
    }

    #[test]
    fn media_filter_drops_non_matching_candidates() {
        let fx = fixture(&["txt", "mp3"]);
        write_file(fx.root.path(), "song one.mp3", b"s");
        write_file(fx.root.path(), "song two.txt", b"t");
        scan(&fx);

        let filter = Arc::new(ExtensionMediaFilter::new(["mp3"]));
        let hits = fx
            .manager
            .query(&QueryRequest::keywords("song").with_media_filter(filter));
        assert_eq!(names(&hits), vec!["song one.mp3"]);
    }

    #[test]
    fn matches_increment_hit_count_and_touch_observer() {
        let fx = fixture(&["txt"]);
        let path = write_file(fx.root.path(), "hot.txt", b"h");
        scan(&fx);

        fx.manager.query(&QueryRequest::keywords("hot"));
        fx.manager.query(&QueryRequest::keywords("hot"));
        let record = fx.manager.get_by_path(&path).unwrap();
        match record {
            FileRecord::Complete(complete) => assert_eq!(complete.hit_count, 2),
            FileRecord::Incomplete(_) => panic!("expected complete record"),
        }
        assert_eq!(
            fx.observer
                .count_where(|e| matches!(e, ShareEvent::FileTouched(_))),
            2
        );
        // Browse-style enumeration does not count as a match.
        fx.manager.query(&QueryRequest::keywords(BROWSE_QUERY));
        let record = fx.manager.get_by_path(&path).unwrap();
        if let FileRecord::Complete(complete) = record {
            assert_eq!(complete.hit_count, 2);
        }
    }

    #[test]
    fn whats_new_returns_most_recent_complete_files() {
        let fx = fixture(&["txt"]);
        for name in ["one.txt", "two.txt", "three.txt", "four.txt"] {
            write_file(fx.root.path(), name, name.as_bytes());
        }
        scan(&fx);
        // Creation times come from mtimes and may tie; pin them.
        for (i, name) in ["one.txt", "two.txt", "three.txt", "four.txt"]
            .iter()
            .enumerate()
        {
            let urn = digest_bytes(name.as_bytes());
            fx.ctimes.add(urn, 1000 + i as u64);
        }

        let recent = fx.manager.query(&QueryRequest::whats_new());
        assert_eq!(recent.len(), 3);
        assert_eq!(
            names(&recent),
            vec!["four.txt", "three.txt", "two.txt"]
        );
    }

    #[test]
    fn incomplete_files_are_urn_visible_but_keyword_invisible() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let partial = write_file(fx.root.path(), "draft.part", b"partial bytes");
        let urn = digest_bytes(b"the finished content");
        fx.manager.add_incomplete(
            &partial,
            BTreeSet::from([urn]),
            "draft.txt",
            42,
            VerificationRanges::new(vec![(0, 10)]),
        );

        assert_eq!(fx.manager.incomplete_count(), 1);
        assert!(fx.manager.get_by_urn(&urn).is_some());
        assert!(fx.manager.query(&QueryRequest::keywords("draft")).is_empty());
        // URN queries filter incomplete records out as well.
        assert!(fx.manager.query(&QueryRequest::urn(urn)).is_empty());
    }

    #[test]
    fn incomplete_registration_deduplicates_by_hash_and_path() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let partial = write_file(fx.root.path(), "dl.part", b"p");
        let urn = digest_bytes(b"dl content");
        for _ in 0..2 {
            fx.manager.add_incomplete(
                &partial,
                BTreeSet::from([urn]),
                "dl.txt",
                9,
                VerificationRanges::default(),
            );
        }
        assert_eq!(fx.manager.incomplete_count(), 1);
        assert_eq!(fx.manager.all_incomplete().len(), 1);
    }

    #[test]
    fn removing_incomplete_returns_none_but_unregisters() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let partial = write_file(fx.root.path(), "dl.part", b"p");
        let urn = digest_bytes(b"dl content");
        fx.manager.add_incomplete(
            &partial,
            BTreeSet::from([urn]),
            "dl.txt",
            9,
            VerificationRanges::default(),
        );

        assert!(fx.manager.remove_file(&partial).is_none());
        assert_eq!(fx.manager.incomplete_count(), 0);
        assert!(!fx.manager.contains_urn(&urn));
    }

    #[test]
    fn rename_moves_the_registration() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let old = write_file(fx.root.path(), "before.txt", b"same content");
        fx.manager.add_file(&old).unwrap();

        let new = fx.root.path().join("after.txt");
        fs::rename(&old, &new).unwrap();
        let renamed = fx.manager.rename_file(&old, &new).unwrap();
        assert_eq!(renamed.canonical_path(), canonicalize_strict(&new).unwrap());
        assert!(fx.manager.get_by_path(&old).is_none());
        assert!(fx.manager.get_by_path(&new).is_some());
        assert_eq!(
            fx.observer
                .count_where(|e| matches!(e, ShareEvent::FileRenamed { .. })),
            1
        );
    }

    #[test]
    fn rename_to_unshareable_target_loses_the_registration() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let old = write_file(fx.root.path(), "before.txt", b"content");
        fx.manager.add_file(&old).unwrap();

        // Disallowed extension: re-registration fails, old side stays gone.
        let new = fx.root.path().join("after.dat");
        fs::rename(&old, &new).unwrap();
        assert!(fx.manager.rename_file(&old, &new).is_none());
        assert!(fx.manager.get_by_path(&old).is_none());
        assert!(fx.manager.get_by_path(&new).is_none());
        assert_eq!(fx.manager.complete_count(), 0);
    }

    #[test]
    fn rename_of_unregistered_path_is_none() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let never = fx.root.path().join("never.txt");
        let target = write_file(fx.root.path(), "target.txt", b"t");
        assert!(fx.manager.rename_file(&never, &target).is_none());
    }

    #[test]
    fn file_changed_rehashes_and_preserves_creation_time() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let path = write_file(fx.root.path(), "evolving.txt", b"version one");
        fx.manager.add_file(&path).unwrap();

        let old_urn = digest_bytes(b"version one");
        fx.ctimes.add(old_urn, 777);

        write_file(fx.root.path(), "evolving.txt", b"version two");
        let updated = fx.manager.file_changed(&path).unwrap();
        let new_urn = digest_bytes(b"version two");
        assert_eq!(updated.primary_urn(), Some(&new_urn));
        assert!(fx.manager.get_by_urn(&old_urn).is_none());
        assert_eq!(fx.ctimes.get(&new_urn), Some(777));
        assert_eq!(
            fx.observer
                .count_where(|e| matches!(e, ShareEvent::FileChanged { .. })),
            1
        );
    }

    #[test]
    fn file_changed_on_vanished_file_reports_removal() {
        let fx = fixture(&["txt"]);
        scan(&fx);
        let path = write_file(fx.root.path(), "doomed.txt", b"d");
        fx.manager.add_file(&path).unwrap();

        fs::remove_file(&path).unwrap();
        assert!(fx.manager.file_changed(&path).is_none());
        assert!(fx.manager.get_by_path(&path).is_none());
        assert_eq!(
            fx.observer
                .count_where(|e| matches!(e, ShareEvent::FileRemoved(_))),
            1
        );
    }

    #[test]
    fn routing_table_is_stable_until_a_mutation() {
        let fx = fixture(&["txt"]);
        write_file(fx.root.path(), "routed.txt", b"r");
        scan(&fx);

        let first = fx.manager.get_routing_table();
        let second = fx.manager.get_routing_table();
        assert_eq!(first, second);
        assert!(first.contains("routed"));
        assert!(first.contains(&digest_bytes(b"r").to_string()));

        let extra = write_file(fx.root.path(), "another keyword.txt", b"a");
        fx.manager.add_file(&extra).unwrap();
        let third = fx.manager.get_routing_table();
        assert_ne!(first, third);
        assert!(third.contains("keyword"));
    }

    #[test]
    fn scan_restart_converges_to_newest_settings() {
        let fx = fixture(&["txt"]);
        write_file(fx.root.path(), "first root.txt", b"1");
        scan(&fx);
        assert_eq!(fx.manager.complete_count(), 1);

        let other = tempfile::tempdir().unwrap();
        write_file(other.path(), "second root.txt", b"2");
        fx.settings.set(ShareSettings {
            shared_roots: vec![other.path().to_path_buf()],
            extensions: vec!["txt".into()],
            product_prefix: "fileshare".into(),
        });

        // Back-to-back scans: the second cancels and supersedes the first.
        fx.manager.start_scan();
        fx.manager.start_scan();
        fx.manager.wait_for_scan();

        let shared = fx.manager.all_complete();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].file_name(), "second root.txt");
        assert!(fx
            .manager
            .get_by_path(&fx.root.path().join("first root.txt"))
            .is_none());
    }

    #[test]
    fn overlapping_roots_are_walked_once() {
        let fx = fixture(&["txt"]);
        let sub = fx.root.path().join("nested");
        fs::create_dir(&sub).unwrap();
        write_file(&sub, "once.txt", b"o");
        fx.settings.set(ShareSettings {
            shared_roots: vec![sub.clone(), fx.root.path().to_path_buf()],
            extensions: vec!["txt".into()],
            product_prefix: "fileshare".into(),
        });
        scan(&fx);

        assert_eq!(fx.manager.complete_count(), 1);
        assert_eq!(fx.manager.all_complete().len(), 1);
    }

    #[test]
    fn slot_indices_survive_removal_without_reuse() {
        let fx = fixture(&["txt"]);
        write_file(fx.root.path(), "a.txt", b"a");
        write_file(fx.root.path(), "b.txt", b"b");
        scan(&fx);

        let a = fx.manager.get_by_path(&fx.root.path().join("a.txt")).unwrap();
        fx.manager.remove_file(&fx.root.path().join("a.txt"));
        assert!(fx.manager.get(a.slot() as usize).unwrap().is_none());

        let c = write_file(fx.root.path(), "c.txt", b"c");
        let added = fx.manager.add_file(&c).unwrap();
        assert_eq!(added.slot(), 2);
        assert!(fx.manager.get(99).is_err());
    }

    #[test]
    fn installer_artifacts_get_no_creation_time_entry() {
        let fx = fixture(&["txt"]);
        write_file(fx.root.path(), "FileShare-setup.bin", b"installer");
        write_file(fx.root.path(), "normal.txt", b"normal");
        scan(&fx);

        assert_eq!(fx.manager.complete_count(), 2);
        assert!(fx.ctimes.get(&digest_bytes(b"installer")).is_none());
        assert!(fx.ctimes.get(&digest_bytes(b"normal")).is_some());
    }
}
