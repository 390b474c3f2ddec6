//! The directory scanner: a full-rebuild walk of the configured shared roots.
//!
//! One scan runs at a time on a dedicated background thread; starting a new
//! one cancels and joins the old one first (see `manager.rs`). The walk
//! registers directories before files, collects candidate files across all
//! directories, then hashes and registers them one by one. The cancel token
//! is checked between directories and between files, never inside a single
//! file's hash computation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::canonicalize_strict;
use crate::ext::ShareSettings;
use crate::manager::Shared;
use crate::types::{ShareEvent, MAX_FILE_SIZE};

/// Scan counters, readable while a scan runs.
#[derive(Debug, Default)]
pub struct ScanProgress {
    scanned_dirs: AtomicUsize,
    scanned_files: AtomicUsize,
    /// Files discovered but not yet hashed and registered.
    pending: AtomicUsize,
    /// Files that failed registration and were skipped.
    skipped: AtomicUsize,
    running: AtomicBool,
}

impl ScanProgress {
    pub(crate) fn reset(&self) {
        self.scanned_dirs.store(0, Ordering::Relaxed);
        self.scanned_files.store(0, Ordering::Relaxed);
        self.pending.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.running.store(true, Ordering::Relaxed);
    }

    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub(crate) fn add_dir(&self) {
        self.scanned_dirs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_file(&self) {
        self.scanned_files.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_pending(&self, count: usize) {
        self.pending.store(count, Ordering::Relaxed);
    }

    pub(crate) fn file_done(&self, registered: bool) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
        if !registered {
            self.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            scanned_dirs: self.scanned_dirs.load(Ordering::Relaxed),
            scanned_files: self.scanned_files.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

/// A point-in-time copy of the scan counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub scanned_dirs: usize,
    pub scanned_files: usize,
    pub pending: usize,
    pub skipped: usize,
    pub running: bool,
}

/// The shareability predicate: regular, readable, non-empty, representable
/// size, and either carrying the product-name prefix or an allow-listed
/// extension.
pub fn is_shareable(path: &Path, settings: &ShareSettings) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    if metadata.len() == 0 || metadata.len() > MAX_FILE_SIZE {
        return false;
    }
    if fs::File::open(path).is_err() {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if settings.matches_product_prefix(&name) {
        return true;
    }
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    !extension.is_empty() && settings.allows_extension(&extension)
}

/// Runs one full scan against a settings snapshot taken at entry.
pub(crate) fn run_scan(shared: &Shared, token: &CancelToken) {
    let started = Instant::now();
    let settings = shared.settings.settings();

    // Full rebuild: indices and table drop to empty first.
    shared.table.lock().reset();
    shared.progress.reset();

    // Length-ascending order registers parents before children when one
    // configured root nests inside another.
    let mut roots = settings.shared_roots.clone();
    roots.sort_by_key(|root| root.to_string_lossy().len());

    let mut candidates: Vec<PathBuf> = Vec::new();
    for root in &roots {
        if token.is_cancelled() {
            break;
        }
        scan_directory(shared, root, None, &settings, token, &mut candidates);
    }

    shared.progress.set_pending(candidates.len());
    let total = candidates.len();
    let mut registered = 0usize;
    for path in candidates {
        if token.is_cancelled() {
            break;
        }
        let ok = shared
            .register_complete(&path, &settings, token, true)
            .is_some();
        if ok {
            registered += 1;
        }
        shared.progress.file_done(ok);
    }

    if token.is_cancelled() {
        shared.progress.finish();
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "scan interrupted");
        return;
    }

    shared.table.lock().keywords.trim();
    shared.progress.finish();
    shared.observer.notify(ShareEvent::ScanCompleted);
    debug!(
        roots = roots.len(),
        candidates = total,
        registered,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan completed"
    );
}

/// Depth-first walk of one directory. `parent` is informational, carried in
/// the directory-discovered notification only.
fn scan_directory(
    shared: &Shared,
    dir: &Path,
    parent: Option<&Path>,
    settings: &ShareSettings,
    token: &CancelToken,
    candidates: &mut Vec<PathBuf>,
) {
    if token.is_cancelled() {
        return;
    }
    let Some(canonical) = canonicalize_strict(dir) else {
        return;
    };

    // Already registered: overlapping configured roots, walk it once.
    if !shared.table.lock().dirs.register(&canonical) {
        return;
    }
    shared.progress.add_dir();
    shared.observer.notify(ShareEvent::DirectoryAdded {
        path: canonical.clone(),
        parent: parent.map(Path::to_path_buf),
    });

    let Ok(entries) = fs::read_dir(&canonical) else {
        return;
    };
    let mut subdirs: Vec<PathBuf> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            subdirs.push(path);
        } else if is_shareable(&path, settings) {
            shared.progress.add_file();
            candidates.push(path);
        }
    }
    for subdir in subdirs {
        scan_directory(shared, &subdir, Some(&canonical), settings, token, candidates);
    }
}
