//! External collaborator interfaces.
//!
//! The library never reaches for process-wide state; every outside concern is
//! a trait handed to [`ShareManager`](crate::ShareManager) at construction:
//! - `SettingsProvider` — shared roots and extension allow-list, read at scan
//!   start only
//! - `HashService` — interruptible content-hash computation
//! - `PathNormalizer` — locale-aware normalization applied before tokenizing
//! - `CreationTimeCache` — the external get/put/remove/commit key-value store
//!   behind "what's new" queries
//! - `ObserverSink` — tagged share events (library display, media sync, ...)
//! - `MediaTypeFilter` / `MetadataSource` — per-query response shaping
//!
//! In-memory defaults suitable for tests and simple embedders live alongside
//! each trait.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::types::{FileRecord, ShareEvent, Urn};
use std::collections::BTreeSet;

/// Scan configuration, snapshotted once per scan.
#[derive(Debug, Clone, Default)]
pub struct ShareSettings {
    /// Root directories to share, scanned recursively.
    pub shared_roots: Vec<PathBuf>,
    /// Lowercase extensions (no dot) whose files are shareable.
    pub extensions: Vec<String>,
    /// Files whose name starts with this prefix (case-insensitively) are
    /// shareable regardless of extension. Ignored when empty.
    pub product_prefix: String,
}

impl ShareSettings {
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|allowed| allowed == ext)
    }

    pub fn matches_product_prefix(&self, name: &str) -> bool {
        !self.product_prefix.is_empty()
            && name
                .to_lowercase()
                .starts_with(&self.product_prefix.to_lowercase())
    }
}

/// Yields the current scan configuration.
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> ShareSettings;
}

/// A mutable in-memory settings holder.
#[derive(Debug, Default)]
pub struct StaticSettings {
    inner: Mutex<ShareSettings>,
}

impl StaticSettings {
    pub fn new(settings: ShareSettings) -> Self {
        Self {
            inner: Mutex::new(settings),
        }
    }

    pub fn set(&self, settings: ShareSettings) {
        *self.inner.lock() = settings;
    }
}

impl SettingsProvider for StaticSettings {
    fn settings(&self) -> ShareSettings {
        self.inner.lock().clone()
    }
}

/// Content-addressed digest computation. May be slow; must observe the
/// cancellation token between units of work.
pub trait HashService: Send + Sync {
    fn compute_hashes(&self, path: &Path, cancel: &CancelToken) -> Result<BTreeSet<Urn>>;
}

/// Locale-aware string normalization applied to path strings before keyword
/// extraction, and to query strings before matching.
pub trait PathNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> String;
}

/// Pass-through normalizer. Embedders with locale requirements supply their
/// own.
#[derive(Debug, Default)]
pub struct IdentityNormalizer;

impl PathNormalizer for IdentityNormalizer {
    fn normalize(&self, raw: &str) -> String {
        raw.to_string()
    }
}

/// The external creation-time store keyed by primary URN. Timestamps are Unix
/// seconds. By contract it tracks complete files only.
pub trait CreationTimeCache: Send + Sync {
    fn get(&self, urn: &Urn) -> Option<u64>;
    fn add(&self, urn: Urn, timestamp: u64);
    /// Marks a previously added entry as durable.
    fn commit(&self, urn: &Urn);
    fn remove(&self, urn: &Urn);
    /// The most recently created URNs, newest first.
    fn most_recent(&self, limit: usize) -> Vec<Urn>;
    fn prune(&self);
    fn persist(&self);
}

/// In-memory creation-time store.
#[derive(Debug, Default)]
pub struct InMemoryCreationTimes {
    entries: Mutex<HashMap<Urn, u64>>,
}

impl CreationTimeCache for InMemoryCreationTimes {
    fn get(&self, urn: &Urn) -> Option<u64> {
        self.entries.lock().get(urn).copied()
    }

    fn add(&self, urn: Urn, timestamp: u64) {
        self.entries.lock().insert(urn, timestamp);
    }

    fn commit(&self, _urn: &Urn) {}

    fn remove(&self, urn: &Urn) {
        self.entries.lock().remove(urn);
    }

    fn most_recent(&self, limit: usize) -> Vec<Urn> {
        let entries = self.entries.lock();
        let mut pairs: Vec<(Urn, u64)> = entries.iter().map(|(u, t)| (*u, *t)).collect();
        // Newest first; tie-break on the urn for determinism.
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs.into_iter().take(limit).map(|(u, _)| u).collect()
    }

    fn prune(&self) {}

    fn persist(&self) {}
}

/// Receives tagged share events. Delivery happens outside the table lock.
pub trait ObserverSink: Send + Sync {
    fn notify(&self, event: ShareEvent);
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullObserver;

impl ObserverSink for NullObserver {
    fn notify(&self, _event: ShareEvent) {}
}

/// Per-query filename filter (e.g. "audio only").
pub trait MediaTypeFilter: Send + Sync {
    fn allow(&self, filename: &str) -> bool;
}

/// Allows filenames whose extension is in a fixed set.
#[derive(Debug)]
pub struct ExtensionMediaFilter {
    extensions: Vec<String>,
}

impl ExtensionMediaFilter {
    pub fn new(extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().to_lowercase())
                .collect(),
        }
    }
}

impl MediaTypeFilter for ExtensionMediaFilter {
    fn allow(&self, filename: &str) -> bool {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        self.extensions.iter().any(|allowed| *allowed == ext)
    }
}

/// Supplies extended metadata for responses when a request asks for it.
pub trait MetadataSource: Send + Sync {
    fn extended_metadata(&self, record: &FileRecord) -> Option<String>;
}

/// A metadata source with nothing to say.
#[derive(Debug, Default)]
pub struct NoMetadata;

impl MetadataSource for NoMetadata {
    fn extended_metadata(&self, _record: &FileRecord) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urn(fill: u8) -> Urn {
        Urn::from_bytes([fill; 32])
    }

    #[test]
    fn most_recent_orders_newest_first() {
        let cache = InMemoryCreationTimes::default();
        cache.add(urn(1), 100);
        cache.add(urn(2), 300);
        cache.add(urn(3), 200);
        assert_eq!(cache.most_recent(2), vec![urn(2), urn(3)]);
        cache.remove(&urn(2));
        assert_eq!(cache.most_recent(2), vec![urn(3), urn(1)]);
    }

    #[test]
    fn product_prefix_match_is_case_insensitive() {
        let settings = ShareSettings {
            product_prefix: "FileShare".into(),
            ..Default::default()
        };
        assert!(settings.matches_product_prefix("fileshare-5.1.exe"));
        assert!(!settings.matches_product_prefix("other.exe"));

        // An empty prefix never matches.
        let empty = ShareSettings::default();
        assert!(!empty.matches_product_prefix("anything"));
    }

    #[test]
    fn extension_media_filter_checks_final_extension() {
        let filter = ExtensionMediaFilter::new(["mp3", "ogg"]);
        assert!(filter.allow("song.MP3"));
        assert!(filter.allow("a.b.ogg"));
        assert!(!filter.allow("movie.avi"));
        assert!(!filter.allow("noext"));
    }
}
