//! Core record and result types for the shared-file library.
//!
//! These are the types the facade hands to its consumers. The protocol and UI
//! layers convert them to their own payloads for serialization.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ext::MediaTypeFilter;

/// Largest representable file size. Files above this are not shareable; a
/// record's size is clamped to it for aggregate reporting only.
pub const MAX_FILE_SIZE: u64 = i32::MAX as u64;

/// The legacy probe query: four literal spaces. Answered with every live
/// complete record, bypassing keyword search.
pub const INDEXING_QUERY: &str = "    ";

/// The browse-all query literal, handled identically to [`INDEXING_QUERY`].
pub const BROWSE_QUERY: &str = "*.*";

/// A content-hash identifier, the primary key for complete and incomplete
/// files alike.
///
/// Displayed as `urn:blake3:<lowercase hex>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Urn {
    bytes: [u8; 32],
}

impl Urn {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:blake3:")?;
        for byte in &self.bytes {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Urn({self})")
    }
}

/// Verification-range state for an incomplete file. Produced by the external
/// downloader; opaque to this library and carried through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationRanges(Vec<(u64, u64)>);

impl VerificationRanges {
    pub fn new(ranges: Vec<(u64, u64)>) -> Self {
        Self(ranges)
    }

    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.0
    }
}

/// A fully shared file.
#[derive(Debug, Clone)]
pub struct CompleteFile {
    /// Position in the file table; stable for the record's lifetime.
    pub slot: u32,
    pub canonical_path: PathBuf,
    pub size_bytes: u64,
    /// Non-empty; the smallest hash in order acts as the primary key.
    pub urns: BTreeSet<Urn>,
    /// Incremented on each query match. Display-only, not a correctness
    /// invariant.
    pub hit_count: u32,
    /// Last-modified time in Unix seconds, recorded at registration.
    pub modified_at: u64,
}

/// A partially downloaded file, tracked for partial-file sharing. Excluded
/// from keyword and directory indexing.
#[derive(Debug, Clone)]
pub struct IncompleteFile {
    pub slot: u32,
    pub canonical_path: PathBuf,
    pub size_bytes: u64,
    pub urns: BTreeSet<Urn>,
    pub declared_final_name: String,
    pub declared_final_size: u64,
    pub verification: VerificationRanges,
}

/// A shared-file record, complete or incomplete.
#[derive(Debug, Clone)]
pub enum FileRecord {
    Complete(CompleteFile),
    Incomplete(IncompleteFile),
}

impl FileRecord {
    pub fn slot(&self) -> u32 {
        match self {
            Self::Complete(f) => f.slot,
            Self::Incomplete(f) => f.slot,
        }
    }

    pub fn canonical_path(&self) -> &Path {
        match self {
            Self::Complete(f) => &f.canonical_path,
            Self::Incomplete(f) => &f.canonical_path,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        match self {
            Self::Complete(f) => f.size_bytes,
            Self::Incomplete(f) => f.size_bytes,
        }
    }

    pub fn urns(&self) -> &BTreeSet<Urn> {
        match self {
            Self::Complete(f) => &f.urns,
            Self::Incomplete(f) => &f.urns,
        }
    }

    /// The hash acting as primary key. Registration guarantees at least one.
    pub fn primary_urn(&self) -> Option<&Urn> {
        self.urns().iter().next()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    pub fn file_name(&self) -> String {
        self.canonical_path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A query against the shared library.
#[derive(Clone, Default)]
pub struct QueryRequest {
    /// Keyword text. Empty when the request is URN-only or what's-new.
    pub text: String,
    /// Explicit content hashes to match; intersected with the keyword result.
    pub urns: Vec<Urn>,
    /// When set, answer from the creation-time cache's most-recent files.
    pub whats_new: bool,
    /// Per-query media-type filter applied to candidate filenames.
    pub media_filter: Option<Arc<dyn MediaTypeFilter>>,
    /// Whether responses should carry extended metadata from the external
    /// metadata source.
    pub want_metadata: bool,
}

impl QueryRequest {
    pub fn keywords(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn urn(urn: Urn) -> Self {
        Self {
            urns: vec![urn],
            ..Self::default()
        }
    }

    pub fn whats_new() -> Self {
        Self {
            whats_new: true,
            ..Self::default()
        }
    }

    pub fn with_urns(mut self, urns: Vec<Urn>) -> Self {
        self.urns = urns;
        self
    }

    pub fn with_media_filter(mut self, filter: Arc<dyn MediaTypeFilter>) -> Self {
        self.media_filter = Some(filter);
        self
    }

    pub fn with_metadata(mut self) -> Self {
        self.want_metadata = true;
        self
    }
}

impl fmt::Debug for QueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRequest")
            .field("text", &self.text)
            .field("urns", &self.urns)
            .field("whats_new", &self.whats_new)
            .field("has_media_filter", &self.media_filter.is_some())
            .field("want_metadata", &self.want_metadata)
            .finish()
    }
}

/// A single query match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub slot: u32,
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub urns: Vec<Urn>,
    /// Extended metadata from the external source, present only when the
    /// request asked for it.
    pub metadata: Option<String>,
}

/// Events delivered to the observer sink.
#[derive(Debug, Clone)]
pub enum ShareEvent {
    /// A shared directory was registered during a scan. `parent` is
    /// informational: the configured or scanned directory that contained it.
    DirectoryAdded {
        path: PathBuf,
        parent: Option<PathBuf>,
    },
    FileAdded(FileRecord),
    FileRemoved(FileRecord),
    FileRenamed { old: FileRecord, new: FileRecord },
    FileChanged { old: FileRecord, new: FileRecord },
    ScanCompleted,
    /// A record matched a query.
    FileTouched(FileRecord),
}
