//! Shared-file indexing and query-matching library.
//!
//! This crate maintains a live, concurrently queried inventory of locally
//! shared files:
//! - Slot-stable file table with complete and incomplete records
//! - Prefix-keyword, content-hash, and directory indices kept consistent
//!   under one table lock
//! - Interruptible, restartable background rescans of the configured roots
//! - AND-of-OR keyword query evaluation and a lazily rebuilt routing-table
//!   filter for peers
//!
//! [`ShareManager`] is the facade; everything outside the library (settings,
//! hashing, locale normalization, creation times, observers) arrives through
//! the traits in [`ext`].

pub mod cancel;
pub mod error;
pub mod ext;
pub mod hash;
pub mod index;
pub mod manager;
pub mod query;
pub mod scanner;
pub mod table;
pub mod types;

// Re-export main types
pub use cancel::CancelToken;
pub use error::{Result, ShareError};
pub use ext::{
    CreationTimeCache, HashService, MediaTypeFilter, MetadataSource, ObserverSink,
    PathNormalizer, SettingsProvider, ShareSettings, StaticSettings,
};
pub use hash::Blake3Hasher;
pub use manager::ShareManager;
pub use query::RoutingTable;
pub use scanner::ProgressSnapshot;
pub use types::{
    FileRecord, QueryRequest, Response, ShareEvent, Urn, VerificationRanges,
};
