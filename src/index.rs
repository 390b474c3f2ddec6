//! The three slot indices layered over the file table.
//!
//! Indices hold slot numbers only, never records; the table owns every
//! record. All three are mutated together under the table lock so a query
//! never observes a half-registered file.
//!
//! - `keyword` - case-insensitive prefix index over path keywords
//! - `urn` - content hash to slot set
//! - `directory` - canonical directory to the slots it directly contains

mod directory;
mod keyword;
mod urn;

pub use directory::DirectoryIndex;
pub use keyword::{extract_keywords, KeywordIndex, KEYWORD_DELIMITERS};
pub use urn::UrnIndex;
