//! Query evaluation against the shared-file indices.
//!
//! - `engine` - keyword/URN matching, browse and what's-new handling
//! - `routing` - the derived set-membership filter advertised to peers

mod engine;
mod routing;

pub(crate) use engine::evaluate;
pub use routing::RoutingTable;
pub(crate) use routing::RoutingCache;
