//! scatter-topo — the topology data model: nodes, the node database, and
//! the found-node cache.

pub mod cache;
pub mod db;
pub mod node;

pub use cache::{CacheEntry, FoundNodeCache};
pub use db::NodeDb;
pub use node::NodeInfo;
