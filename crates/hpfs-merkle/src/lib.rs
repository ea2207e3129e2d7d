//! Incrementally maintained Merkle-XOR hash tree over the virtual filesystem, plus
//! the reserved-path query surface that exposes it (spec.md §4.E/§4.F/§4.G).

mod query;
mod store;
mod tree;

pub use query::{parse_request_path, HashQuery, ParsedRequest, QueryMode, QueryStat};
pub use store::{HashStore, VnodeHmap};
pub use tree::HashTree;
