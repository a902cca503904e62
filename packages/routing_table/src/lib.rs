//! A Kademlia routing table: a binary trie of k-buckets over the 160-bit id
//! space, splitting only where the local node's id lives.

pub mod bucket;
pub mod node;
pub mod table;

pub use bucket::Bucket;
pub use node::{Node, NodeStatus};
pub use table::{RoutingTable, DEFAULT_K};
