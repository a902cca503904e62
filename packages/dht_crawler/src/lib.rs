//! Kademlia/BEP-5 BitTorrent DHT node: routing table maintenance, iterative
//! `find_node` lookups, and the query handler answering inbound requests,
//! composed into a runnable [`node::Dht`].

pub mod config;
pub mod errors;
pub mod finder;
pub mod node;
pub mod peer_store;
pub mod persistence;
pub mod query_handler;
pub mod token;

pub use config::Config;
pub use errors::{Error, Result};
pub use finder::{Finder, SeedTarget, WorkerInboxes};
pub use node::Dht;
pub use peer_store::{InMemoryPeerStore, PeerStore};
pub use persistence::{FilesystemPersistence, InMemoryPersistence, Persistence};
pub use query_handler::QueryHandler;
pub use token::TokenBuilder;
