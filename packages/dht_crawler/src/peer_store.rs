use std::collections::HashMap;
use std::net::SocketAddrV4;

use krpc_encoding::NodeID;

/// Keyed by infohash, holds the peers that have announced themselves for a
/// swarm. Abstracted as a trait so a backend other than the in-memory one
/// can be swapped in without touching the query handler.
pub trait PeerStore: Send + Sync {
    fn put(&mut self, info_hash: NodeID, peer: SocketAddrV4);
    fn get(&self, info_hash: &NodeID) -> Vec<SocketAddrV4>;
}

#[derive(Default)]
pub struct InMemoryPeerStore {
    peers: HashMap<NodeID, Vec<SocketAddrV4>>,
}

impl InMemoryPeerStore {
    pub fn new() -> InMemoryPeerStore {
        InMemoryPeerStore::default()
    }
}

impl PeerStore for InMemoryPeerStore {
    fn put(&mut self, info_hash: NodeID, peer: SocketAddrV4) {
        let entries = self.peers.entry(info_hash).or_default();
        if !entries.contains(&peer) {
            entries.push(peer);
        }
    }

    fn get(&self, info_hash: &NodeID) -> Vec<SocketAddrV4> {
        self.peers.get(info_hash).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn put_is_idempotent_for_the_same_peer() {
        let mut store = InMemoryPeerStore::new();
        let ih = NodeID::generate();
        let peer = SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881);
        store.put(ih, peer);
        store.put(ih, peer);
        assert_eq!(store.get(&ih).len(), 1);
    }

    #[test]
    fn unknown_infohash_returns_empty() {
        let store = InMemoryPeerStore::new();
        assert!(store.get(&NodeID::generate()).is_empty());
    }
}
