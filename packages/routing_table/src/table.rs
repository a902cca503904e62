use std::time::Duration;

use krpc_encoding::NodeID;

use crate::bucket::Bucket;
use crate::node::Node;

pub const DEFAULT_K: usize = 8;

/// The ordered sequence of buckets covering `[0, 2^160)`, centered on
/// `local_id`. Starts as a single bucket and grows by splitting exactly the
/// bucket that straddles `local_id` whenever it overflows.
pub struct RoutingTable {
    local_id: NodeID,
    k: usize,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(local_id: NodeID) -> RoutingTable {
        RoutingTable::with_capacity(local_id, DEFAULT_K)
    }

    pub fn with_capacity(local_id: NodeID, k: usize) -> RoutingTable {
        RoutingTable {
            local_id,
            k,
            buckets: vec![Bucket::full_range(k)],
        }
    }

    pub fn local_id(&self) -> NodeID {
        self.local_id
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    fn bucket_index(&self, id: &NodeID) -> usize {
        let value = id.as_bigint();
        self.buckets
            .partition_point(|bucket| bucket.max <= value)
    }

    /// Inserts `node`, splitting the bucket containing the local id as many
    /// times as necessary. Returns `true` if the node ended up in the table.
    pub fn add_node(&mut self, node: Node) -> bool {
        if node.id == self.local_id {
            return false;
        }

        let mut idx = self.bucket_index(&node.id);
        loop {
            if self.buckets[idx].add_node(node.clone()) {
                return true;
            }

            if !self.buckets[idx].covers(&self.local_id) {
                return false;
            }

            let upper = self.buckets[idx].split();
            self.buckets.insert(idx + 1, upper);
            idx = self.bucket_index(&node.id);
        }
    }

    pub fn remove_node(&mut self, id: &NodeID) -> Option<Node> {
        let idx = self.bucket_index(id);
        self.buckets[idx].remove(id)
    }

    /// Returns the contents (already id-sorted) of the bucket covering
    /// `target`, capped at `k` entries.
    pub fn find_node(&self, target: &NodeID) -> Vec<Node> {
        let idx = self.bucket_index(target);
        self.buckets[idx].nodes.iter().take(self.k).cloned().collect()
    }

    pub fn get_node(&self, id: &NodeID) -> Option<&Node> {
        let idx = self.bucket_index(id);
        self.buckets[idx].get(id)
    }

    /// Nodes in the K closest buckets to `target`, used by the lookup engine
    /// to seed a routing-table-assisted search. Walks outward from the
    /// covering bucket until `limit` candidates are collected.
    pub fn closest_nodes(&self, target: &NodeID, limit: usize) -> Vec<Node> {
        let mut out: Vec<Node> = Vec::new();
        let idx = self.bucket_index(target);
        let (mut lo, mut hi) = (idx as isize, idx as isize);
        let mut visited_lo = false;
        let mut visited_hi = false;

        loop {
            if !visited_lo && lo >= 0 {
                out.extend(self.buckets[lo as usize].nodes.iter().cloned());
                visited_lo = true;
            }
            if !visited_hi && hi as usize != lo as usize && (hi as usize) < self.buckets.len() {
                out.extend(self.buckets[hi as usize].nodes.iter().cloned());
                visited_hi = true;
            }

            if out.len() >= limit {
                break;
            }

            let mut advanced = false;
            if lo > 0 {
                lo -= 1;
                visited_lo = false;
                advanced = true;
            }
            if (hi as usize) + 1 < self.buckets.len() {
                hi += 1;
                visited_hi = false;
                advanced = true;
            }
            if !advanced {
                break;
            }
        }

        out.sort_by_key(|n| n.id.distance(target).as_bigint());
        out.truncate(limit);
        out
    }

    /// Buckets whose contents are stale (per `BUCKET_LAST_CHANGED_TIME_LIMIT`)
    /// or empty, each paired with a random id in its range to seed a refresh
    /// lookup.
    pub fn stale_bucket_refresh_targets(&self, threshold: Duration) -> Vec<NodeID> {
        self.buckets
            .iter()
            .filter(|b| b.is_stale(threshold))
            .map(Bucket::random_id_in_range)
            .collect()
    }

    /// Marks nodes that haven't been seen within `threshold` as
    /// `Questionable` and returns clones of them for the ping-revalidation
    /// worker.
    pub fn mark_stale_nodes(&mut self, threshold: Duration) -> Vec<Node> {
        let mut stale = Vec::new();
        for bucket in self.buckets.iter_mut() {
            for node in bucket.nodes.iter_mut() {
                if node.is_stale(threshold) {
                    node.mark_questionable();
                    stale.push(node.clone());
                }
            }
        }
        stale
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &Node> {
        self.buckets.iter().flat_map(|b| b.nodes.iter())
    }

    /// Verifies the table's partition invariants. Intended for tests and
    /// debug assertions, not the hot path.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.buckets.is_empty() {
            return Err("routing table has no buckets".into());
        }
        if self.buckets.first().unwrap().min != num_bigint::BigUint::from(0u32) {
            return Err("first bucket does not start at 0".into());
        }
        let top = num_bigint::BigUint::from(1u32) << krpc_encoding::id::MAX_BITS;
        if self.buckets.last().unwrap().max != top {
            return Err("last bucket does not end at 2^160".into());
        }
        for pair in self.buckets.windows(2) {
            if pair[0].max != pair[1].min {
                return Err("adjacent buckets do not share a boundary".into());
            }
        }
        for bucket in &self.buckets {
            if bucket.len() > self.k {
                return Err("bucket exceeds capacity".into());
            }
            for node in &bucket.nodes {
                if !bucket.covers(&node.id) {
                    return Err("node outside its bucket's range".into());
                }
                if node.id == self.local_id {
                    return Err("local id present in routing table".into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(n: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, n), 6881)
    }

    fn id_from(value: u32) -> NodeID {
        NodeID::from_bigint(&BigUint::from(value))
    }

    #[test]
    fn local_id_is_never_inserted() {
        let local = NodeID::generate();
        let mut table = RoutingTable::new(local);
        assert!(!table.add_node(Node::new(local, addr(1))));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn bucket_splits_when_it_straddles_local_id() {
        let local = NodeID::from_bigint(&(BigUint::from(1u32) << 159u32));
        let mut table = RoutingTable::with_capacity(local, 8);

        for i in 0..8u32 {
            assert!(table.add_node(Node::new(id_from(i + 1), addr(i as u8 + 1))));
        }
        assert_eq!(table.bucket_count(), 1);

        let ninth = NodeID::from_bigint(&((BigUint::from(1u32) << 159u32) + BigUint::from(1u32)));
        assert!(table.add_node(Node::new(ninth, addr(9))));

        assert_eq!(table.bucket_count(), 2);
        assert_eq!(table.buckets()[0].len(), 8);
        assert_eq!(table.buckets()[1].len(), 1);
        table.check_invariants().unwrap();
    }

    #[test]
    fn non_straddling_full_bucket_drops_candidates() {
        let local = NodeID::from_bigint(&BigUint::from(0u32));
        let mut table = RoutingTable::with_capacity(local, 2);

        // Push the local bucket to split away from the low end first.
        for i in 1..=2u32 {
            table.add_node(Node::new(id_from(i), addr(i as u8)));
        }
        let far = NodeID::from_bigint(&(BigUint::from(1u32) << 159u32));
        table.add_node(Node::new(far, addr(200)));
        table.check_invariants().unwrap();

        // Now fill the bucket that does *not* contain the local id until it
        // saturates and further inserts are dropped.
        let high_bucket_id = |n: u32| NodeID::from_bigint(&((BigUint::from(1u32) << 159u32) + BigUint::from(n)));
        for n in 0..2u32 {
            table.add_node(Node::new(high_bucket_id(n + 1), addr(100 + n as u8)));
        }
        let rejected = table.add_node(Node::new(high_bucket_id(50), addr(250)));
        assert!(!rejected);
        table.check_invariants().unwrap();
    }

    #[test]
    fn find_node_returns_bucket_contents_sorted() {
        let local = NodeID::generate();
        let mut table = RoutingTable::with_capacity(local, 8);
        for i in 1..=3u32 {
            table.add_node(Node::new(id_from(i), addr(i as u8)));
        }
        let target = id_from(2);
        let found = table.find_node(&target);
        assert_eq!(found.len(), 3);
        for pair in found.windows(2) {
            assert!(pair[0].id.as_bigint() <= pair[1].id.as_bigint());
        }
    }
}
