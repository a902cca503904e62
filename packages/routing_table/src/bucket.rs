use std::time::Duration;

use chrono::{DateTime, Utc};
use krpc_encoding::NodeID;
use num_bigint::{BigUint, RandBigInt};

use crate::node::{Node, NodeStatus};

/// A half-open ID range `[min, max)` holding at most `k` nodes, ordered by
/// id. Buckets never overlap and the full set of buckets in a table always
/// partitions `[0, 2^160)`.
#[derive(Clone, Debug)]
pub struct Bucket {
    pub min: BigUint,
    pub max: BigUint,
    pub nodes: Vec<Node>,
    pub last_updated: DateTime<Utc>,
    k: usize,
}

impl Bucket {
    pub fn new(min: BigUint, max: BigUint, k: usize) -> Bucket {
        Bucket {
            min,
            max,
            nodes: Vec::with_capacity(k),
            last_updated: Utc::now(),
            k,
        }
    }

    /// The single bucket `[0, 2^160)` a fresh table starts with.
    pub fn full_range(k: usize) -> Bucket {
        let min = BigUint::from(0u32);
        let max = BigUint::from(1u32) << krpc_encoding::id::MAX_BITS;
        Bucket::new(min, max, k)
    }

    pub fn covers(&self, id: &NodeID) -> bool {
        let value = id.as_bigint();
        value >= self.min && value < self.max
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.k
    }

    fn insert_position(&self, value: &BigUint) -> usize {
        self.nodes
            .partition_point(|node| node.id.as_bigint() < *value)
    }

    pub fn get(&self, id: &NodeID) -> Option<&Node> {
        let pos = self.insert_position(&id.as_bigint());
        self.nodes.get(pos).filter(|n| n.id == *id)
    }

    pub fn get_mut(&mut self, id: &NodeID) -> Option<&mut Node> {
        let pos = self.insert_position(&id.as_bigint());
        self.nodes.get_mut(pos).filter(|n| n.id == *id)
    }

    /// Inserts or refreshes `node`. Returns `false` when the bucket is full
    /// and `node` is not already present -- the caller (the table) is
    /// responsible for deciding whether to split.
    pub fn add_node(&mut self, node: Node) -> bool {
        let value = node.id.as_bigint();
        let pos = self.insert_position(&value);

        if let Some(existing) = self.nodes.get_mut(pos).filter(|n| n.id == node.id) {
            existing.addr = node.addr;
            existing.mark_good();
            return true;
        }

        if self.is_full() {
            return false;
        }

        let mut node = node;
        node.mark_good();
        self.nodes.insert(pos, node);
        self.last_updated = Utc::now();
        true
    }

    pub fn remove(&mut self, id: &NodeID) -> Option<Node> {
        let pos = self.insert_position(&id.as_bigint());
        if self.nodes.get(pos).is_some_and(|n| n.id == *id) {
            Some(self.nodes.remove(pos))
        } else {
            None
        }
    }

    /// Splits this bucket at its midpoint, shrinking `self` to the lower
    /// half and returning a new bucket covering the upper half. Existing
    /// nodes are redistributed by id.
    pub fn split(&mut self) -> Bucket {
        let mid = (&self.min + &self.max) >> 1u32;

        let split_at = self.insert_position(&mid);
        let upper_nodes = self.nodes.split_off(split_at);

        let mut upper = Bucket::new(mid.clone(), self.max.clone(), self.k);
        upper.nodes = upper_nodes;
        upper.last_updated = self.last_updated;

        self.max = mid;
        upper
    }

    pub fn good_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.status == NodeStatus::Good)
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        if self.nodes.is_empty() {
            return true;
        }
        let age = Utc::now().signed_duration_since(self.last_updated);
        age.to_std().unwrap_or(Duration::ZERO) >= threshold
    }

    /// A uniformly random id within `[min, max)`, used to seed a refresh
    /// lookup targeting this bucket's range.
    pub fn random_id_in_range(&self) -> NodeID {
        if self.min == self.max {
            return NodeID::from_bigint(&self.min);
        }
        let value = rand::thread_rng().gen_biguint_range(&self.min, &self.max);
        NodeID::from_bigint(&value)
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:x}, {:x}), {} nodes", self.min, self.max, self.nodes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(n: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, n), 6881)
    }

    #[test]
    fn split_distributes_by_midpoint() {
        let mut bucket = Bucket::full_range(8);
        let low_id = NodeID::from_bigint(&BigUint::from(1u32));
        let high_id = NodeID::from_bigint(&(BigUint::from(1u32) << 159u32));

        bucket.add_node(Node::new(low_id, addr(1)));
        bucket.add_node(Node::new(high_id, addr(2)));

        let upper = bucket.split();
        assert!(bucket.covers(&low_id));
        assert!(!bucket.covers(&high_id));
        assert!(upper.covers(&high_id));
        assert_eq!(bucket.len(), 1);
        assert_eq!(upper.len(), 1);
        assert_eq!(bucket.max, upper.min);
    }

    #[test]
    fn full_bucket_rejects_new_node() {
        let mut bucket = Bucket::new(BigUint::from(0u32), BigUint::from(1u32) << 160u32, 2);
        bucket.add_node(Node::new(NodeID::from_bigint(&BigUint::from(1u32)), addr(1)));
        bucket.add_node(Node::new(NodeID::from_bigint(&BigUint::from(2u32)), addr(2)));
        assert!(bucket.is_full());
        let rejected = bucket.add_node(Node::new(NodeID::from_bigint(&BigUint::from(3u32)), addr(3)));
        assert!(!rejected);
        assert_eq!(bucket.len(), 2);
    }
}
