use std::net::SocketAddrV4;
use std::time::Duration;

use chrono::{DateTime, Utc};
use krpc_encoding::NodeID;

/// Lifecycle state of a node as observed by the local routing table.
///
/// Transitions are monotonic: a node starts `Init`, becomes `Good` on any
/// successful exchange, degrades to `Questionable` after a period of
/// silence, and is removed once it reaches `Bad` (a failed revalidation).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Init,
    Good,
    Questionable,
    Bad,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeID,
    pub addr: SocketAddrV4,
    pub status: NodeStatus,
    pub last_seen: DateTime<Utc>,
}

impl Node {
    pub fn new(id: NodeID, addr: SocketAddrV4) -> Node {
        Node {
            id,
            addr,
            status: NodeStatus::Init,
            last_seen: Utc::now(),
        }
    }

    pub fn mark_good(&mut self) {
        self.status = NodeStatus::Good;
        self.last_seen = Utc::now();
    }

    pub fn mark_questionable(&mut self) {
        self.status = NodeStatus::Questionable;
    }

    pub fn mark_bad(&mut self) {
        self.status = NodeStatus::Bad;
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.last_seen);
        age.to_std().unwrap_or(Duration::ZERO) >= threshold
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ID={}, Addr={}, Status={:?}",
            self.id, self.addr, self.status
        )
    }
}
