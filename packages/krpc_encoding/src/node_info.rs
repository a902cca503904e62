use serde::{Deserialize, Serialize};

use crate::addr::{Addr, ADDR_LEN};
use crate::id::{NodeID, ID_LEN};

pub const NODE_INFO_LEN: usize = ID_LEN + ADDR_LEN;

/// A single `(NodeID, Addr)` pair as found in the compact `nodes` field of
/// `find_node`/`get_peers` responses: 20-byte id followed by a 6-byte compact
/// address.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeID,
    pub addr: Addr,
}

impl NodeInfo {
    pub fn new(id: NodeID, addr: Addr) -> NodeInfo {
        NodeInfo { id, addr }
    }

    pub fn to_bytes(&self) -> [u8; NODE_INFO_LEN] {
        let mut out = [0u8; NODE_INFO_LEN];
        out[..ID_LEN].copy_from_slice(self.id.as_bytes());
        out[ID_LEN..].copy_from_slice(&self.addr.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::errors::Result<NodeInfo> {
        if bytes.len() != NODE_INFO_LEN {
            return Err(crate::errors::Error::TruncatedNodeInfo { len: bytes.len() });
        }
        let id = NodeID::from_slice(&bytes[..ID_LEN])?;
        let addr = Addr::from_bytes(&bytes[ID_LEN..])?;
        Ok(NodeInfo::new(id, addr))
    }
}

impl std::fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// Serializes/deserializes `Vec<NodeInfo>` as a single bencoded byte string
/// made of concatenated 26-byte compact node records.
pub mod compact_nodes {
    use super::*;
    use serde::de::Error as DeError;
    use serde::{Deserialize as _, Deserializer, Serialize as _, Serializer};
    use serde_bytes::ByteBuf;

    pub fn serialize<S>(nodes: &[NodeInfo], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut bytes = Vec::with_capacity(nodes.len() * NODE_INFO_LEN);
        for node in nodes {
            bytes.extend_from_slice(&node.to_bytes());
        }
        serde_bytes::Bytes::new(&bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<NodeInfo>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = ByteBuf::deserialize(deserializer)?;
        if bytes.len() % NODE_INFO_LEN != 0 {
            return Err(DeError::custom(crate::errors::Error::TruncatedNodeInfo {
                len: bytes.len() % NODE_INFO_LEN,
            }));
        }
        bytes
            .chunks(NODE_INFO_LEN)
            .map(|chunk| NodeInfo::from_bytes(chunk).map_err(DeError::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn node_info_round_trips() {
        let info = NodeInfo::new(NodeID::generate(), Addr::new(Ipv4Addr::new(1, 2, 3, 4), 6881));
        let bytes = info.to_bytes();
        assert_eq!(bytes.len(), NODE_INFO_LEN);
        let back = NodeInfo::from_bytes(&bytes).unwrap();
        assert_eq!(info, back);
    }
}
