use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use krpc_encoding::node_info::NODE_INFO_LEN;
use krpc_encoding::{NodeID, NodeInfo};

use crate::errors::{Error, Result};

/// Opaque blob storage keyed by the local node's id. The core only ever
/// calls `get`/`put`; the blob layout (routing table snapshot) is encoded
/// and decoded by the free functions below so storage backends stay
/// ignorant of it.
pub trait Persistence: Send + Sync {
    fn put(&mut self, id: &NodeID, blob: Vec<u8>) -> Result<()>;
    fn get(&self, id: &NodeID) -> Result<Option<Vec<u8>>>;
}

/// Encodes a routing-table snapshot as `20-byte id || 4-byte LE length ||
/// (26-byte compact node)*`.
pub fn encode_snapshot(id: &NodeID, nodes: &[NodeInfo]) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + 4 + nodes.len() * NODE_INFO_LEN);
    out.extend_from_slice(id.as_bytes());
    out.extend_from_slice(&(nodes.len() as u32).to_le_bytes());
    for node in nodes {
        out.extend_from_slice(&node.to_bytes());
    }
    out
}

pub fn decode_snapshot(blob: &[u8]) -> Result<(NodeID, Vec<NodeInfo>)> {
    if blob.len() < 24 {
        return Err(krpc_encoding::Error::TruncatedNodeInfo { len: blob.len() }.into());
    }
    let id = NodeID::from_slice(&blob[..20])?;
    let count = u32::from_le_bytes(blob[20..24].try_into().unwrap()) as usize;
    let rest = &blob[24..];
    if rest.len() != count * NODE_INFO_LEN {
        return Err(krpc_encoding::Error::TruncatedNodeInfo { len: rest.len() }.into());
    }
    let nodes = rest
        .chunks(NODE_INFO_LEN)
        .map(NodeInfo::from_bytes)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((id, nodes))
}

#[derive(Default)]
pub struct InMemoryPersistence {
    blobs: HashMap<NodeID, Vec<u8>>,
}

impl InMemoryPersistence {
    pub fn new() -> InMemoryPersistence {
        InMemoryPersistence::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn put(&mut self, id: &NodeID, blob: Vec<u8>) -> Result<()> {
        self.blobs.insert(*id, blob);
        Ok(())
    }

    fn get(&self, id: &NodeID) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(id).cloned())
    }
}

/// Stores one file per node id under a directory, named by hex id.
pub struct FilesystemPersistence {
    directory: PathBuf,
}

impl FilesystemPersistence {
    pub fn new(directory: impl Into<PathBuf>) -> FilesystemPersistence {
        FilesystemPersistence {
            directory: directory.into(),
        }
    }

    fn path_for(&self, id: &NodeID) -> PathBuf {
        self.directory.join(format!("{}.routing", id.hex_string()))
    }
}

impl Persistence for FilesystemPersistence {
    fn put(&mut self, id: &NodeID, blob: Vec<u8>) -> Result<()> {
        fs::create_dir_all(&self.directory).map_err(|cause| Error::ConfigRead {
            path: self.directory.display().to_string(),
            cause,
        })?;
        let path = self.path_for(id);
        fs::write(&path, blob).map_err(|cause| Error::ConfigRead {
            path: path.display().to_string(),
            cause,
        })
    }

    fn get(&self, id: &NodeID) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(id);
        if !Path::new(&path).exists() {
            return Ok(None);
        }
        let blob = fs::read(&path).map_err(|cause| Error::ConfigRead {
            path: path.display().to_string(),
            cause,
        })?;
        Ok(Some(blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::Addr;
    use std::net::Ipv4Addr;

    #[test]
    fn snapshot_round_trips() {
        let id = NodeID::generate();
        let nodes = vec![
            NodeInfo::new(NodeID::generate(), Addr::new(Ipv4Addr::new(1, 1, 1, 1), 1)),
            NodeInfo::new(NodeID::generate(), Addr::new(Ipv4Addr::new(2, 2, 2, 2), 2)),
        ];
        let blob = encode_snapshot(&id, &nodes);
        let (decoded_id, decoded_nodes) = decode_snapshot(&blob).unwrap();
        assert_eq!(decoded_id, id);
        assert_eq!(decoded_nodes, nodes);
    }

    #[test]
    fn in_memory_store_round_trips() {
        let mut store = InMemoryPersistence::new();
        let id = NodeID::generate();
        let blob = encode_snapshot(&id, &[]);
        store.put(&id, blob.clone()).unwrap();
        assert_eq!(store.get(&id).unwrap(), Some(blob));
    }
}
