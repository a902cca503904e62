use std::fmt;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::addr::Addr;
use crate::booleans;
use crate::errors::{Error, Result};
use crate::id::NodeID;
use crate::node_info::{self, NodeInfo};

/// Error codes defined by BEP-5.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Generic = 201,
    Server = 202,
    Protocol = 203,
    MethodUnknown = 204,
}

/// The `e` payload of an error message: `[code, description]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KRPCError(pub u32, pub String);

impl KRPCError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> KRPCError {
        KRPCError(code as u32, description.into())
    }
}

impl fmt::Display for KRPCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0, self.1)
    }
}

/// The queries a node may send or receive.
///
/// The tag/content split mirrors the wire layout directly: `q` names the
/// method, `a` carries its arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "q", content = "a")]
pub enum Query {
    #[serde(rename = "ping")]
    Ping { id: NodeID },

    #[serde(rename = "find_node")]
    FindNode { id: NodeID, target: NodeID },

    #[serde(rename = "get_peers")]
    GetPeers { id: NodeID, info_hash: NodeID },

    #[serde(rename = "announce_peer")]
    AnnouncePeer {
        id: NodeID,
        info_hash: NodeID,
        port: Option<u16>,
        #[serde(
            default,
            skip_serializing_if = "booleans::is_false",
            deserialize_with = "booleans::deserialize"
        )]
        implied_port: bool,
        #[serde(with = "serde_bytes")]
        token: Vec<u8>,
    },
}

impl Query {
    pub fn method_name(&self) -> &'static str {
        match self {
            Query::Ping { .. } => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
        }
    }

    pub fn sender_id(&self) -> NodeID {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. } => *id,
        }
    }
}

/// The untyped shape of a response payload (`r`), decoded without knowledge
/// of which query it answers. The transaction correlator recovers the
/// originating method from the TID and hands the right `into_*` conversion
/// the bytes it expects; this keeps the decoder free of a dynamic method
/// dispatch table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    pub id: NodeID,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "values")]
    pub values: Option<Vec<ByteBuf>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PingResponse {
    pub id: NodeID,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FindNodeResponse {
    pub id: NodeID,
    pub nodes: Vec<NodeInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeersOrNodes {
    Peers(Vec<Addr>),
    Nodes(Vec<NodeInfo>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetPeersResponse {
    pub id: NodeID,
    pub token: Vec<u8>,
    pub result: PeersOrNodes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnouncePeerResponse {
    pub id: NodeID,
}

fn decode_nodes(bytes: &ByteBuf) -> Result<Vec<NodeInfo>> {
    if bytes.len() % node_info::NODE_INFO_LEN != 0 {
        return Err(Error::TruncatedNodeInfo {
            len: bytes.len() % node_info::NODE_INFO_LEN,
        });
    }
    bytes
        .chunks(node_info::NODE_INFO_LEN)
        .map(NodeInfo::from_bytes)
        .collect()
}

impl RawResponse {
    pub fn into_ping(self) -> PingResponse {
        PingResponse { id: self.id }
    }

    pub fn into_announce_peer(self) -> AnnouncePeerResponse {
        AnnouncePeerResponse { id: self.id }
    }

    pub fn into_find_node(self) -> Result<FindNodeResponse> {
        let nodes = self
            .nodes
            .as_ref()
            .map(decode_nodes)
            .transpose()?
            .unwrap_or_default();
        Ok(FindNodeResponse { id: self.id, nodes })
    }

    pub fn into_get_peers(self) -> Result<GetPeersResponse> {
        let token = self
            .token
            .clone()
            .map(|t| t.into_vec())
            .unwrap_or_default();
        let result = if let Some(values) = self.values.clone() {
            let peers = values
                .iter()
                .map(|record| Addr::from_bytes(record))
                .collect::<Result<Vec<_>>>()?;
            PeersOrNodes::Peers(peers)
        } else if let Some(nodes) = self.nodes.as_ref() {
            PeersOrNodes::Nodes(decode_nodes(nodes)?)
        } else {
            PeersOrNodes::Nodes(Vec::new())
        };
        Ok(GetPeersResponse {
            id: self.id,
            token,
            result,
        })
    }
}

/// The three message shapes tagged by `y`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "y")]
pub enum Body {
    #[serde(rename = "q")]
    Query {
        #[serde(flatten)]
        query: Query,
    },
    #[serde(rename = "r")]
    Response {
        #[serde(rename = "r")]
        response: RawResponse,
    },
    #[serde(rename = "e")]
    Error {
        #[serde(rename = "e")]
        error: KRPCError,
    },
}

/// The full KRPC envelope: transaction id, client version, and the tagged
/// body, plus the BEP-0042/BEP-0043 extension fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "ip", default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Addr>,

    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ByteBuf>,

    #[serde(flatten)]
    pub body: Body,

    #[serde(
        rename = "ro",
        default,
        skip_serializing_if = "booleans::is_false",
        deserialize_with = "booleans::deserialize"
    )]
    pub read_only: bool,
}

impl Envelope {
    pub fn query(transaction_id: Vec<u8>, query: Query) -> Envelope {
        Envelope {
            ip: None,
            transaction_id,
            version: None,
            body: Body::Query { query },
            read_only: false,
        }
    }

    pub fn response(transaction_id: Vec<u8>, response: RawResponse) -> Envelope {
        Envelope {
            ip: None,
            transaction_id,
            version: None,
            body: Body::Response { response },
            read_only: false,
        }
    }

    pub fn error(transaction_id: Vec<u8>, error: KRPCError) -> Envelope {
        Envelope {
            ip: None,
            transaction_id,
            version: None,
            body: Body::Error { error },
            read_only: false,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Envelope> {
        serde_bencode::de::from_bytes(bytes).map_err(|cause| Error::DecodeError { cause })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_bencode::ser::to_bytes(self).map_err(|cause| Error::EncodeError { cause })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn ping_query_round_trips() {
        let env = Envelope::query(
            b"aa".to_vec(),
            Query::Ping {
                id: NodeID::generate(),
            },
        );
        let encoded = env.encode().unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn find_node_response_round_trips_through_raw() {
        let nodes = vec![
            NodeInfo::new(NodeID::generate(), Addr::new(Ipv4Addr::new(1, 1, 1, 1), 1)),
            NodeInfo::new(NodeID::generate(), Addr::new(Ipv4Addr::new(2, 2, 2, 2), 2)),
        ];
        let mut bytes = Vec::new();
        for n in &nodes {
            bytes.extend_from_slice(&n.to_bytes());
        }
        let raw = RawResponse {
            id: NodeID::generate(),
            token: None,
            nodes: Some(ByteBuf::from(bytes)),
            values: None,
        };
        let env = Envelope::response(b"aa".to_vec(), raw);
        let encoded = env.encode().unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();
        let Body::Response { response } = decoded.body else {
            panic!("expected response body");
        };
        let find_node = response.into_find_node().unwrap();
        assert_eq!(find_node.nodes, nodes);
    }

    #[test]
    fn get_peers_values_is_a_list_of_records() {
        let peers = vec![
            Addr::new(Ipv4Addr::new(1, 1, 1, 1), 1),
            Addr::new(Ipv4Addr::new(2, 2, 2, 2), 2),
        ];
        let raw = RawResponse {
            id: NodeID::generate(),
            token: Some(ByteBuf::from(b"tok".to_vec())),
            nodes: None,
            values: Some(
                peers
                    .iter()
                    .map(|p| ByteBuf::from(p.to_bytes().to_vec()))
                    .collect(),
            ),
        };
        let env = Envelope::response(b"bb".to_vec(), raw);
        let encoded = env.encode().unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();
        let Body::Response { response } = decoded.body else {
            panic!("expected response body");
        };
        let get_peers = response.into_get_peers().unwrap();
        assert_eq!(get_peers.token, b"tok".to_vec());
        match get_peers.result {
            PeersOrNodes::Peers(got) => assert_eq!(got, peers),
            PeersOrNodes::Nodes(_) => panic!("expected peers"),
        }
    }

    #[test]
    fn unknown_method_is_rejected_by_the_enum_tag() {
        let bad = b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q13:unknown_meth1:t2:aa1:y1:qe";
        let result = Envelope::decode(bad);
        assert!(result.is_err());
    }
}
