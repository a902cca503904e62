//! Bencode/KRPC wire types shared by the transport and the node: 160-bit
//! identifiers, compact node/peer encodings, and the tagged `Query`/response
//! message shapes defined by BEP-5.

pub mod addr;
pub mod booleans;
pub mod errors;
pub mod id;
pub mod messages;
pub mod node_info;

pub use addr::Addr;
pub use errors::{Error, Result};
pub use id::NodeID;
pub use messages::{
    AnnouncePeerResponse, Body, Envelope, ErrorCode, FindNodeResponse, GetPeersResponse,
    KRPCError, PeersOrNodes, PingResponse, Query, RawResponse,
};
pub use node_info::NodeInfo;
