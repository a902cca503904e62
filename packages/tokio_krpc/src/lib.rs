//! Async UDP transport and transaction correlator for KRPC messages: binds a
//! socket, demultiplexes inbound datagrams between the query handler and the
//! transaction correlator, and exposes a typed send API.

pub mod errors;
pub mod transport;

pub use errors::{Error, Result};
pub use transport::{
    ActiveTransactions, InboundQuery, KRPCNode, PortType, QuerySender, RequestStream,
    ResponseFuture, SendTransport, TransactionId, UnmatchedResponseStream, SYNC_WORKER,
};
