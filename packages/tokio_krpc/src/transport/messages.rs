use std::fmt;
use std::net::SocketAddr;

use krpc_encoding::Query;

/// Reserved worker tag for transactions registered with the synchronous
/// correlator (direct CLI calls, ping-revalidation) rather than owned by a
/// lookup-engine worker.
pub const SYNC_WORKER: u8 = 0xFF;

/// A 3-byte wire transaction id: `worker_index_byte || counter(u16 BE)`.
///
/// The worker index lets the dispatch loop route a response that has no
/// matching synchronous waiter to the right lookup-engine worker without
/// any additional bookkeeping.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub worker: u8,
    pub counter: u16,
}

impl TransactionId {
    pub fn new(worker: u8, counter: u16) -> TransactionId {
        TransactionId { worker, counter }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        let counter = self.counter.to_be_bytes();
        [self.worker, counter[0], counter[1]]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<TransactionId> {
        if bytes.len() != 3 {
            return None;
        }
        Some(TransactionId {
            worker: bytes[0],
            counter: u16::from_be_bytes([bytes[1], bytes[2]]),
        })
    }

    pub fn is_sync(self) -> bool {
        self.worker == SYNC_WORKER
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid({:02x}:{:04x})", self.worker, self.counter)
    }
}

/// Whether an `announce_peer` should use the argument port or the UDP
/// source port the query arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortType {
    Port(u16),
    Implied,
}

/// A decoded inbound query handed to the query handler, carrying everything
/// it needs to build and send a response: the raw transaction id bytes (to
/// echo back verbatim) and the endpoint the query actually arrived from.
#[derive(Clone, Debug)]
pub struct InboundQuery {
    pub query: Query,
    pub from: SocketAddr,
    pub transaction_id: Vec<u8>,
    pub version: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tid_round_trips_through_bytes() {
        let tid = TransactionId::new(3, 0xBEEF);
        let bytes = tid.to_bytes();
        assert_eq!(bytes, [3, 0xBE, 0xEF]);
        assert_eq!(TransactionId::from_bytes(&bytes), Some(tid));
    }
}
