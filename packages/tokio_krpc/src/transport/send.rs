use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use krpc_encoding::{
    AnnouncePeerResponse, Body, Envelope, FindNodeResponse, GetPeersResponse, KRPCError, NodeID,
    PingResponse, Query, RawResponse,
};
use tokio::net::UdpSocket;

use crate::errors::{Error, Result};
use crate::transport::active_transactions::ActiveTransactions;
use crate::transport::messages::{PortType, TransactionId, SYNC_WORKER};
use crate::transport::response_future::ResponseFuture;

/// A peer's transport-facing query interface: send a query, don't wait for
/// the reply. Implemented by `SendTransport` for real traffic and by
/// hand-written test doubles for the lookup engine's unit tests — hence a
/// trait rather than a concrete type at the call site.
#[async_trait]
pub trait QuerySender: Send + Sync {
    async fn ping(&self, worker: u8, to: SocketAddr, id: NodeID) -> Result<TransactionId>;
    async fn find_node(
        &self,
        worker: u8,
        to: SocketAddr,
        id: NodeID,
        target: NodeID,
    ) -> Result<TransactionId>;
}

/// The shape a `RawResponse` actually carries, inferred from which optional
/// fields are present. Responses don't declare their own method name, so
/// this is the only way to catch a reply whose shape doesn't match what the
/// transaction was registered for (e.g. a bare `{id}` ping-shaped reply
/// answering an outstanding `find_node`).
enum ResponseShape {
    IdOnly,
    Nodes,
    PeersOrNodes,
}

impl ResponseShape {
    fn validate(&self, expected: &'static str) -> Result<()> {
        let matches = match (self, expected) {
            (ResponseShape::IdOnly, "ping" | "announce_peer") => true,
            (ResponseShape::Nodes, "find_node") => true,
            (ResponseShape::PeersOrNodes, "get_peers") => true,
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(Error::MethodMismatch {
                expected,
                got: self.name().to_string(),
            })
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ResponseShape::IdOnly => "ping_or_announce_peer",
            ResponseShape::Nodes => "find_node",
            ResponseShape::PeersOrNodes => "get_peers",
        }
    }
}

fn response_shape(response: &RawResponse) -> ResponseShape {
    if response.token.is_some() || response.values.is_some() {
        ResponseShape::PeersOrNodes
    } else if response.nodes.is_some() {
        ResponseShape::Nodes
    } else {
        ResponseShape::IdOnly
    }
}

/// Owns the UDP socket and the transaction counter. Cheap to clone: shares
/// the socket handle and the correlator map with every clone.
#[derive(Clone)]
pub struct SendTransport {
    socket: Arc<UdpSocket>,
    active: ActiveTransactions,
    counter: Arc<AtomicU16>,
}

impl SendTransport {
    pub fn new(socket: Arc<UdpSocket>, active: ActiveTransactions) -> SendTransport {
        SendTransport {
            socket,
            active,
            counter: Arc::new(AtomicU16::new(0)),
        }
    }

    fn next_tid(&self, worker: u8) -> TransactionId {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        TransactionId::new(worker, counter)
    }

    async fn send_envelope(&self, to: SocketAddr, envelope: &Envelope) -> Result<()> {
        let bytes = envelope.encode()?;
        self.socket
            .send_to(&bytes, to)
            .await
            .map(|_| ())
            .map_err(|cause| Error::SendError { to, cause })
    }

    /// Sends `query` under a fresh TID owned by `worker` without registering
    /// it in the correlator — used by lookup-engine workers, which consume
    /// their own responses off an unmatched-response stream instead.
    pub async fn send_unregistered(&self, worker: u8, to: SocketAddr, query: Query) -> Result<TransactionId> {
        let tid = self.next_tid(worker);
        let envelope = Envelope::query(tid.to_bytes().to_vec(), query);
        self.send_envelope(to, &envelope).await?;
        Ok(tid)
    }

    pub async fn send_response(&self, to: SocketAddr, transaction_id: Vec<u8>, response: RawResponse) -> Result<()> {
        let envelope = Envelope::response(transaction_id, response);
        self.send_envelope(to, &envelope).await
    }

    pub async fn send_error(&self, to: SocketAddr, transaction_id: Vec<u8>, error: KRPCError) -> Result<()> {
        let envelope = Envelope::error(transaction_id, error);
        self.send_envelope(to, &envelope).await
    }

    /// Sends a query registered in the correlator under the reserved
    /// synchronous worker index, and awaits its matched response with a hard
    /// deadline. Used by direct CLI/synchronous callers.
    async fn request(&self, to: SocketAddr, query: Query, timeout: Duration) -> Result<RawResponse> {
        let method = query.method_name();
        let tid = self.next_tid(SYNC_WORKER);
        let envelope = Envelope::query(tid.to_bytes().to_vec(), query);

        self.active.register(tid, method, Instant::now() + timeout);
        let expected = self.active.expected_method(&tid).unwrap_or(method);
        if let Err(err) = self.send_envelope(to, &envelope).await {
            self.active.drop_transaction(&tid);
            return Err(err);
        }

        let fut = ResponseFuture::new(tid, self.active.clone());
        let response = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result?,
            Err(_) => {
                self.active.drop_transaction(&tid);
                return Err(Error::Timeout);
            }
        };

        match response.body {
            Body::Response { response } => {
                response_shape(&response).validate(expected)?;
                Ok(response)
            }
            Body::Error { error } => Err(Error::Remote(error)),
            Body::Query { .. } => Err(Error::MethodMismatch {
                expected: method,
                got: "query".to_string(),
            }),
        }
    }

    pub async fn ping(&self, to: SocketAddr, id: NodeID, timeout: Duration) -> Result<PingResponse> {
        let raw = self.request(to, Query::Ping { id }, timeout).await?;
        Ok(raw.into_ping())
    }

    pub async fn find_node(
        &self,
        to: SocketAddr,
        id: NodeID,
        target: NodeID,
        timeout: Duration,
    ) -> Result<FindNodeResponse> {
        let raw = self.request(to, Query::FindNode { id, target }, timeout).await?;
        Ok(raw.into_find_node()?)
    }

    pub async fn get_peers(
        &self,
        to: SocketAddr,
        id: NodeID,
        info_hash: NodeID,
        timeout: Duration,
    ) -> Result<GetPeersResponse> {
        let raw = self.request(to, Query::GetPeers { id, info_hash }, timeout).await?;
        Ok(raw.into_get_peers()?)
    }

    pub async fn announce_peer(
        &self,
        to: SocketAddr,
        id: NodeID,
        info_hash: NodeID,
        token: Vec<u8>,
        port: PortType,
        timeout: Duration,
    ) -> Result<AnnouncePeerResponse> {
        let (port, implied_port) = match port {
            PortType::Port(p) => (Some(p), false),
            PortType::Implied => (None, true),
        };
        let raw = self
            .request(
                to,
                Query::AnnouncePeer {
                    id,
                    info_hash,
                    port,
                    implied_port,
                    token,
                },
                timeout,
            )
            .await?;
        Ok(raw.into_announce_peer())
    }
}

#[async_trait]
impl QuerySender for SendTransport {
    async fn ping(&self, worker: u8, to: SocketAddr, id: NodeID) -> Result<TransactionId> {
        self.send_unregistered(worker, to, Query::Ping { id }).await
    }

    async fn find_node(
        &self,
        worker: u8,
        to: SocketAddr,
        id: NodeID,
        target: NodeID,
    ) -> Result<TransactionId> {
        self.send_unregistered(worker, to, Query::FindNode { id, target }).await
    }
}
