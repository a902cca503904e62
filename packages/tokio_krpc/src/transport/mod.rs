pub mod active_transactions;
pub mod messages;
pub mod response_future;
pub mod send;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use krpc_encoding::{Body, Envelope};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

pub use active_transactions::ActiveTransactions;
pub use messages::{InboundQuery, PortType, TransactionId, SYNC_WORKER};
pub use response_future::ResponseFuture;
pub use send::{QuerySender, SendTransport};

use crate::errors::{Error, Result};

const RECV_BUFFER_SIZE: usize = 2048;

pub type RequestStream = mpsc::UnboundedReceiver<InboundQuery>;
pub type UnmatchedResponseStream = mpsc::UnboundedReceiver<(TransactionId, Envelope)>;

/// Owns a bound UDP socket. `serve()` hands off to a background reader task
/// and returns the handles the rest of the node talks through: a transport
/// for sending, a stream of inbound queries, and a stream of responses that
/// belong to a lookup-engine worker rather than a synchronous waiter.
pub struct KRPCNode {
    socket: Arc<UdpSocket>,
}

impl KRPCNode {
    pub async fn bind(addr: SocketAddr) -> Result<KRPCNode> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|cause| Error::BindError { cause })?;
        Ok(KRPCNode {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|cause| Error::BindError { cause })
    }

    pub fn serve(self) -> (SendTransport, RequestStream, UnmatchedResponseStream) {
        let active = ActiveTransactions::new();
        let transport = SendTransport::new(self.socket.clone(), active.clone());

        let (query_tx, query_rx) = mpsc::unbounded_channel();
        let (unmatched_tx, unmatched_rx) = mpsc::unbounded_channel();

        tokio::spawn(inbound_loop(self.socket, active, query_tx, unmatched_tx));

        (transport, query_rx, unmatched_rx)
    }
}

async fn inbound_loop(
    socket: Arc<UdpSocket>,
    active: ActiveTransactions,
    query_tx: mpsc::UnboundedSender<InboundQuery>,
    unmatched_tx: mpsc::UnboundedSender<(TransactionId, Envelope)>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut fragments: HashMap<SocketAddr, Vec<u8>> = HashMap::new();

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "udp recv failed, continuing");
                continue;
            }
        };

        let incoming = buf[..n].to_vec();
        let data = match fragments.remove(&from) {
            Some(prefix) => {
                let mut combined = prefix;
                combined.extend_from_slice(&incoming);
                combined
            }
            None => incoming.clone(),
        };

        match Envelope::decode(&data) {
            Ok(envelope) => dispatch(envelope, from, &active, &query_tx, &unmatched_tx),
            Err(err) => {
                trace!(%from, error = %err, "buffering undecodable fragment");
                fragments.insert(from, incoming);
            }
        }
    }
}

fn dispatch(
    envelope: Envelope,
    from: SocketAddr,
    active: &ActiveTransactions,
    query_tx: &mpsc::UnboundedSender<InboundQuery>,
    unmatched_tx: &mpsc::UnboundedSender<(TransactionId, Envelope)>,
) {
    match envelope.body {
        Body::Query { query } => {
            let inbound = InboundQuery {
                query,
                from,
                transaction_id: envelope.transaction_id,
                version: envelope.version.map(|v| v.into_vec()),
            };
            let _ = query_tx.send(inbound);
        }
        Body::Response { .. } | Body::Error { .. } => {
            let tid = match TransactionId::from_bytes(&envelope.transaction_id) {
                Some(tid) => tid,
                None => {
                    debug!(%from, "dropping response with malformed transaction id");
                    return;
                }
            };

            if tid.is_sync() {
                if !active.fulfil(tid, envelope) {
                    debug!(%from, ?tid, "dropping late or duplicate synchronous response");
                }
                return;
            }

            if active.contains(&tid) {
                active.fulfil(tid, envelope);
            } else {
                let _ = unmatched_tx.send((tid, envelope));
            }
        }
    }
}
