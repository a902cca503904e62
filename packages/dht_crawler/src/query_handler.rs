use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use krpc_encoding::{Addr, ErrorCode, KRPCError, NodeID, NodeInfo, Query, RawResponse};
use routing_table::{Node, RoutingTable};
use serde_bytes::ByteBuf;
use tokio_krpc::{InboundQuery, SendTransport};
use tracing::{debug, info};

use crate::errors::Result;
use crate::peer_store::PeerStore;
use crate::token::TokenBuilder;

/// Server side of the protocol: answers inbound queries and, as a
/// side-effect of handling them, offers the sender to the routing table.
pub struct QueryHandler {
    local_id: NodeID,
    k: usize,
    filtered_clients: Vec<String>,
    routing_table: Arc<Mutex<RoutingTable>>,
    peer_store: Arc<Mutex<dyn PeerStore>>,
    tokens: Arc<Mutex<TokenBuilder>>,
}

impl QueryHandler {
    pub fn new(
        local_id: NodeID,
        k: usize,
        filtered_clients: Vec<String>,
        routing_table: Arc<Mutex<RoutingTable>>,
        peer_store: Arc<Mutex<dyn PeerStore>>,
        tokens: Arc<Mutex<TokenBuilder>>,
    ) -> QueryHandler {
        QueryHandler {
            local_id,
            k,
            filtered_clients,
            routing_table,
            peer_store,
            tokens,
        }
    }

    pub async fn handle(&self, inbound: InboundQuery, transport: &SendTransport) -> Result<()> {
        let sender_id = inbound.query.sender_id();

        match &inbound.query {
            Query::Ping { .. } => {
                self.respond(transport, &inbound, RawResponse {
                    id: self.local_id,
                    token: None,
                    nodes: None,
                    values: None,
                })
                .await?;
            }
            Query::FindNode { target, .. } => {
                let nodes = self.closest_from_table(target);
                self.respond(transport, &inbound, RawResponse {
                    id: self.local_id,
                    token: None,
                    nodes: Some(encode_nodes(&nodes)),
                    values: None,
                })
                .await?;
            }
            Query::GetPeers { info_hash, .. } => {
                let token = self.issue_token(inbound.from);
                let peers = self
                    .peer_store
                    .lock()
                    .expect("peer store lock poisoned")
                    .get(info_hash);

                let response = if peers.is_empty() {
                    let nodes = self.closest_from_table(info_hash);
                    RawResponse {
                        id: self.local_id,
                        token: Some(token),
                        nodes: Some(encode_nodes(&nodes)),
                        values: None,
                    }
                } else {
                    let values = peers
                        .iter()
                        .map(|p| ByteBuf::from(Addr::from(*p).to_bytes().to_vec()))
                        .collect();
                    RawResponse {
                        id: self.local_id,
                        token: Some(token),
                        nodes: None,
                        values: Some(values),
                    }
                };
                self.respond(transport, &inbound, response).await?;
            }
            Query::AnnouncePeer {
                info_hash,
                port,
                implied_port,
                token,
                ..
            } => {
                let SocketAddr::V4(from) = inbound.from else {
                    debug!("dropping announce_peer from a non-IPv4 peer");
                    return Ok(());
                };

                if !self.validate_token(token, inbound.from) {
                    self.respond_error(transport, &inbound, KRPCError::new(ErrorCode::Protocol, "bad token"))
                        .await?;
                    return Ok(());
                }

                let advertised_port = if *implied_port { from.port() } else { port.unwrap_or(from.port()) };
                let peer_addr = std::net::SocketAddrV4::new(*from.ip(), advertised_port);
                self.peer_store
                    .lock()
                    .expect("peer store lock poisoned")
                    .put(*info_hash, peer_addr);

                self.respond(transport, &inbound, RawResponse {
                    id: self.local_id,
                    token: None,
                    nodes: None,
                    values: None,
                })
                .await?;
            }
        }

        self.maybe_insert_sender(sender_id, inbound.from, inbound.version.as_deref());
        Ok(())
    }

    fn closest_from_table(&self, target: &NodeID) -> Vec<Node> {
        self.routing_table
            .lock()
            .expect("routing table lock poisoned")
            .closest_nodes(target, self.k)
    }

    fn issue_token(&self, from: SocketAddr) -> ByteBuf {
        ByteBuf::from(self.tokens.lock().expect("token builder lock poisoned").create(from.ip()))
    }

    fn validate_token(&self, token: &[u8], from: SocketAddr) -> bool {
        self.tokens
            .lock()
            .expect("token builder lock poisoned")
            .validate(token, from.ip())
    }

    fn maybe_insert_sender(&self, id: NodeID, from: SocketAddr, version: Option<&[u8]>) {
        let SocketAddr::V4(addr) = from else { return };
        if self.is_filtered(version) {
            return;
        }
        let mut table = self.routing_table.lock().expect("routing table lock poisoned");
        if table.add_node(Node::new(id, addr)) {
            info!(%id, %addr, "added peer to routing table");
        }
    }

    fn is_filtered(&self, version: Option<&[u8]>) -> bool {
        client_is_filtered(&self.filtered_clients, version)
    }

    async fn respond(&self, transport: &SendTransport, inbound: &InboundQuery, response: RawResponse) -> Result<()> {
        transport
            .send_response(inbound.from, inbound.transaction_id.clone(), response)
            .await?;
        Ok(())
    }

    async fn respond_error(&self, transport: &SendTransport, inbound: &InboundQuery, error: KRPCError) -> Result<()> {
        transport
            .send_error(inbound.from, inbound.transaction_id.clone(), error)
            .await?;
        Ok(())
    }
}

/// Whether `version` (a KRPC envelope's `v` field) matches one of the
/// configured client-version prefixes to exclude from the routing table.
pub(crate) fn client_is_filtered(filtered_clients: &[String], version: Option<&[u8]>) -> bool {
    let Some(version) = version else { return false };
    filtered_clients.iter().any(|prefix| version.starts_with(prefix.as_bytes()))
}

fn encode_nodes(nodes: &[Node]) -> ByteBuf {
    let mut bytes = Vec::with_capacity(nodes.len() * (20 + 6));
    for node in nodes {
        let info = NodeInfo::new(node.id, Addr::from(node.addr));
        bytes.extend_from_slice(&info.to_bytes());
    }
    ByteBuf::from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_store::InMemoryPeerStore;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn handler() -> (QueryHandler, Arc<Mutex<RoutingTable>>) {
        let local_id = NodeID::generate();
        let table = Arc::new(Mutex::new(RoutingTable::new(local_id)));
        let peers: Arc<Mutex<dyn PeerStore>> = Arc::new(Mutex::new(InMemoryPeerStore::new()));
        let tokens = Arc::new(Mutex::new(TokenBuilder::new()));
        (
            QueryHandler::new(local_id, 8, Vec::new(), table.clone(), peers, tokens),
            table,
        )
    }

    #[test]
    fn filtered_client_prefix_blocks_insertion() {
        let local_id = NodeID::generate();
        let table = Arc::new(Mutex::new(RoutingTable::new(local_id)));
        let peers: Arc<Mutex<dyn PeerStore>> = Arc::new(Mutex::new(InMemoryPeerStore::new()));
        let tokens = Arc::new(Mutex::new(TokenBuilder::new()));
        let handler = QueryHandler::new(
            local_id,
            8,
            vec!["BAD".to_string()],
            table.clone(),
            peers,
            tokens,
        );

        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881));
        handler.maybe_insert_sender(NodeID::generate(), addr, Some(b"BAD1"));
        assert_eq!(table.lock().unwrap().len(), 0);

        handler.maybe_insert_sender(NodeID::generate(), addr, Some(b"OK01"));
        assert_eq!(table.lock().unwrap().len(), 1);
    }

    #[test]
    fn announce_without_valid_token_is_rejected_by_validate_token() {
        let (handler, _table) = handler();
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881));
        assert!(!handler.validate_token(b"garbage", addr));
    }
}
