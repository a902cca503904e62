use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use krpc_encoding::NodeID;
use routing_table::{Node, RoutingTable};
use tokio_krpc::{KRPCNode, RequestStream, SendTransport, UnmatchedResponseStream};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::finder::{Finder, SeedTarget, WorkerInboxes};
use crate::peer_store::{InMemoryPeerStore, PeerStore};
use crate::persistence::{self, Persistence};
use crate::query_handler::QueryHandler;
use crate::token::TokenBuilder;

/// Ties the routing table, transport, lookup engine, and query handler
/// together into a running node. Construction (`bind`) only opens the
/// socket and wires the pieces; `bootstrap` and `run` are separate steps so
/// a caller can inspect or seed the table in between.
pub struct Dht {
    local_id: NodeID,
    config: Arc<Config>,
    routing_table: Arc<Mutex<RoutingTable>>,
    transport: SendTransport,
    finder: Arc<Finder<SendTransport>>,
    query_handler: Arc<QueryHandler>,
    tokens: Arc<Mutex<TokenBuilder>>,
    persistence: Arc<Mutex<dyn Persistence>>,
}

impl Dht {
    pub async fn bind(config: Config, local_id: NodeID, persistence: Arc<Mutex<dyn Persistence>>) -> Result<Dht> {
        let config = Arc::new(config);

        let addr: SocketAddr = config
            .bind_addr
            .parse()
            .map_err(|cause| Error::InvalidBindAddr { addr: config.bind_addr.clone(), cause })?;

        let mut routing_table = RoutingTable::with_capacity(local_id, config.k);
        if let Some(blob) = persistence.lock().expect("persistence lock poisoned").get(&local_id)? {
            let (_, nodes) = persistence::decode_snapshot(&blob)?;
            let restored = nodes.len();
            for info in nodes {
                routing_table.add_node(Node::new(info.id, info.addr.into()));
            }
            info!(restored, "restored routing table from persisted snapshot");
        }
        let routing_table = Arc::new(Mutex::new(routing_table));

        let krpc_node = KRPCNode::bind(addr).await?;
        let bound_addr = krpc_node.local_addr()?;
        let (transport, requests, unmatched) = krpc_node.serve();
        info!(%bound_addr, %local_id, "dht node bound");

        let inboxes = WorkerInboxes::new();
        let finder = Arc::new(Finder::new(
            local_id,
            Arc::new(transport.clone()),
            config.clone(),
            config.filtered_clients.clone(),
            inboxes,
        ));

        let peer_store: Arc<Mutex<dyn PeerStore>> = Arc::new(Mutex::new(InMemoryPeerStore::new()));
        let tokens = Arc::new(Mutex::new(TokenBuilder::new()));
        let query_handler = Arc::new(QueryHandler::new(
            local_id,
            config.k,
            config.filtered_clients.clone(),
            routing_table.clone(),
            peer_store,
            tokens.clone(),
        ));

        spawn_query_dispatch(query_handler.clone(), transport.clone(), requests);
        spawn_response_demux(finder.clone(), unmatched);

        Ok(Dht {
            local_id,
            config,
            routing_table,
            transport,
            finder,
            query_handler,
            tokens,
            persistence,
        })
    }

    pub fn local_id(&self) -> NodeID {
        self.local_id
    }

    pub fn routing_table(&self) -> Arc<Mutex<RoutingTable>> {
        self.routing_table.clone()
    }

    /// Resolves the configured bootstrap hosts and runs a self-lookup
    /// through them, seeding the routing table with whatever the iteration
    /// discovers. The bootstrap hosts themselves are `SeedTarget::Unknown`:
    /// their id is learned only from their own reply.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut seeds = Vec::new();
        for host in &self.config.bootstrap_nodes {
            match tokio::net::lookup_host(host.as_str()).await {
                Ok(addrs) => {
                    for resolved in addrs {
                        if let SocketAddr::V4(v4) = resolved {
                            seeds.push(SeedTarget::Unknown(v4));
                        }
                    }
                }
                Err(err) => warn!(host, %err, "failed to resolve bootstrap host"),
            }
        }

        if seeds.is_empty() {
            return Err(Error::NoBootstrapHosts);
        }

        let found = self.finder.find_node_lookup(self.local_id, seeds).await;
        let discovered = found.len();
        let mut table = self.routing_table.lock().expect("routing table lock poisoned");
        for node in found {
            table.add_node(node);
        }
        info!(discovered, table_size = table.len(), "bootstrap complete");
        Ok(())
    }

    /// Runs periodic housekeeping (token rotation, staleness sweep, bucket
    /// refresh, snapshot persistence) until `shutdown` resolves.
    pub async fn run(self: Arc<Self>, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.node_refreshness_time_limit());

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.housekeeping_tick().await;
                }
            }
        }

        self.persist_snapshot();
        Ok(())
    }

    async fn housekeeping_tick(&self) {
        if self.tokens.lock().expect("token builder lock poisoned").maybe_rotate(self.config.token_time_limit()) {
            debug!("rotated announce token secret");
        }

        let stale = self
            .routing_table
            .lock()
            .expect("routing table lock poisoned")
            .mark_stale_nodes(self.config.node_refreshness_time_limit());
        if !stale.is_empty() {
            let revalidated = self.finder.ping_sweep(stale).await;
            let mut table = self.routing_table.lock().expect("routing table lock poisoned");
            for node in revalidated {
                table.add_node(node);
            }
        }

        let refresh_targets = self
            .routing_table
            .lock()
            .expect("routing table lock poisoned")
            .stale_bucket_refresh_targets(self.config.bucket_last_changed_time_limit());
        for target in refresh_targets {
            let seeds: Vec<SeedTarget> = self
                .routing_table
                .lock()
                .expect("routing table lock poisoned")
                .closest_nodes(&target, self.config.k)
                .into_iter()
                .map(SeedTarget::Known)
                .collect();
            if seeds.is_empty() {
                continue;
            }
            let found = self.finder.find_node_lookup(target, seeds).await;
            let mut table = self.routing_table.lock().expect("routing table lock poisoned");
            for node in found {
                table.add_node(node);
            }
        }

        self.persist_snapshot();
    }

    fn persist_snapshot(&self) {
        let table = self.routing_table.lock().expect("routing table lock poisoned");
        let nodes: Vec<krpc_encoding::NodeInfo> = table
            .iter_nodes()
            .map(|n| krpc_encoding::NodeInfo::new(n.id, n.addr.into()))
            .collect();
        drop(table);
        let blob = persistence::encode_snapshot(&self.local_id, &nodes);
        if let Err(err) = self.persistence.lock().expect("persistence lock poisoned").put(&self.local_id, blob) {
            warn!(%err, "failed to persist routing table snapshot");
        }
    }

    pub fn transport(&self) -> &SendTransport {
        &self.transport
    }

    pub fn query_handler(&self) -> &Arc<QueryHandler> {
        &self.query_handler
    }
}

fn spawn_query_dispatch(handler: Arc<QueryHandler>, transport: SendTransport, mut requests: RequestStream) {
    tokio::spawn(async move {
        while let Some(inbound) = requests.recv().await {
            let from = inbound.from;
            if let Err(err) = handler.handle(inbound, &transport).await {
                debug!(%from, %err, "query handling failed");
            }
        }
    });
}

fn spawn_response_demux(finder: Arc<Finder<SendTransport>>, mut unmatched: UnmatchedResponseStream) {
    tokio::spawn(async move {
        let inboxes = finder.inboxes();
        while let Some((tid, envelope)) = unmatched.recv().await {
            inboxes.dispatch(tid.worker, envelope);
        }
    });
}
