use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use krpc_encoding::{Body, Envelope, NodeID};
use routing_table::{Node, NodeStatus};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_krpc::{QuerySender, TransactionId};
use tracing::{debug, trace};

use crate::config::Config;
use crate::query_handler::client_is_filtered;

/// A starting point for a `find_node` lookup. Routing-table-assisted
/// lookups (refresh, maintenance) already know the candidate's id; cold
/// bootstrap against the well-known router hosts does not — those hosts
/// announce their own id only in their first reply.
#[derive(Clone, Debug)]
pub enum SeedTarget {
    Known(Node),
    Unknown(SocketAddrV4),
}

impl SeedTarget {
    fn addr(&self) -> SocketAddrV4 {
        match self {
            SeedTarget::Known(node) => node.addr,
            SeedTarget::Unknown(addr) => *addr,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingTarget {
    Known(NodeID),
    Unknown(SocketAddrV4),
}

/// Registry of per-worker response channels. Populated only while a worker
/// index has a lookup in flight; the inbound demuxer consults it to route a
/// response carrying that worker's TID byte. A worker index with no
/// registered inbox means its TID byte belongs to nobody currently running
/// — such a response is logged and dropped.
#[derive(Clone, Default)]
pub struct WorkerInboxes {
    inner: Arc<Mutex<HashMap<u8, mpsc::UnboundedSender<Envelope>>>>,
}

impl WorkerInboxes {
    pub fn new() -> WorkerInboxes {
        WorkerInboxes::default()
    }

    fn register(&self, worker: u8) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().expect("worker inbox lock poisoned").insert(worker, tx);
        rx
    }

    fn unregister(&self, worker: u8) {
        self.inner.lock().expect("worker inbox lock poisoned").remove(&worker);
    }

    /// Called by the node's inbound demuxer for every response not claimed
    /// by the synchronous correlator.
    pub fn dispatch(&self, worker: u8, envelope: Envelope) {
        let sender = self
            .inner
            .lock()
            .expect("worker inbox lock poisoned")
            .get(&worker)
            .cloned();
        match sender {
            Some(sender) => {
                let _ = sender.send(envelope);
            }
            None => trace!(worker, "dropping response for an idle finder worker"),
        }
    }
}

/// Iterative lookup engine. Owns a fixed pool of worker indices (default 2)
/// and runs one lookup per acquired index at a time, matching the transport
/// layer's TID worker-index scheme.
pub struct Finder<S: QuerySender> {
    local_id: NodeID,
    sender: Arc<S>,
    config: Arc<Config>,
    filtered_clients: Vec<String>,
    slots: Vec<AsyncMutex<()>>,
    inboxes: WorkerInboxes,
    next_slot: AtomicU64,
}

impl<S: QuerySender> Finder<S> {
    pub fn new(
        local_id: NodeID,
        sender: Arc<S>,
        config: Arc<Config>,
        filtered_clients: Vec<String>,
        inboxes: WorkerInboxes,
    ) -> Finder<S> {
        let slots = (0..config.finder_num).map(|_| AsyncMutex::new(())).collect();
        Finder {
            local_id,
            sender,
            config,
            filtered_clients,
            slots,
            inboxes,
            next_slot: AtomicU64::new(0),
        }
    }

    fn is_filtered(&self, version: Option<&[u8]>) -> bool {
        client_is_filtered(&self.filtered_clients, version)
    }

    pub fn inboxes(&self) -> WorkerInboxes {
        self.inboxes.clone()
    }

    /// Runs a `find_node` lookup toward `target` to completion on the next
    /// available worker slot, blocking (asynchronously) until a slot is
    /// free.
    pub async fn find_node_lookup(&self, target: NodeID, seeds: Vec<SeedTarget>) -> Vec<Node> {
        let worker = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len() as u64;
        let _guard = self.slots[worker as usize].lock().await;
        let worker = worker as u8;

        let mut responses = self.inboxes.register(worker);
        let result = self.drive_find_node(worker, target, seeds, &mut responses).await;
        self.inboxes.unregister(worker);
        result
    }

    /// Runs a ping sweep revalidating `seeds` (expected to be `Questionable`
    /// nodes already known to the routing table) on the next available
    /// worker slot.
    pub async fn ping_sweep(&self, seeds: Vec<Node>) -> Vec<Node> {
        let worker = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len() as u64;
        let _guard = self.slots[worker as usize].lock().await;
        let worker = worker as u8;

        let mut responses = self.inboxes.register(worker);
        let result = self.drive_ping(worker, seeds, &mut responses).await;
        self.inboxes.unregister(worker);
        result
    }

    /// Pops seeds off `queue` and sends `find_node` to each until either the
    /// queue drains or `outstanding` reaches `config.alpha`, the bound on
    /// concurrent in-flight queries for a single lookup.
    async fn fill_slots(
        &self,
        worker: u8,
        target: NodeID,
        queue: &mut VecDeque<SeedTarget>,
        pending: &mut HashMap<TransactionId, PendingTarget>,
        outstanding: &mut u64,
    ) {
        while *outstanding < self.config.alpha as u64 {
            let Some(seed) = queue.pop_front() else { break };
            let addr = seed.addr();
            let to = SocketAddr::V4(addr);
            if let Ok(tid) = self.sender.find_node(worker, to, self.local_id, target).await {
                match seed {
                    SeedTarget::Known(node) => pending.insert(tid, PendingTarget::Known(node.id)),
                    SeedTarget::Unknown(addr) => pending.insert(tid, PendingTarget::Unknown(addr)),
                };
                *outstanding += 1;
            }
        }
    }

    async fn drive_find_node(
        &self,
        worker: u8,
        target: NodeID,
        seeds: Vec<SeedTarget>,
        responses: &mut mpsc::UnboundedReceiver<Envelope>,
    ) -> Vec<Node> {
        let mut all_nodes: HashMap<NodeID, Node> = HashMap::new();
        let mut pending: HashMap<TransactionId, PendingTarget> = HashMap::new();
        let mut min_distance = num_bigint::BigUint::from(1u32) << 160u32;
        let mut unchanged_count: u64 = 0;
        let deadline = Instant::now() + self.config.find_node_time_limit();
        let mut outstanding: u64 = 0;
        let mut queue: VecDeque<SeedTarget> = VecDeque::new();

        for seed in seeds {
            if let SeedTarget::Known(ref node) = seed {
                all_nodes.insert(node.id, node.clone());
            }
            queue.push_back(seed);
        }
        self.fill_slots(worker, target, &mut queue, &mut pending, &mut outstanding).await;

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            if outstanding == 0 && queue.is_empty() {
                break;
            }
            if unchanged_count >= self.config.max_unchanged_count {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }

            tokio::select! {
                maybe_envelope = responses.recv() => {
                    let Some(envelope) = maybe_envelope else { break };
                    let Some(tid) = TransactionId::from_bytes(&envelope.transaction_id) else { continue };
                    let Some(pending_target) = pending.remove(&tid) else { continue };
                    outstanding = outstanding.saturating_sub(1);

                    let responder_id = match envelope.body {
                        Body::Response { ref response } => Some(response.id),
                        _ => None,
                    };
                    let filtered = self.is_filtered(envelope.version.as_deref());

                    let candidate_id = match (pending_target, responder_id) {
                        (PendingTarget::Known(id), _) => Some(id),
                        (PendingTarget::Unknown(addr), Some(id)) => {
                            all_nodes.insert(id, Node::new(id, addr));
                            Some(id)
                        }
                        (PendingTarget::Unknown(_), None) => None,
                    };

                    match envelope.body {
                        Body::Response { response } => {
                            match response.into_find_node() {
                                Ok(parsed) => {
                                    if let Some(id) = candidate_id {
                                        if !filtered {
                                            if let Some(node) = all_nodes.get_mut(&id) {
                                                node.mark_good();
                                            }
                                        }
                                        let distance = target.distance(&id).as_bigint();
                                        if distance < min_distance {
                                            min_distance = distance;
                                            unchanged_count = 0;
                                        } else {
                                            unchanged_count += 1;
                                        }
                                    }

                                    for info in parsed.nodes {
                                        if all_nodes.contains_key(&info.id) || !info.addr.is_routable() {
                                            continue;
                                        }
                                        let addr: SocketAddrV4 = info.addr.into();
                                        all_nodes.insert(info.id, Node::new(info.id, addr));
                                        queue.push_back(SeedTarget::Known(Node::new(info.id, addr)));
                                    }
                                }
                                Err(err) => {
                                    debug!(%err, "malformed find_node response, marking bad");
                                    if let Some(id) = candidate_id {
                                        if let Some(node) = all_nodes.get_mut(&id) {
                                            node.mark_bad();
                                        }
                                    }
                                }
                            }
                        }
                        Body::Error { .. } => {
                            if let Some(id) = candidate_id {
                                if let Some(node) = all_nodes.get_mut(&id) {
                                    node.mark_bad();
                                }
                            }
                        }
                        Body::Query { .. } => {}
                    }

                    self.fill_slots(worker, target, &mut queue, &mut pending, &mut outstanding).await;
                }
                _ = ticker.tick() => {}
            }
        }

        all_nodes
            .into_values()
            .filter(|n| n.status == NodeStatus::Good)
            .collect()
    }

    async fn drive_ping(
        &self,
        worker: u8,
        seeds: Vec<Node>,
        responses: &mut mpsc::UnboundedReceiver<Envelope>,
    ) -> Vec<Node> {
        let mut all_nodes: HashMap<NodeID, Node> = HashMap::new();
        let mut pending: HashMap<TransactionId, NodeID> = HashMap::new();
        let deadline = Instant::now() + self.config.ping_node_time_limit();
        let retry_every = self.config.request_timeout();

        for seed in seeds {
            if let Ok(tid) = self.sender.ping(worker, SocketAddr::V4(seed.addr), self.local_id).await {
                pending.insert(tid, seed.id);
            }
            all_nodes.insert(seed.id, seed);
        }

        let mut ticker = tokio::time::interval(retry_every);
        loop {
            if all_nodes.values().all(|n| n.status != NodeStatus::Questionable) {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }

            tokio::select! {
                maybe_envelope = responses.recv() => {
                    let Some(envelope) = maybe_envelope else { break };
                    let Some(tid) = TransactionId::from_bytes(&envelope.transaction_id) else { continue };
                    let Some(candidate_id) = pending.remove(&tid) else { continue };
                    let filtered = self.is_filtered(envelope.version.as_deref());
                    if let Body::Response { .. } = envelope.body {
                        if !filtered {
                            if let Some(node) = all_nodes.get_mut(&candidate_id) {
                                node.mark_good();
                            }
                        }
                    }
                }
                _ = ticker.tick() => {
                    for node in all_nodes.values() {
                        if node.status == NodeStatus::Questionable {
                            if let Ok(tid) = self.sender.ping(worker, SocketAddr::V4(node.addr), self.local_id).await {
                                pending.insert(tid, node.id);
                            }
                        }
                    }
                }
            }
        }

        all_nodes
            .into_values()
            .filter(|n| n.status == NodeStatus::Good)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use krpc_encoding::{Addr, NodeInfo, RawResponse};
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::atomic::AtomicU16;
    use tokio_krpc::Result as TransportResult;

    /// A scripted transport: `find_node` always reports back one node one
    /// bit closer to the target than the queried node, terminating when the
    /// distance reaches zero. Immediately self-answers through the shared
    /// inboxes rather than touching any socket.
    struct ConvergingSender {
        inboxes: WorkerInboxes,
        counter: AtomicU16,
    }

    #[async_trait]
    impl QuerySender for ConvergingSender {
        async fn ping(&self, worker: u8, _to: SocketAddr, _id: NodeID) -> TransportResult<TransactionId> {
            let tid = TransactionId::new(worker, self.counter.fetch_add(1, Ordering::Relaxed));
            Ok(tid)
        }

        async fn find_node(
            &self,
            worker: u8,
            to: SocketAddr,
            _id: NodeID,
            target: NodeID,
        ) -> TransportResult<TransactionId> {
            let tid = TransactionId::new(worker, self.counter.fetch_add(1, Ordering::Relaxed));

            let responder_id = NodeID::from_bigint(&(target.as_bigint() ^ num_bigint::BigUint::from(1u32)));
            let next_hop_id = target;
            let SocketAddr::V4(from) = to else { panic!("ipv4 only") };
            let next_addr = Addr::from(SocketAddrV4::new(*from.ip(), from.port() + 1));

            let closer = if responder_id == target {
                vec![]
            } else {
                vec![NodeInfo::new(next_hop_id, next_addr)]
            };

            let raw = RawResponse {
                id: responder_id,
                token: None,
                nodes: Some(serde_bytes::ByteBuf::from(
                    closer.iter().flat_map(|n| n.to_bytes()).collect::<Vec<u8>>(),
                )),
                values: None,
            };
            let envelope = Envelope::response(tid.to_bytes().to_vec(), raw);
            self.inboxes.dispatch(worker, envelope);
            Ok(tid)
        }
    }

    #[tokio::test]
    async fn find_node_lookup_terminates_and_collects_good_nodes() {
        let inboxes = WorkerInboxes::new();
        let sender = Arc::new(ConvergingSender {
            inboxes: inboxes.clone(),
            counter: AtomicU16::new(0),
        });
        let config = Arc::new(Config::default());
        let local_id = NodeID::generate();
        let finder = Finder::new(local_id, sender, config, Vec::new(), inboxes);

        let target = NodeID::generate();
        let seed_addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 6881);
        let seed = Node::new(
            NodeID::from_bigint(&(target.as_bigint() ^ num_bigint::BigUint::from(2u32))),
            seed_addr,
        );

        let good = tokio::time::timeout(
            Duration::from_secs(5),
            finder.find_node_lookup(target, vec![SeedTarget::Known(seed)]),
        )
        .await
        .expect("lookup does not hang");

        assert!(!good.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_seed_with_unknown_id_is_resolved_from_the_reply() {
        let inboxes = WorkerInboxes::new();
        let sender = Arc::new(ConvergingSender {
            inboxes: inboxes.clone(),
            counter: AtomicU16::new(0),
        });
        let config = Arc::new(Config::default());
        let local_id = NodeID::generate();
        let finder = Finder::new(local_id, sender, config, Vec::new(), inboxes);

        let target = NodeID::generate();
        let bootstrap_addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 99), 6881);

        let good = tokio::time::timeout(
            Duration::from_secs(5),
            finder.find_node_lookup(target, vec![SeedTarget::Unknown(bootstrap_addr)]),
        )
        .await
        .expect("lookup does not hang");

        assert!(!good.is_empty());
    }
}
