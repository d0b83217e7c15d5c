use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng as _;
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::IndexerConfig;
use crate::constants::{BOOTSTRAP_NODES, GET_PEERS_FANOUT, MAX_GET_PEERS_PENDING};

use super::error::DhtError;
use super::message::{Message, MessageKind, Query};
use super::node::NodeId;
use super::transport::{Transport, TransportEvent};

/// An info-hash sighting: the hash itself and the candidate peer endpoints
/// known for it so far. What the indexing engine produces and the metadata
/// engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingResult {
    info_hash: [u8; 20],
    peer_addrs: Vec<SocketAddr>,
}

impl IndexingResult {
    pub fn new(info_hash: [u8; 20], peer_addrs: Vec<SocketAddr>) -> Self {
        Self {
            info_hash,
            peer_addrs,
        }
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    pub fn peer_addrs(&self) -> &[SocketAddr] {
        &self.peer_addrs
    }

    pub fn into_peer_addrs(self) -> Vec<SocketAddr> {
        self.peer_addrs
    }
}

/// Mines DHT traffic for info-hashes without keeping a routing table.
///
/// The service probes the network once per configured interval: it samples a
/// random target id and sends `find_node` queries whose sender id is forged
/// to neighbour the recipient, so that responders keep relaying `get_peers`
/// and `announce_peer` traffic this way. Relayed queries surface info-hashes;
/// the service then resolves candidate peers for them with its own
/// `get_peers` probes against known neighbours.
///
/// Output is push-only and lossy: if the consumer lags, results are dropped
/// and counted, never letting back-pressure reach the UDP read path.
pub struct IndexingService {
    laddr: SocketAddr,
    config: IndexerConfig,
    output: mpsc::Sender<IndexingResult>,
    transport: Option<Arc<Transport>>,
    state: Arc<ServiceState>,
    tasks: Vec<JoinHandle<()>>,
}

impl IndexingService {
    pub fn new(
        laddr: SocketAddr,
        config: IndexerConfig,
        output: mpsc::Sender<IndexingResult>,
    ) -> Self {
        let id = NodeId::generate();
        debug!(%laddr, %id, "indexing service created");

        Self {
            laddr,
            config,
            output,
            transport: None,
            state: Arc::new(ServiceState {
                id,
                family_v4: laddr.is_ipv4(),
                neighbours: Mutex::new(NeighbourCache::new(config.max_neighbours)),
                pending_get_peers: Mutex::new(PendingGetPeers::new(MAX_GET_PEERS_PENDING)),
                token_secret: rand::rng().random(),
                congested: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
            tasks: Vec::new(),
        }
    }

    /// Binds the transport and launches the probe and event loops.
    ///
    /// # Panics
    ///
    /// Panics when called on an already-started service.
    pub async fn start(&mut self) -> Result<(), DhtError> {
        if self.transport.is_some() {
            panic!("indexing service for {} started twice", self.laddr);
        }

        let (transport, events) = Transport::new(self.laddr, self.config.transport);
        transport.start().await?;
        let transport = Arc::new(transport);
        self.transport = Some(Arc::clone(&transport));

        self.tasks.push(tokio::spawn(probe_loop(
            Arc::clone(&transport),
            Arc::clone(&self.state),
            self.config,
        )));
        self.tasks.push(tokio::spawn(event_loop(
            transport,
            Arc::clone(&self.state),
            self.output.clone(),
            events,
        )));

        Ok(())
    }

    /// The bound address of the service's transport; `None` before `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().and_then(|t| t.local_addr())
    }

    /// Results dropped because the consumer was slow.
    pub fn dropped_results(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Stops the loops and closes the transport. Idempotent.
    pub fn terminate(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.terminate();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for IndexingService {
    fn drop(&mut self) {
        self.terminate();
    }
}

struct ServiceState {
    id: NodeId,
    /// Address family of the bound socket; neighbours of the other family
    /// are unreachable from it and not worth remembering.
    family_v4: bool,
    neighbours: Mutex<NeighbourCache>,
    pending_get_peers: Mutex<PendingGetPeers>,
    token_secret: [u8; 16],
    congested: AtomicBool,
    dropped: AtomicU64,
}

impl ServiceState {
    /// Tokens handed out in `get_peers` answers: opaque to us, stable per
    /// source address. We never validate announces against them; the
    /// announce itself is the signal we are after.
    fn token_for(&self, addr: &SocketAddr) -> Bytes {
        let mut hasher = Sha1::new();
        hasher.update(self.token_secret);
        hasher.update(addr.ip().to_string().as_bytes());
        Bytes::copy_from_slice(&hasher.finalize()[..8])
    }

    fn emit(&self, output: &mpsc::Sender<IndexingResult>, result: IndexingResult) {
        if output.try_send(result).is_err() {
            // Slow consumer or shutdown; the read path must not wait.
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Sends one round of neighbour-capturing `find_node` probes per interval.
async fn probe_loop(transport: Arc<Transport>, state: Arc<ServiceState>, config: IndexerConfig) {
    let mut tick = tokio::time::interval(config.interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tick.tick().await;

        let target = NodeId::generate();

        // The recipient's id seeds the forged sender id where we know it;
        // for the hard-coded routers the random target stands in.
        let mut recipients: Vec<(SocketAddr, NodeId)> = Vec::new();
        for host in BOOTSTRAP_NODES {
            match tokio::net::lookup_host(host).await {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.next() {
                        recipients.push((addr, target));
                    }
                }
                Err(err) => trace!(host, %err, "bootstrap resolution failed"),
            }
        }
        recipients.extend(
            state
                .neighbours
                .lock()
                .newest(config.max_neighbours)
                .into_iter()
                .map(|(id, addr)| (addr, id)),
        );

        // A congestion signal halves the fan-out for one window.
        if state.congested.swap(false, Ordering::Relaxed) {
            recipients.truncate(recipients.len().div_ceil(2));
        }

        for (addr, seed) in recipients {
            let msg =
                Message::find_node_query(random_tid(), state.id.neighbour_of(&seed), target);
            if send(&transport, &msg, addr).await.is_err() {
                // Transport closed: the service is terminating.
                return;
            }
        }
    }
}

/// Consumes transport events: answers incoming queries, mines them for
/// info-hashes, and feeds `find_node`/`get_peers` responses back into the
/// neighbour set and the pending-resolution table.
async fn event_loop(
    transport: Arc<Transport>,
    state: Arc<ServiceState>,
    output: mpsc::Sender<IndexingResult>,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Congestion => state.congested.store(true, Ordering::Relaxed),
            TransportEvent::Packet(msg, from) => {
                if handle_packet(&transport, &state, &output, msg, from)
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

async fn handle_packet(
    transport: &Transport,
    state: &ServiceState,
    output: &mpsc::Sender<IndexingResult>,
    msg: Message,
    from: SocketAddr,
) -> Result<(), DhtError> {
    let tid = msg.transaction_id;

    match msg.kind {
        MessageKind::Query { query, .. } => match query {
            Query::Ping | Query::FindNode { .. } => {
                send(transport, &Message::plain_response(tid, state.id), from).await
            }
            Query::GetPeers { info_hash } => {
                // The signal: someone close to us is looking for this swarm.
                // The querier itself is the first candidate peer.
                state.emit(output, IndexingResult::new(info_hash, vec![from]));
                resolve_peers(transport, state, info_hash).await?;

                let token = state.token_for(&from);
                send(
                    transport,
                    &Message::token_response(tid, state.id, token),
                    from,
                )
                .await
            }
            Query::AnnouncePeer {
                info_hash,
                port,
                implied_port,
            } => {
                let peer_port = if implied_port { from.port() } else { port };
                if peer_port > 0 {
                    let peer = SocketAddr::new(from.ip(), peer_port);
                    state.emit(output, IndexingResult::new(info_hash, vec![peer]));
                }
                resolve_peers(transport, state, info_hash).await?;

                send(transport, &Message::plain_response(tid, state.id), from).await
            }
            Query::Other => send(transport, &Message::method_unknown(tid), from).await,
        },
        MessageKind::Response(body) => {
            if let Some(info_hash) = state.pending_get_peers.lock().take(&tid) {
                if !body.values.is_empty() {
                    state.emit(output, IndexingResult::new(info_hash, body.values.clone()));
                }
            }

            // Every responder of our family is a potential neighbour; the
            // bounded cache evicts oldest-first, no distance criterion.
            let mut neighbours = state.neighbours.lock();
            for (id, addr) in body.nodes {
                if addr.is_ipv4() == state.family_v4 {
                    neighbours.insert(id, addr);
                }
            }
            if let Some(id) = body.id {
                neighbours.insert(id, from);
            }
            Ok(())
        }
        MessageKind::Error { code, message } => {
            state.pending_get_peers.lock().take(&tid);
            trace!(code, message, %from, "dht error response");
            Ok(())
        }
    }
}

/// Sends best-effort: only a closed transport is worth stopping for, any
/// other send failure just costs the datagram.
async fn send(transport: &Transport, msg: &Message, dst: SocketAddr) -> Result<(), DhtError> {
    match transport.write(msg, dst).await {
        Ok(()) => Ok(()),
        Err(DhtError::Closed) => Err(DhtError::Closed),
        Err(err) => {
            trace!(%dst, %err, "send failed");
            Ok(())
        }
    }
}

/// Issues `get_peers` probes for a freshly observed info-hash against the
/// most recent neighbours, remembering the transaction ids so the answers
/// can be matched back to the hash.
async fn resolve_peers(
    transport: &Transport,
    state: &ServiceState,
    info_hash: [u8; 20],
) -> Result<(), DhtError> {
    let targets = state.neighbours.lock().newest(GET_PEERS_FANOUT);
    if targets.is_empty() {
        return Ok(());
    }

    for (id, addr) in targets {
        let tid = state.pending_get_peers.lock().register(info_hash);
        let msg = Message::get_peers_query(tid, state.id.neighbour_of(&id), info_hash);
        send(transport, &msg, addr).await?;
    }
    Ok(())
}

fn random_tid() -> Bytes {
    let tid: u16 = rand::rng().random();
    Bytes::copy_from_slice(&tid.to_be_bytes())
}

/// Insertion-ordered, capacity-bounded set of DHT nodes that answered us.
/// Re-inserting a known node refreshes its position; the oldest entry goes
/// first when the cap is hit.
struct NeighbourCache {
    cap: usize,
    entries: HashMap<NodeId, SocketAddr>,
    order: VecDeque<NodeId>,
}

impl NeighbourCache {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, id: NodeId, addr: SocketAddr) {
        if self.cap == 0 {
            return;
        }
        if self.entries.insert(id, addr).is_some() {
            self.order.retain(|known| known != &id);
        }
        self.order.push_back(id);

        while self.entries.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Up to `n` most recently seen neighbours, newest first.
    fn newest(&self, n: usize) -> Vec<(NodeId, SocketAddr)> {
        self.order
            .iter()
            .rev()
            .take(n)
            .filter_map(|id| self.entries.get(id).map(|addr| (*id, *addr)))
            .collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Bounded map from the 2-byte transaction ids of our own `get_peers`
/// queries to the info-hash being resolved. Ids are sequential; when the
/// table overflows, the oldest outstanding transaction is forgotten.
struct PendingGetPeers {
    cap: usize,
    next: u16,
    entries: HashMap<u16, [u8; 20]>,
    order: VecDeque<u16>,
}

impl PendingGetPeers {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            next: rand::rng().random(),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn register(&mut self, info_hash: [u8; 20]) -> Bytes {
        let tid = self.next;
        self.next = self.next.wrapping_add(1);

        self.entries.insert(tid, info_hash);
        self.order.push_back(tid);
        while self.entries.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        Bytes::copy_from_slice(&tid.to_be_bytes())
    }

    fn take(&mut self, tid: &[u8]) -> Option<[u8; 20]> {
        let tid: [u8; 2] = tid.try_into().ok()?;
        let tid = u16::from_be_bytes(tid);
        let hash = self.entries.remove(&tid)?;
        self.order.retain(|known| known != &tid);
        Some(hash)
    }
}
