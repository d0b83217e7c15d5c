use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::SinkConfig;
use crate::dht::IndexingResult;

use super::error::LeechError;
use super::info::Metadata;
use super::leech::Leech;
use super::peer_id::PeerId;

/// How many finished records may wait between the sink and its consumer.
const DRAIN_QUEUE: usize = 10;

/// Admission control, dedup and retry for leeches.
///
/// The sink owns the table of info-hashes currently being fetched: at most
/// one leech runs per info-hash, at most `max_leeches` hashes are in flight,
/// and a failed leech is retried against the hash's next candidate peer
/// until the candidates run out. Completed [`Metadata`] records come out of
/// [`Sink::drain`].
///
/// All table work happens in O(1) critical sections that never touch the
/// network; the leeches themselves run as their own tasks and report back
/// over a channel.
pub struct Sink {
    config: SinkConfig,
    peer_id: PeerId,
    shared: Arc<SinkShared>,
    outcomes: mpsc::UnboundedSender<LeechOutcome>,
    drain: Option<mpsc::Receiver<Metadata>>,
    pump: JoinHandle<()>,
}

struct SinkShared {
    /// info-hash → candidate peers not yet tried. Presence in the map is
    /// what "in flight" means.
    pending: Mutex<HashMap<[u8; 20], VecDeque<SocketAddr>>>,
    terminated: AtomicBool,
}

/// What a finished leech task reports back, success or not.
struct LeechOutcome {
    info_hash: [u8; 20],
    result: Result<Metadata, LeechError>,
}

impl Sink {
    pub fn new(config: SinkConfig) -> Self {
        let peer_id = PeerId::generate();
        let shared = Arc::new(SinkShared {
            pending: Mutex::new(HashMap::new()),
            terminated: AtomicBool::new(false),
        });
        let (outcomes, outcomes_rx) = mpsc::unbounded_channel();
        let (drain_tx, drain_rx) = mpsc::channel(DRAIN_QUEUE);

        let pump = tokio::spawn(pump_outcomes(
            Arc::clone(&shared),
            outcomes_rx,
            outcomes.clone(),
            drain_tx,
            peer_id,
            config,
        ));

        Self {
            config,
            peer_id,
            shared,
            outcomes,
            drain: Some(drain_rx),
            pump,
        }
    }

    /// Offers an indexing result for leeching.
    ///
    /// Silently dropped when the in-flight table is full, the info-hash is
    /// already in flight, or the result carries no candidate peers.
    /// Otherwise a leech starts against the first candidate and the rest are
    /// queued for retries.
    ///
    /// # Panics
    ///
    /// Panics when the sink has been terminated; feeding a dead sink is a
    /// programming error.
    pub fn sink(&self, result: IndexingResult) {
        if self.shared.terminated.load(Ordering::SeqCst) {
            panic!("sink() on a terminated sink");
        }

        let info_hash = result.info_hash();
        let first = {
            let mut pending = self.shared.pending.lock();
            if pending.len() >= self.config.max_leeches {
                trace!("leech table full, dropping result");
                return;
            }
            if pending.contains_key(&info_hash) {
                return;
            }
            let mut peers: VecDeque<SocketAddr> = result.into_peer_addrs().into();
            let Some(first) = peers.pop_front() else {
                return;
            };
            pending.insert(info_hash, peers);
            first
        };

        // Outside the lock: spawning touches the runtime, not the table.
        spawn_leech(
            info_hash,
            first,
            self.peer_id,
            self.config,
            self.outcomes.clone(),
        );
    }

    /// Number of info-hashes currently in flight.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// The stream of completed records. Single consumer, take-once.
    ///
    /// # Panics
    ///
    /// Panics when taken twice or after termination.
    pub fn drain(&mut self) -> mpsc::Receiver<Metadata> {
        if self.shared.terminated.load(Ordering::SeqCst) {
            panic!("drain() on a terminated sink");
        }
        self.drain.take().expect("drain() called twice")
    }

    /// Stops accepting work and closes the drain. In-flight leeches run to
    /// their deadline; their outcomes are discarded.
    pub fn terminate(&self) {
        self.shared.terminated.store(true, Ordering::SeqCst);
        self.pump.abort();
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_leech(
    info_hash: [u8; 20],
    peer: SocketAddr,
    peer_id: PeerId,
    config: SinkConfig,
    outcomes: mpsc::UnboundedSender<LeechOutcome>,
) {
    tokio::spawn(async move {
        let deadline = Instant::now() + config.deadline;
        let result = Leech::new(info_hash, peer, peer_id).run(deadline).await;
        if let Err(err) = &result {
            trace!(%peer, %err, "leech failed");
        }
        // The pump may be gone already; then the outcome is moot anyway.
        let _ = outcomes.send(LeechOutcome { info_hash, result });
    });
}

/// Applies leech outcomes to the pending table: flush and forget on success,
/// move on to the next candidate on failure.
async fn pump_outcomes(
    shared: Arc<SinkShared>,
    mut outcomes_rx: mpsc::UnboundedReceiver<LeechOutcome>,
    outcomes: mpsc::UnboundedSender<LeechOutcome>,
    drain: mpsc::Sender<Metadata>,
    peer_id: PeerId,
    config: SinkConfig,
) {
    while let Some(outcome) = outcomes_rx.recv().await {
        if shared.terminated.load(Ordering::SeqCst) {
            return;
        }

        match outcome.result {
            Ok(metadata) => {
                debug!(name = %metadata.name, "metadata acquired");
                if drain.send(metadata).await.is_err() {
                    return;
                }
                // Only after the flush, so the hash stays deduplicated for
                // its entire lifetime.
                shared.pending.lock().remove(&outcome.info_hash);
            }
            Err(_) => {
                let next = {
                    let mut pending = shared.pending.lock();
                    match pending.get_mut(&outcome.info_hash).and_then(VecDeque::pop_front) {
                        Some(peer) => Some(peer),
                        None => {
                            pending.remove(&outcome.info_hash);
                            None
                        }
                    }
                };
                if let Some(peer) = next {
                    spawn_leech(outcome.info_hash, peer, peer_id, config, outcomes.clone());
                }
            }
        }
    }
}
