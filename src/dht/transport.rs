use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::constants::{MAX_UDP_PAYLOAD, STATS_INTERVAL, TRANSPORT_EVENT_QUEUE};

use super::error::DhtError;
use super::message::Message;

/// What the transport delivers upward.
///
/// Congestion travels on the same bounded queue as packets so that the
/// handler can never block the loop that reported it.
#[derive(Debug)]
pub enum TransportEvent {
    /// A syntactically valid KRPC message and its source address.
    Packet(Message, SocketAddr),
    /// The kernel told us to slow down (`EPERM`/`ENOBUFS` on a send).
    Congestion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Started,
    Terminated,
}

struct Shared {
    socket: UdpSocket,
    /// Send tokens; `None` when throttling is disabled. Topped up to the
    /// configured rate once per second, consumed one per datagram.
    throttle: Option<Semaphore>,
    /// Serializes the send syscall; at most one is outstanding.
    send_serial: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct Stats {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

/// Rate-limited UDP datagram I/O on one bound address, framed by bencoding.
///
/// [`Transport::new`] only resolves state; the socket comes to life in
/// [`Transport::start`], which spawns the read loop, the throttle refill and
/// a stats ticker. Decoded messages and congestion signals are delivered on
/// the event channel returned by `new`; garbage packets are dropped where
/// they land. The DHT is noisy and best-effort throughout: a lost datagram
/// is never an error.
pub struct Transport {
    laddr: SocketAddr,
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
    state: Mutex<State>,
    shared: Mutex<Option<Arc<Shared>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<Stats>,
}

impl Transport {
    /// Creates a transport for `laddr` without binding it, and the receiving
    /// end of its event queue.
    pub fn new(laddr: SocketAddr, config: TransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, events_rx) = mpsc::channel(TRANSPORT_EVENT_QUEUE);
        (
            Self {
                laddr,
                config,
                events,
                state: Mutex::new(State::Created),
                shared: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                stats: Arc::new(Stats::default()),
            },
            events_rx,
        )
    }

    /// The address the socket is actually bound to; differs from the
    /// requested address when port 0 was asked for. `None` before `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .lock()
            .as_ref()
            .and_then(|shared| shared.socket.local_addr().ok())
    }

    /// Binds the socket and launches the read, throttle-refill and stats
    /// loops.
    ///
    /// # Panics
    ///
    /// Starting a transport twice is a programming error and panics rather
    /// than silently spawning a second set of loops.
    pub async fn start(&self) -> Result<(), DhtError> {
        {
            let mut state = self.state.lock();
            if *state != State::Created {
                panic!("transport for {} started twice", self.laddr);
            }
            *state = State::Started;
        }

        let socket = UdpSocket::bind(self.laddr).await?;
        debug!(laddr = %socket.local_addr()?, "transport bound");

        let rate = self.config.max_rps as usize;
        let shared = Arc::new(Shared {
            socket,
            throttle: (rate > 0).then(|| Semaphore::new(rate)),
            send_serial: tokio::sync::Mutex::new(()),
        });
        *self.shared.lock() = Some(Arc::clone(&shared));

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(read_loop(
            Arc::clone(&shared),
            self.events.clone(),
            Arc::clone(&self.stats),
        )));
        if rate > 0 {
            tasks.push(tokio::spawn(refill_loop(Arc::clone(&shared), rate)));
        }
        tasks.push(tokio::spawn(stats_loop(Arc::clone(&self.stats))));

        Ok(())
    }

    /// Bencodes `msg` and sends it to `dst`, waiting for a throttle token
    /// first.
    ///
    /// `EPERM`/`ENOBUFS` are the kernel's flow control, not failures: the
    /// datagram is dropped, a [`TransportEvent::Congestion`] is queued and
    /// `Ok(())` is returned. The token spent on the dropped datagram is not
    /// refunded. All other socket errors surface to the caller.
    pub async fn write(&self, msg: &Message, dst: SocketAddr) -> Result<(), DhtError> {
        let shared = self
            .shared
            .lock()
            .as_ref()
            .cloned()
            .ok_or(DhtError::Closed)?;

        if let Some(throttle) = &shared.throttle {
            let permit = throttle.acquire().await.map_err(|_| DhtError::Closed)?;
            permit.forget();
        }

        let data = msg.encode();
        let result = {
            let _serial = shared.send_serial.lock().await;
            shared.socket.send_to(&data, dst).await
        };

        match result {
            Ok(_) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) if is_congestion(&err) => {
                debug!(%dst, %err, "write congestion");
                let _ = self.events.try_send(TransportEvent::Congestion);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Closes the socket and stops all loops. Blocked `write` calls unblock
    /// with [`DhtError::Closed`]; already-started syscalls finish first.
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        if *state == State::Terminated {
            return;
        }
        *state = State::Terminated;
        drop(state);

        if let Some(shared) = self.shared.lock().take() {
            if let Some(throttle) = &shared.throttle {
                throttle.close();
            }
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// `EPERM` is the kernel's "you are too fast" on Linux (often an ICMP source
/// quench); `ENOBUFS` is the BSD flavour of the same condition.
fn is_congestion(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
        || matches!(err.raw_os_error(), Some(105) | Some(55))
}

async fn read_loop(
    shared: Arc<Shared>,
    events: mpsc::Sender<TransportEvent>,
    stats: Arc<Stats>,
) {
    // One receive buffer for the lifetime of the loop; decoded messages own
    // their bytes, the buffer is never shared outward.
    let mut buffer = vec![0u8; MAX_UDP_PAYLOAD];

    loop {
        let (len, from) = match shared.socket.recv_from(&mut buffer).await {
            Ok(read) => read,
            Err(err) if is_congestion(&err) => {
                let _ = events.try_send(TransportEvent::Congestion);
                continue;
            }
            Err(err) => {
                // Socket closed underneath us; that is the shutdown path.
                debug!(%err, "read loop exiting");
                return;
            }
        };

        // Zero-length datagrams are legal and meaningless.
        if len == 0 {
            continue;
        }

        let msg = match Message::parse(&buffer[..len]) {
            Ok(msg) => msg,
            // The public DHT is full of garbage; drop it without ceremony.
            Err(_) => continue,
        };

        stats.received.fetch_add(1, Ordering::Relaxed);
        if events.try_send(TransportEvent::Packet(msg, from)).is_err() {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Tops the token bucket back up to `rate` once per second. Unused tokens do
/// not accumulate past one second's worth.
async fn refill_loop(shared: Arc<Shared>, rate: usize) {
    let Some(throttle) = &shared.throttle else {
        return;
    };
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick.tick().await;

    loop {
        tick.tick().await;
        let deficit = rate.saturating_sub(throttle.available_permits());
        if deficit > 0 {
            throttle.add_permits(deficit);
        }
    }
}

async fn stats_loop(stats: Arc<Stats>) {
    let mut tick = tokio::time::interval(STATS_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick.tick().await;

    loop {
        tick.tick().await;
        let sent = stats.sent.swap(0, Ordering::Relaxed);
        let received = stats.received.swap(0, Ordering::Relaxed);
        let dropped = stats.dropped.swap(0, Ordering::Relaxed);
        let secs = STATS_INTERVAL.as_secs();
        info!(
            sent_per_s = sent / secs,
            received_per_s = received / secs,
            dropped,
            "transport traffic"
        );
    }
}
