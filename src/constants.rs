//! Protocol constants and tuning parameters.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Azureus-style peer-id prefix; the remaining 12 bytes are random digits.
pub const PEER_ID_PREFIX: &[u8; 8] = b"-SD0001-";

// ============================================================================
// DHT
// ============================================================================

/// Well-known DHT routers used to seed the neighbour set.
pub const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
    "dht.libtorrent.org:25401",
    "dht.aelitis.com:6881",
];

/// Bytes copied from the target when deriving a per-probe neighbour id.
/// 15 of 20 bytes shared puts us within the recipient's close bucket range.
pub const NEIGHBOUR_PREFIX_LEN: usize = 15;

/// Largest payload an IPv4 UDP datagram can carry (65 535 minus the UDP and
/// IP headers); the read buffer is sized accordingly.
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Decoded packets queued between the transport read loop and the service.
/// Overflow drops the packet; the DHT is best-effort.
pub const TRANSPORT_EVENT_QUEUE: usize = 512;

/// Indexing results queued between services and the manager's consumer.
pub const RESULT_QUEUE: usize = 256;

/// Outstanding get_peers transactions remembered per service.
pub const MAX_GET_PEERS_PENDING: usize = 4096;

/// Neighbours queried per freshly observed info-hash.
pub const GET_PEERS_FANOUT: usize = 8;

/// How often the transport logs and resets its traffic counters.
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// BitTorrent wire protocol
// ============================================================================

/// Protocol identifier in the 68-byte handshake.
pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Handshake length: 1 + 19 + 8 + 20 + 20.
pub const HANDSHAKE_LEN: usize = 68;

/// Extension-protocol bit (BEP-10), reserved byte 5.
pub const EXTENSION_BIT: u8 = 0x10;

/// BT message type carrying extension-protocol payloads.
pub const MSG_EXTENDED: u8 = 20;

/// Extended id of the extension handshake itself.
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// The ut_metadata id we advertise in our extension handshake.
pub const UT_METADATA_LOCAL_ID: u8 = 1;

/// Metadata piece size (BEP-9).
pub const METADATA_PIECE_SIZE: usize = 16384;

/// Ceiling on advertised metadata_size; larger offers are junk or abuse.
pub const MAX_METADATA_SIZE: usize = 10 * 1024 * 1024;

/// Largest length-prefixed message a leech will buffer.
pub const MAX_WIRE_MESSAGE: usize = METADATA_PIECE_SIZE + 1024;

// ============================================================================
// Defaults (see config.rs)
// ============================================================================

/// Default probe period of an indexing service.
pub const DEFAULT_INDEXER_INTERVAL: Duration = Duration::from_secs(1);

/// Default cap on the per-service neighbour set.
pub const DEFAULT_MAX_NEIGHBOURS: usize = 1000;

/// Default transport throttle; 0 is unlimited.
pub const DEFAULT_MAX_RPS: u32 = 0;

/// Default ceiling on concurrently leeched info-hashes.
pub const DEFAULT_MAX_LEECHES: usize = 50;

/// Default total deadline of a single leech session.
pub const DEFAULT_LEECH_DEADLINE: Duration = Duration::from_secs(5);
