//! The indexing engine: a passive Mainline DHT node ([BEP-5]).
//!
//! Unlike a regular DHT participant this node keeps no routing table and
//! never answers `get_peers` with authentic data. It floods `find_node`
//! probes whose sender id is forged to sit next to the recipient in the
//! 160-bit id space, which makes remote nodes remember it and relay their
//! `get_peers` and `announce_peer` traffic to it. That relayed traffic is
//! the product: every query carrying an info-hash becomes an
//! [`IndexingResult`] with candidate peer endpoints.
//!
//! Components:
//!
//! - [`Transport`] — rate-limited UDP datagram I/O framed by bencoding
//! - [`Message`] — the KRPC query/response/error model
//! - [`IndexingService`] — the per-address mining loop
//! - [`IndexingManager`] — fan-in of several services into one channel
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

mod error;
mod manager;
mod message;
mod node;
mod service;
mod transport;

pub use error::DhtError;
pub use manager::IndexingManager;
pub use message::{Message, MessageKind, Query, ResponseBody, TransactionId};
pub use node::NodeId;
pub use service::{IndexingResult, IndexingService};
pub use transport::{Transport, TransportEvent};

#[cfg(test)]
mod tests;
