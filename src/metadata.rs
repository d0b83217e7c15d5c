//! The metadata-fetch engine.
//!
//! For every `(info-hash, peer)` candidate produced by the indexing engine, a
//! [`Leech`] runs one short-lived BitTorrent session whose only goal is the
//! torrent's info dictionary: handshake with the extension bit, `ut_metadata`
//! handshake ([BEP-10]), piece transfer ([BEP-9]), SHA-1 verification against
//! the info-hash. The [`Sink`] admission-controls the leeches, deduplicates
//! in-flight info-hashes and retries failed hashes against their remaining
//! candidate peers.
//!
//! [BEP-9]: http://bittorrent.org/beps/bep_0009.html
//! [BEP-10]: http://bittorrent.org/beps/bep_0010.html

mod error;
mod info;
mod leech;
mod peer_id;
mod sink;
mod wire;

pub use error::LeechError;
pub use info::{Metadata, TorrentFile};
pub use leech::Leech;
pub use peer_id::PeerId;
pub use sink::Sink;
pub use wire::to_big_endian;

#[cfg(test)]
mod tests;
