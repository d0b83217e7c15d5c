use thiserror::Error;

/// Ways a single leech session can fail.
///
/// All of these are fatal to the session and none to the system: the sink
/// answers a failure by trying the info-hash's next candidate peer.
#[derive(Debug, Error)]
pub enum LeechError {
    /// TCP connect failed.
    #[error("connect: {0}")]
    Connect(#[source] std::io::Error),

    /// The peer's handshake is not a BitTorrent handshake.
    #[error("handshake rejected")]
    HandshakeRejected,

    /// The peer handshook for a different torrent.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// The peer does not offer `ut_metadata`, or refused to serve it.
    #[error("ut_metadata unsupported or refused")]
    ExtensionUnsupported,

    /// `metadata_size` missing, non-positive, or above the ceiling.
    #[error("invalid metadata size: {0}")]
    InvalidMetadataSize(i64),

    /// A piece index out of range or piece payload above 16 KiB.
    #[error("piece {0} too large or out of range")]
    PieceTooLarge(u32),

    /// A message payload failed to decode as bencode.
    #[error("decode: {0}")]
    Decode(#[from] crate::bencode::BencodeError),

    /// SHA-1 of the reassembled dictionary differs from the info-hash.
    /// Retrying the same peer is pointless.
    #[error("metadata hash mismatch")]
    HashMismatch,

    /// The verified dictionary is not a sane info dictionary.
    #[error("invalid info dictionary: {0}")]
    InvalidInfo(&'static str),

    /// The session deadline expired.
    #[error("deadline exceeded")]
    Timeout,

    /// The peer closed the connection mid-session.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Unsupported width passed to the big-endian helper.
    #[error("unsupported big-endian width: {0}")]
    InvalidWidth(usize),
}
