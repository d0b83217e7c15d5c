use thiserror::Error;

/// Errors on the DHT side of the crate.
///
/// None of these cross into the metadata engine; a malformed packet is
/// dropped and a failed send is at worst a congestion signal.
#[derive(Debug, Error)]
pub enum DhtError {
    /// Socket-level failure, typically at bind time.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet failed to decode as bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// Packet decoded as bencode but not as a KRPC message.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    /// The transport has been terminated; writes can no longer succeed.
    #[error("transport closed")]
    Closed,
}
