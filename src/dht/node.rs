use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use rand::Rng as _;

use crate::bencode::Value;
use crate::constants::NEIGHBOUR_PREFIX_LEN;

use super::error::DhtError;

/// A 20-byte node identifier, a point in the 160-bit XOR metric space.
///
/// Ids here are throwaway: the service mints a random identity at startup
/// and forges per-probe neighbour ids from it; nothing is ever persisted.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    /// A fresh random id.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        if bytes.len() != 20 {
            return Err(DhtError::InvalidMessage("node id must be 20 bytes"));
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Forges an id adjacent to `target`: the first [`NEIGHBOUR_PREFIX_LEN`]
    /// bytes are the target's, the suffix stays ours. Recipients of a probe
    /// carrying such an id file us into their closest buckets and relay
    /// traffic for that region of the id space to us.
    pub fn neighbour_of(&self, target: &NodeId) -> Self {
        let mut forged = self.0;
        forged[..NEIGHBOUR_PREFIX_LEN].copy_from_slice(&target.0[..NEIGHBOUR_PREFIX_LEN]);
        Self(forged)
    }

    /// XOR distance to another id.
    pub fn distance(&self, other: &NodeId) -> [u8; 20] {
        let mut dist = [0u8; 20];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        dist
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Parses the compact node format of `find_node`/`get_peers` responses:
/// 26-byte entries of id + IPv4 address, or 38-byte entries of id + IPv6
/// address for the `nodes6` key. Short trailing garbage is discarded.
pub fn parse_compact_nodes(data: &[u8]) -> Vec<(NodeId, SocketAddr)> {
    data.chunks_exact(26)
        .filter_map(|chunk| {
            let id = NodeId::from_bytes(&chunk[..20]).ok()?;
            let ip = Ipv4Addr::new(chunk[20], chunk[21], chunk[22], chunk[23]);
            let port = u16::from_be_bytes([chunk[24], chunk[25]]);
            (port > 0).then(|| (id, SocketAddr::new(IpAddr::V4(ip), port)))
        })
        .collect()
}

pub fn parse_compact_nodes6(data: &[u8]) -> Vec<(NodeId, SocketAddr)> {
    data.chunks_exact(38)
        .filter_map(|chunk| {
            let id = NodeId::from_bytes(&chunk[..20]).ok()?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&chunk[20..36]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([chunk[36], chunk[37]]);
            (port > 0).then(|| (id, SocketAddr::new(IpAddr::V6(ip), port)))
        })
        .collect()
}

/// Parses the `values` list of a `get_peers` response: 6-byte compact IPv4
/// endpoints or 18-byte compact IPv6 endpoints. Malformed entries and zero
/// ports are skipped.
pub fn parse_compact_peers(values: &[Value]) -> Vec<SocketAddr> {
    values
        .iter()
        .filter_map(|v| v.as_bytes())
        .filter_map(|b| match b.len() {
            6 => {
                let ip = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
                let port = u16::from_be_bytes([b[4], b[5]]);
                Some(SocketAddr::new(IpAddr::V4(ip), port))
            }
            18 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&b[..16]);
                let port = u16::from_be_bytes([b[16], b[17]]);
                Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            _ => None,
        })
        .filter(|addr| addr.port() > 0 && !addr.ip().is_unspecified())
        .collect()
}
