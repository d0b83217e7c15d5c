use std::fmt;

use rand::Rng as _;

use crate::constants::PEER_ID_PREFIX;

/// Our 20-byte peer id: the Azureus-style client prefix followed by twelve
/// random ASCII digits. One id is minted per sink and shared by its leeches.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PeerId([u8; 20]);

impl PeerId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PEER_ID_PREFIX);
        let mut rng = rand::rng();
        for byte in &mut id[8..] {
            *byte = rng.random_range(b'0'..=b'9');
        }
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}
