//! Construction-time configuration.
//!
//! Tunables travel as plain values through the constructors; nothing is read
//! from the environment or from process-wide state.

use std::time::Duration;

use crate::constants::{
    DEFAULT_INDEXER_INTERVAL, DEFAULT_LEECH_DEADLINE, DEFAULT_MAX_LEECHES, DEFAULT_MAX_NEIGHBOURS,
    DEFAULT_MAX_RPS,
};

/// UDP transport settings.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Outgoing datagrams per second; 0 disables throttling.
    pub max_rps: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_rps: DEFAULT_MAX_RPS,
        }
    }
}

/// Indexing-service settings; one service runs per bind address.
#[derive(Debug, Clone, Copy)]
pub struct IndexerConfig {
    /// Period of the neighbour-probing loop.
    pub interval: Duration,
    /// Cap on the per-service neighbour set; oldest entries are evicted.
    pub max_neighbours: usize,
    /// Settings of the service's UDP transport.
    pub transport: TransportConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INDEXER_INTERVAL,
            max_neighbours: DEFAULT_MAX_NEIGHBOURS,
            transport: TransportConfig::default(),
        }
    }
}

/// Metadata-sink settings.
#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    /// Ceiling on concurrently leeched info-hashes.
    pub max_leeches: usize,
    /// Total deadline of a single leech session.
    pub deadline: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_leeches: DEFAULT_MAX_LEECHES,
            deadline: DEFAULT_LEECH_DEADLINE,
        }
    }
}
