//! sonda - a passive indexer for the BitTorrent Mainline DHT
//!
//! The crate continuously discovers torrent info-hashes circulating in the
//! DHT and, for each new one, downloads the torrent's metadata (the `info`
//! dictionary) straight from a swarm peer. Verified records are handed to a
//! pluggable [`store::Store`].
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencoding for KRPC and extension messages
//! - [`dht`] - the indexing engine: transport, KRPC, services, manager
//! - [`metadata`] - the fetch engine: leech sessions and the sink
//! - [`store`] - the persistence boundary
//! - [`driver`] - the loop wiring engines and store together
//!
//! # Getting started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sonda::config::{IndexerConfig, SinkConfig};
//! use sonda::dht::IndexingManager;
//! use sonda::driver::Driver;
//! use sonda::metadata::Sink;
//! use sonda::store::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = IndexingManager::new(&["0.0.0.0:0".parse()?], IndexerConfig::default());
//! let sink = Sink::new(SinkConfig::default());
//! let store = Arc::new(MemoryStore::new());
//!
//! let (stop, stop_rx) = tokio::sync::oneshot::channel();
//! # drop(stop);
//! Driver::new(manager, sink, store).run(stop_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod config;
pub mod constants;
pub mod dht;
pub mod driver;
pub mod metadata;
pub mod store;

pub use config::{IndexerConfig, SinkConfig, TransportConfig};
pub use dht::{IndexingManager, IndexingResult, IndexingService};
pub use driver::{Driver, DriverError};
pub use metadata::{Leech, LeechError, Metadata, Sink, TorrentFile};
pub use store::{MemoryStore, Store, StoreError};
