use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::IndexerConfig;
use crate::constants::RESULT_QUEUE;

use super::error::DhtError;
use super::service::{IndexingResult, IndexingService};

/// Fan-in of one [`IndexingService`] per bind address into a single stream
/// of [`IndexingResult`]s.
///
/// Results from different services interleave arbitrarily; no ordering is
/// promised. The output channel closes once the manager is terminated and
/// every service has shut down.
pub struct IndexingManager {
    services: Vec<IndexingService>,
    output: Option<mpsc::Receiver<IndexingResult>>,
}

impl IndexingManager {
    /// One service per address, all feeding the same queue. Nothing touches
    /// the network until [`IndexingManager::start`].
    pub fn new(addrs: &[SocketAddr], config: IndexerConfig) -> Self {
        let (tx, rx) = mpsc::channel(RESULT_QUEUE);
        let services = addrs
            .iter()
            .map(|laddr| IndexingService::new(*laddr, config, tx.clone()))
            .collect();

        Self {
            services,
            output: Some(rx),
        }
    }

    /// Starts every service, binding them concurrently. Fails on the first
    /// bind error; services that did start keep running until `terminate`.
    pub async fn start(&mut self) -> Result<(), DhtError> {
        futures::future::try_join_all(self.services.iter_mut().map(IndexingService::start))
            .await?;
        info!(services = self.services.len(), "indexing started");
        Ok(())
    }

    /// The result stream. Single consumer; can be taken once.
    ///
    /// # Panics
    ///
    /// Panics when called a second time.
    pub fn output(&mut self) -> mpsc::Receiver<IndexingResult> {
        self.output
            .take()
            .expect("indexing manager output taken twice")
    }

    /// Stops all services and, with them, the output stream.
    pub fn terminate(&mut self) {
        for service in &mut self.services {
            service.terminate();
        }
        // Dropping the services drops their senders, which closes the
        // output channel for the consumer.
        self.services.clear();
    }
}
