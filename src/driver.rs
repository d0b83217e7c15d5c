//! The top-level loop coupling the two engines to the store.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::dht::IndexingManager;
use crate::metadata::Sink;
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum DriverError {
    /// The indexing engine could not come up, typically a bind failure.
    #[error("indexing failed to start: {0}")]
    Start(#[source] crate::dht::DhtError),

    /// The store could not answer an existence check; without it every
    /// result would be re-leeched forever, so the driver gives up.
    #[error("existence check failed: {0}")]
    Exists(#[source] StoreError),
}

/// Couples manager output to sink input and sink output to the store.
///
/// Every indexing result whose info-hash the store does not know yet goes to
/// the sink; every record the sink completes goes into the store. A failed
/// `insert` costs one record and a warning, a failed `exists` stops the
/// driver.
pub struct Driver {
    manager: IndexingManager,
    sink: Sink,
    store: Arc<dyn Store>,
}

impl Driver {
    pub fn new(manager: IndexingManager, sink: Sink, store: Arc<dyn Store>) -> Self {
        Self {
            manager,
            sink,
            store,
        }
    }

    /// Runs until `shutdown` fires (or its sender is dropped), then
    /// terminates the manager, drains the sink and closes nothing else; the
    /// store stays usable for the embedder.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<(), DriverError> {
        let mut results = self.manager.output();
        let mut drain = self.sink.drain();
        self.manager.start().await.map_err(DriverError::Start)?;

        loop {
            tokio::select! {
                result = results.recv() => {
                    let Some(result) = result else { break };
                    let known = self
                        .store
                        .exists(&result.info_hash())
                        .await
                        .map_err(DriverError::Exists)?;
                    if !known {
                        self.sink.sink(result);
                    }
                }
                metadata = drain.recv() => {
                    let Some(metadata) = metadata else { break };
                    info!(name = %metadata.name, size = metadata.total_size, "torrent indexed");
                    if let Err(err) = self.store.insert(metadata).await {
                        warn!(%err, "insert failed, record dropped");
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        self.manager.terminate();
        self.sink.terminate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexerConfig, SinkConfig};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn driver_shuts_down_on_signal() {
        let manager = IndexingManager::new(
            &["127.0.0.1:0".parse().unwrap()],
            IndexerConfig {
                interval: std::time::Duration::from_secs(600),
                ..IndexerConfig::default()
            },
        );
        let driver = Driver::new(
            manager,
            Sink::new(SinkConfig::default()),
            Arc::new(MemoryStore::new()),
        );

        let (stop, stop_rx) = oneshot::channel();
        let run = tokio::spawn(driver.run(stop_rx));
        stop.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), run)
            .await
            .expect("driver should stop promptly")
            .unwrap()
            .unwrap();
    }
}
