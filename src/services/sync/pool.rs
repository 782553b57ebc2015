//! Supervises one stream runner per configured stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use super::applier::SyncApplier;
use super::mapping::MappingRegistry;
use super::runner::StreamRunner;
use super::transform::EventTransformer;
use crate::config::{StreamConfig, SyncConfig};
use crate::db::EntityStore;
use crate::transport::{StreamSpec, StreamTransport};

/// Fan-out lifecycle supervisor: holds no per-message logic.
///
/// Each runner owns its own subscription and its own cursor; the only
/// state shared through the pool is the entity store and the maintenance
/// counter.
pub struct ConsumerPool {
    transport: Arc<dyn StreamTransport>,
    store: Arc<dyn EntityStore>,
    registry: Arc<MappingRegistry>,
    config: SyncConfig,
    applied_counter: Arc<AtomicU64>,
}

impl ConsumerPool {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        store: Arc<dyn EntityStore>,
        registry: Arc<MappingRegistry>,
        config: SyncConfig,
    ) -> Self {
        Self {
            transport,
            store,
            registry,
            config,
            applied_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run one stream runner per config concurrently, to completion.
    ///
    /// Runners normally never complete; they run until `shutdown` fires or
    /// their transport closes the subscription. A fatal setup error in one
    /// runner is contained by that runner and does not affect the others.
    pub async fn start(&self, configs: Vec<StreamConfig>, shutdown: broadcast::Sender<()>) {
        let mut handles = Vec::with_capacity(configs.len());

        for config in configs {
            let stream = config.name.clone();
            let runner = self.build_runner(config);
            let shutdown_rx = shutdown.subscribe();
            handles.push((stream, tokio::spawn(runner.run(shutdown_rx))));
        }

        info!(runners = handles.len(), "Consumer pool started");

        for (stream, handle) in handles {
            if let Err(e) = handle.await {
                error!(stream = %stream, error = %e, "Stream runner task panicked");
            }
        }

        info!("Consumer pool stopped");
    }

    /// Messages applied across all runners since startup.
    pub fn applied_messages(&self) -> u64 {
        self.applied_counter.load(Ordering::Relaxed)
    }

    fn build_runner(&self, config: StreamConfig) -> StreamRunner {
        let spec = StreamSpec {
            name: config.name.clone(),
            leader_locator: self.config.retention.leader_locator.clone(),
            max_length_bytes: self.config.retention.max_length_bytes,
            max_segment_bytes: self.config.retention.max_segment_bytes,
        };

        StreamRunner::new(
            config,
            spec,
            Arc::clone(&self.transport),
            EventTransformer::new(Arc::clone(&self.registry)),
            SyncApplier::new(Arc::clone(&self.registry), Arc::clone(&self.store)),
            Arc::clone(&self.store),
            Arc::clone(&self.applied_counter),
            self.config.maintenance_interval.max(1),
            self.config.setup_max_retries,
        )
    }
}
