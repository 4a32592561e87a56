//! Relay service wiring a cache, an upload queue and a worker thread

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use meteorelay_core::{upload_queue, CoreResult, Packet, QueueProducer, QueueStats, ValueCache};
use thiserror::Error;

use crate::config::{ConfigError, RelayConfig};
use crate::http::HttpConnector;
use crate::worker::{ShutdownSignal, UploadWorker, WorkerStats};
use crate::Connector;

/// Errors starting the relay
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn upload worker: {0}")]
    Spawn(#[from] io::Error),
}

/// Running relay for one station
///
/// Ingestion happens on the caller's thread through
/// [`new_loop_packet`](Self::new_loop_packet); uploads happen on a dedicated
/// worker thread owned by the service.
pub struct RelayService {
    config: RelayConfig,
    cache: ValueCache,
    producer: Option<QueueProducer>,
    shutdown: ShutdownSignal,
    stats: Arc<WorkerStats>,
    worker: Option<JoinHandle<()>>,
}

impl RelayService {
    /// Validate `config` and start uploading over HTTP
    pub fn start(config: RelayConfig) -> Result<Self, ServiceError> {
        let config = config.validate()?;
        let connector = HttpConnector::new(config.request_timeout());
        Self::start_with(config, connector)
    }

    /// Start with a caller-supplied connector
    pub fn start_with<C: Connector + 'static>(
        config: RelayConfig,
        connector: C,
    ) -> Result<Self, ServiceError> {
        let config = config.validate()?;
        let (producer, consumer) = upload_queue(config.max_backlog);
        let shutdown = ShutdownSignal::new();

        let worker = UploadWorker::new(&config, consumer, connector).with_shutdown(shutdown.clone());
        let stats = worker.stats();
        let handle = worker.spawn()?;

        log::info!(
            "relaying station {} every {:.0}s (max_backlog {}, max_tries {})",
            config.station_id,
            config.post_interval,
            config.max_backlog,
            config.max_tries
        );
        if config.skip_upload {
            log::info!("skip_upload set, records will be formatted but not sent");
        }

        Ok(Self {
            config,
            cache: ValueCache::new(),
            producer: Some(producer),
            shutdown,
            stats,
            worker: Some(handle),
        })
    }

    /// Merge a loop packet and queue the resulting snapshot
    ///
    /// A packet whose unit system disagrees with the cache is rejected and
    /// nothing is queued.
    pub fn new_loop_packet(&mut self, packet: &Packet) -> CoreResult<()> {
        self.cache.update(packet)?;
        let snapshot = self.cache.snapshot(Some(packet.date_time), self.config.cache_stale);

        match &self.producer {
            Some(producer) => {
                producer.push(snapshot);
            }
            None => log::warn!("relay closed, dropping snapshot {}", packet.date_time),
        }
        Ok(())
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn queue_stats(&self) -> Option<&QueueStats> {
        self.producer.as_ref().map(QueueProducer::stats)
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stop accepting packets and wait for the worker to drain the queue
    pub fn close(&mut self) {
        self.producer = None;
        self.join();
    }

    /// Stop the worker as soon as possible, abandoning queued snapshots
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.shutdown.trigger();
        self.producer = None;
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("upload worker panicked");
            }
        }
    }
}

impl Drop for RelayService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
