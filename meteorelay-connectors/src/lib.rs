//! Upload Side of the Relay: Connectors, Worker and Service
//!
//! ## Overview
//!
//! Snapshots leave the core through a bounded queue. Everything past that
//! point lives here: a background [`UploadWorker`](worker::UploadWorker)
//! that rate-limits and retries, the [`Connector`] it sends through, and the
//! [`RelayService`](service::RelayService) that wires a cache, a queue and a
//! worker thread together.
//!
//! ```text
//! RelayService::new_loop_packet
//!      │  ValueCache::update + snapshot      (ingestion thread)
//!      ▼
//! QueueProducer::push ──→ QueueConsumer::pop (worker thread)
//!                              │ coalesce, rate limit, stale check
//!                              ▼
//!                         UnitConverter → RequestFormatter
//!                              ▼
//!                         Connector::send ──→ Delivery
//! ```
//!
//! ## Delivery Model
//!
//! Sends never raise. A [`Connector`] reports one of three outcomes and the
//! worker's retry state machine matches on it:
//!
//! | outcome              | meaning                                   | worker reaction    |
//! |----------------------|-------------------------------------------|--------------------|
//! | `Delivered`          | collector acknowledged with `OK`          | done               |
//! | `RejectedByServer`   | collector answered, but not with `OK`     | retry if attempts  |
//! | `TransportFailure`   | timeout, refused connection, bad body     | retry if attempts  |
//!
//! Upload failures stay inside the worker. The ingestion path only ever sees
//! unit-consistency errors from the cache.
//!
//! ## Example Usage
//!
//! ```no_run
//! use meteorelay_connectors::{RelayConfig, RelayService};
//! use meteorelay_core::{Field, Packet, UnitSystem};
//!
//! let config = RelayConfig::new("station-key", "station-id").post_interval_secs(5.0);
//! let mut service = RelayService::start(config)?;
//!
//! service.new_loop_packet(&Packet::new(1000, UnitSystem::Metric).with(Field::OutTemp, 21.0))?;
//! service.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod http;
pub mod service;
pub mod worker;

pub use config::{ConfigError, RelayConfig};
pub use http::{check_response, HttpConnector};
pub use service::{RelayService, ServiceError};
pub use worker::{
    PostError, PostOutcome, PostState, RetryState, ShutdownSignal, SkipReason, UploadWorker,
    WorkerStats,
};

use thiserror::Error;

/// Common connector errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("Timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

/// Result of a single send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The collector acknowledged the observation
    Delivered,
    /// The collector answered but did not accept the observation
    RejectedByServer(String),
    /// No usable answer: timeout, connection failure, unreadable response
    TransportFailure(ConnectorError),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// Trait for all protocol connectors
pub trait Connector: Send {
    /// Issue one request for the fully rendered URL
    fn send(&mut self, url: &str) -> Delivery;

    /// Get connection statistics
    fn stats(&self) -> ConnectionStats;
}

impl<C: Connector + ?Sized> Connector for Box<C> {
    fn send(&mut self, url: &str) -> Delivery {
        (**self).send(url)
    }

    fn stats(&self) -> ConnectionStats {
        (**self).stats()
    }
}

/// Connection statistics common to all connectors
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total requests acknowledged
    pub messages_sent: u64,
    /// Total requests rejected or failed
    pub messages_failed: u64,
    /// Total bytes of request URLs sent
    pub bytes_sent: u64,
    /// Last error message
    pub last_error: Option<String>,
}

impl ConnectionStats {
    /// Fold one send outcome into the counters
    pub fn record(&mut self, url: &str, delivery: &Delivery) {
        self.bytes_sent += url.len() as u64;
        match delivery {
            Delivery::Delivered => self.messages_sent += 1,
            Delivery::RejectedByServer(reason) => {
                self.messages_failed += 1;
                self.last_error = Some(reason.clone());
            }
            Delivery::TransportFailure(err) => {
                self.messages_failed += 1;
                self.last_error = Some(err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_record_outcomes() {
        let mut stats = ConnectionStats::default();
        stats.record("http://x/a", &Delivery::Delivered);
        stats.record("http://x/b", &Delivery::RejectedByServer("ERROR invalid key".into()));
        stats.record("http://x/c", &Delivery::TransportFailure(ConnectorError::Timeout));

        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_failed, 2);
        assert_eq!(stats.bytes_sent, 30);
        assert_eq!(stats.last_error.as_deref(), Some("Timeout"));
    }
}
