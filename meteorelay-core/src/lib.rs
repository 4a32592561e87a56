//! Core data path for meteorelay
//!
//! Merges partial weather station packets into point-in-time snapshots and
//! hands them to the upload side through a bounded queue.
//!
//! Key constraints:
//! - The ingestion path never blocks on upload problems
//! - A cache is bound to exactly one unit system
//! - Quiet fields age out instead of being uploaded forever
//!
//! ```no_run
//! use meteorelay_core::{upload_queue, Field, Packet, UnitSystem, ValueCache, DEFAULT_CACHE_STALE};
//!
//! let mut cache = ValueCache::new();
//! let (producer, _consumer) = upload_queue(100);
//!
//! let packet = Packet::new(1000, UnitSystem::Metric).with(Field::OutTemp, 21.0);
//! cache.update(&packet)?;
//! producer.push(cache.snapshot(Some(packet.date_time), DEFAULT_CACHE_STALE));
//! # Ok::<(), meteorelay_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Merging partial packets into snapshots
pub mod cache;
/// Error types
pub mod errors;
/// Query string rendering
pub mod format;
/// Fields, packets and snapshots
pub mod observation;
/// Bounded hand-off to the upload worker
pub mod queue;
/// Packet sources
pub mod source;
/// Clock abstraction
pub mod time;
/// Unit systems and conversion
pub mod units;

// Public API
pub use cache::{CacheEntry, ValueCache, DEFAULT_CACHE_STALE};
pub use errors::{CoreError, CoreResult};
pub use format::{RequestFormatter, WireToken};
pub use observation::{Field, FieldValue, Packet, SensorSample, Snapshot};
pub use queue::{upload_queue, QueueConsumer, QueueItem, QueueProducer, QueueStats};
pub use time::{FixedTime, SystemTime, TimeSource, Timestamp};
pub use units::{StandardConverter, UnitConverter, UnitGroup, UnitSystem};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
