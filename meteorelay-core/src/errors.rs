//! Error Types for Merging and Converting Station Records
//!
//! ## Design Philosophy
//!
//! Errors in the core are about *data*, never about the network. Anything
//! that can go wrong while talking to the collector lives in the connectors
//! crate and stays confined to the upload worker.
//!
//! 1. **Small and Copy**: errors carry unit codes only, so they are cheap
//!    to return from the ingestion hot path.
//!
//! 2. **Fatal per call, not per process**: an `InconsistentUnits` error
//!    rejects one packet; the cache keeps serving everything it already has.
//!
//! 3. **Soft conditions are not errors**: a field that aged out of a snapshot
//!    is [`FieldValue::Stale`](crate::observation::FieldValue::Stale), and a
//!    backlog overflow is a dropped count returned from
//!    [`QueueProducer::push`](crate::queue::QueueProducer::push).
//!
//! ## Error Handling Strategy
//!
//! ```rust
//! use meteorelay_core::{CoreError, Packet, UnitSystem, ValueCache, Field};
//!
//! let mut cache = ValueCache::new();
//! cache.update(&Packet::new(1000, UnitSystem::Metric).with(Field::OutTemp, 21.0)).unwrap();
//!
//! match cache.update(&Packet::new(1005, UnitSystem::Us).with(Field::OutTemp, 70.0)) {
//!     Ok(()) => {}
//!     Err(CoreError::InconsistentUnits { bound, received }) => {
//!         // Misconfigured producer: report it, do not retry
//!         eprintln!("station switched from {bound} to {received}");
//!     }
//!     Err(_) => {}
//! }
//! ```

use crate::units::UnitSystem;
use thiserror_no_std::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while merging or converting records
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// A packet was tagged with a different unit system than the cache is bound to
    #[error("Mixed units encountered in cache: {bound} vs {received}")]
    InconsistentUnits {
        /// Unit system the cache was bound to by its first packet
        bound: UnitSystem,
        /// Unit system carried by the rejected packet
        received: UnitSystem,
    },

    /// Numeric unit code not recognised
    #[error("Unknown unit system code {0:#04x}")]
    UnknownUnitSystem(u8),

    /// Snapshot has fields but no unit system to convert from
    #[error("Snapshot carries no unit system")]
    MissingUnitSystem,
}
