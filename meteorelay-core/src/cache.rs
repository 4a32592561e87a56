//! Value Cache: Merging Partial Packets into Coherent Snapshots
//!
//! ## Overview
//!
//! Wind, rain and soil sensors report at uncoordinated cadences. The cache
//! remembers the last value of every field together with the time it was
//! heard, and turns "whatever we heard most recently" into a single
//! point-in-time [`Snapshot`]. Fields that have gone quiet age out silently:
//! they show up as [`FieldValue::Stale`] instead of blocking or failing.
//!
//! ```text
//!           update(t=1000)   update(t=1005)       snapshot(t=1006)
//! outTemp   21.0 @1000       ─                    Fresh(21.0)
//! windSpeed ─                3.2 @1005            Fresh(3.2)
//!
//!                                                 snapshot(t=1960)
//! outTemp                                         Stale   (960s old)
//! windSpeed                                       Fresh(3.2)
//! ```
//!
//! ## Ownership
//!
//! The cache is owned by the ingestion path and mutated only there. Snapshots
//! are detached copies, so the upload worker never touches the cache and no
//! lock is needed.
//!
//! ## Unit Consistency
//!
//! The first packet binds the cache to its unit system. A later packet with a
//! different tag is rejected as a whole with
//! [`CoreError::InconsistentUnits`]; nothing from it is merged.

use std::collections::BTreeMap;

use crate::errors::{CoreError, CoreResult};
use crate::observation::{Field, FieldValue, Packet, SensorSample, Snapshot};
use crate::time::{age, SystemTime, TimeSource, Timestamp};
use crate::units::UnitSystem;

/// Default staleness threshold in seconds
pub const DEFAULT_CACHE_STALE: u64 = 960;

/// Last value heard for one field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    /// Last reported value
    pub value: f64,
    /// Timestamp of the packet that reported it
    pub cached_at: Timestamp,
}

impl CacheEntry {
    /// True while the entry is younger than `threshold` at `ts`
    pub fn is_fresh(&self, ts: Timestamp, threshold: u64) -> bool {
        age(self.cached_at, ts) < threshold
    }
}

/// Merges incoming packets into a running snapshot
pub struct ValueCache<T: TimeSource = SystemTime> {
    unit_system: Option<UnitSystem>,
    entries: BTreeMap<Field, CacheEntry>,
    time_source: T,
}

impl ValueCache<SystemTime> {
    /// Cache stamped by the wall clock
    pub fn new() -> Self {
        Self::with_time_source(SystemTime)
    }
}

impl Default for ValueCache<SystemTime> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeSource> ValueCache<T> {
    /// Cache using a custom clock for snapshots taken without a timestamp
    pub fn with_time_source(time_source: T) -> Self {
        Self {
            unit_system: None,
            entries: BTreeMap::new(),
            time_source,
        }
    }

    /// Merge a packet, stamping every value with the packet's `dateTime`
    pub fn update(&mut self, packet: &Packet) -> CoreResult<()> {
        self.bind_units(packet.us_units)?;
        for sample in packet.samples() {
            self.merge(sample);
        }
        Ok(())
    }

    /// Merge raw values observed at `ts`
    ///
    /// `None` values and the reserved `dateTime`/`usUnits` keys are skipped.
    pub fn update_values<'a, I>(
        &mut self,
        values: I,
        unit_system: UnitSystem,
        ts: Timestamp,
    ) -> CoreResult<()>
    where
        I: IntoIterator<Item = (&'a Field, &'a Option<f64>)>,
    {
        self.bind_units(unit_system)?;
        for (field, value) in values {
            if let (Some(value), false) = (*value, field.is_reserved()) {
                self.merge(SensorSample {
                    field: field.clone(),
                    value,
                    observed_at: ts,
                });
            }
        }
        Ok(())
    }

    fn bind_units(&mut self, received: UnitSystem) -> CoreResult<()> {
        match self.unit_system {
            None => {
                log::debug!("value cache bound to {} units", received);
                self.unit_system = Some(received);
                Ok(())
            }
            Some(bound) if bound == received => Ok(()),
            Some(bound) => Err(CoreError::InconsistentUnits { bound, received }),
        }
    }

    fn merge(&mut self, sample: SensorSample) {
        self.entries.insert(
            sample.field,
            CacheEntry {
                value: sample.value,
                cached_at: sample.observed_at,
            },
        );
    }

    /// Point-in-time snapshot
    ///
    /// `ts` defaults to the cache's clock. A field is fresh iff
    /// `ts - cached_at < stale_threshold`.
    pub fn snapshot(&self, ts: Option<Timestamp>, stale_threshold: u64) -> Snapshot {
        let ts = ts.unwrap_or_else(|| self.time_source.now());
        let fields = self
            .entries
            .iter()
            .map(|(field, entry)| {
                let value = if entry.is_fresh(ts, stale_threshold) {
                    FieldValue::Fresh(entry.value)
                } else {
                    FieldValue::Stale
                };
                (field.clone(), value)
            })
            .collect();

        Snapshot::from_parts(ts, self.unit_system, fields)
    }

    /// Fresh value of a single field
    pub fn value(&self, field: &Field, ts: Timestamp, stale_threshold: u64) -> Option<f64> {
        self.entries
            .get(field)
            .filter(|entry| entry.is_fresh(ts, stale_threshold))
            .map(|entry| entry.value)
    }

    /// Raw entry, regardless of age
    pub fn entry(&self, field: &Field) -> Option<&CacheEntry> {
        self.entries.get(field)
    }

    /// Unit system the cache is bound to, if any packet was merged yet
    pub fn unit_system(&self) -> Option<UnitSystem> {
        self.unit_system
    }

    /// Number of fields ever seen
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True until the first non-null value is merged
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
