//! Observation Types: Fields, Packets and Snapshots
//!
//! ## Overview
//!
//! Station software emits *loop packets*: flat maps of observation name to
//! number, stamped with `dateTime` and tagged with `usUnits`. Each sensor
//! subsystem (wind, rain, soil, ...) only reports its own fields, at its own
//! cadence, so a single packet is nearly always partial.
//!
//! ```text
//! t=1000  {dateTime, usUnits, outTemp, outHumidity}
//! t=1002  {dateTime, usUnits, windSpeed, windDir}
//! t=1005  {dateTime, usUnits, windSpeed, windDir, windGust}
//!            │
//!            ▼  ValueCache::update / snapshot
//! t=1006  Snapshot {outTemp, outHumidity, windSpeed, windDir, windGust}
//! ```
//!
//! ## Field States
//!
//! A snapshot distinguishes three situations for every field:
//!
//! | state   | representation                      | meaning                          |
//! |---------|-------------------------------------|----------------------------------|
//! | absent  | `snapshot.get(f) == None`           | never reported by the station    |
//! | stale   | `Some(FieldValue::Stale)`           | reported, but too long ago       |
//! | present | `Some(FieldValue::Fresh(v))`        | recent enough to be uploaded     |
//!
//! Only present fields are rendered onto the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::time::Timestamp;
use crate::units::{UnitGroup, UnitSystem};

/// Packet key holding the observation timestamp; never cached
pub const DATE_TIME_KEY: &str = "dateTime";

/// Packet key holding the unit system tag; never cached
pub const US_UNITS_KEY: &str = "usUnits";

/// Observation vocabulary of a weather station
///
/// The known variants are the fields the collector understands. Anything
/// else a station reports is kept as [`Field::Other`] so it still flows
/// through the cache, but it is never rendered onto the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Sea-level pressure
    Barometer,
    /// Outside temperature
    OutTemp,
    /// Outside relative humidity, percent
    OutHumidity,
    /// Average wind speed
    WindSpeed,
    /// Wind direction, degrees
    WindDir,
    /// Gust speed
    WindGust,
    /// Dew point temperature
    Dewpoint,
    /// Rain over the last hour
    HourRain,
    /// Rain since midnight
    DayRain,
    /// Solar radiation, W/m²
    Radiation,
    /// UV index
    Uv,
    /// First soil temperature probe
    SoilTemp1,
    /// First soil moisture probe
    SoilMoist1,
    /// First leaf wetness sensor
    LeafWet1,
    /// Any observation outside the known vocabulary
    Other(String),
}

impl Field {
    /// Every known field, in wire rendering order
    pub const KNOWN: [Field; 14] = [
        Field::Barometer,
        Field::OutTemp,
        Field::OutHumidity,
        Field::WindSpeed,
        Field::WindDir,
        Field::WindGust,
        Field::Dewpoint,
        Field::HourRain,
        Field::DayRain,
        Field::Radiation,
        Field::Uv,
        Field::SoilTemp1,
        Field::SoilMoist1,
        Field::LeafWet1,
    ];

    /// Parse a packet key; unknown keys become [`Field::Other`]
    pub fn parse(name: &str) -> Self {
        match name {
            "barometer" => Field::Barometer,
            "outTemp" => Field::OutTemp,
            "outHumidity" => Field::OutHumidity,
            "windSpeed" => Field::WindSpeed,
            "windDir" => Field::WindDir,
            "windGust" => Field::WindGust,
            "dewpoint" => Field::Dewpoint,
            "hourRain" => Field::HourRain,
            "dayRain" => Field::DayRain,
            "radiation" => Field::Radiation,
            "UV" => Field::Uv,
            "soilTemp1" => Field::SoilTemp1,
            "soilMoist1" => Field::SoilMoist1,
            "leafWet1" => Field::LeafWet1,
            other => Field::Other(other.to_string()),
        }
    }

    /// Packet key as the station software spells it
    pub fn name(&self) -> &str {
        match self {
            Field::Barometer => "barometer",
            Field::OutTemp => "outTemp",
            Field::OutHumidity => "outHumidity",
            Field::WindSpeed => "windSpeed",
            Field::WindDir => "windDir",
            Field::WindGust => "windGust",
            Field::Dewpoint => "dewpoint",
            Field::HourRain => "hourRain",
            Field::DayRain => "dayRain",
            Field::Radiation => "radiation",
            Field::Uv => "UV",
            Field::SoilTemp1 => "soilTemp1",
            Field::SoilMoist1 => "soilMoist1",
            Field::LeafWet1 => "leafWet1",
            Field::Other(name) => name,
        }
    }

    /// Physical quantity, used for unit conversion
    pub fn group(&self) -> UnitGroup {
        match self {
            Field::OutTemp | Field::Dewpoint | Field::SoilTemp1 => UnitGroup::Temperature,
            Field::WindSpeed | Field::WindGust => UnitGroup::Speed,
            Field::Barometer => UnitGroup::Pressure,
            Field::HourRain | Field::DayRain => UnitGroup::Rain,
            Field::OutHumidity
            | Field::WindDir
            | Field::Radiation
            | Field::Uv
            | Field::SoilMoist1
            | Field::LeafWet1
            | Field::Other(_) => UnitGroup::Dimensionless,
        }
    }

    /// True for the keys that describe the packet rather than an observation
    pub fn is_reserved(&self) -> bool {
        matches!(self, Field::Other(name) if name == DATE_TIME_KEY || name == US_UNITS_KEY)
    }
}

impl FromStr for Field {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Field::parse(s))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Field::parse(&name))
    }
}

/// A single observation taken from a packet
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    /// What was measured
    pub field: Field,
    /// Reading in the packet's unit system
    pub value: f64,
    /// Packet timestamp
    pub observed_at: Timestamp,
}

/// Incoming loop packet
///
/// `None` values are kept as reported; the cache ignores them rather than
/// overwriting a good reading with a hole from a malformed packet.
///
/// ```rust
/// use meteorelay_core::{Field, Packet, UnitSystem};
///
/// let packet: Packet = serde_json::from_str(
///     r#"{"dateTime": 1000, "usUnits": 16, "outTemp": 21.0, "windDir": null}"#,
/// ).unwrap();
///
/// assert_eq!(packet.date_time, 1000);
/// assert_eq!(packet.us_units, UnitSystem::Metric);
/// assert_eq!(packet.values.get(&Field::OutTemp), Some(&Some(21.0)));
/// assert_eq!(packet.values.get(&Field::WindDir), Some(&None));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Observation time
    #[serde(rename = "dateTime")]
    pub date_time: Timestamp,
    /// Unit system of every value in the packet
    #[serde(rename = "usUnits")]
    pub us_units: UnitSystem,
    /// Readings; `None` for sensors that reported nothing
    #[serde(flatten)]
    pub values: BTreeMap<Field, Option<f64>>,
}

impl Packet {
    /// Create an empty packet
    pub fn new(date_time: Timestamp, us_units: UnitSystem) -> Self {
        Self {
            date_time,
            us_units,
            values: BTreeMap::new(),
        }
    }

    /// Add an observation (builder style)
    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.values.insert(field, Some(value));
        self
    }

    /// Add an explicit null observation
    pub fn with_null(mut self, field: Field) -> Self {
        self.values.insert(field, None);
        self
    }

    /// Non-null, non-reserved observations in this packet
    pub fn samples(&self) -> impl Iterator<Item = SensorSample> + '_ {
        self.values.iter().filter_map(move |(field, value)| {
            let value = (*value)?;
            if field.is_reserved() {
                return None;
            }
            Some(SensorSample {
                field: field.clone(),
                value,
                observed_at: self.date_time,
            })
        })
    }
}

/// State of one field inside a snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    /// Recent enough to be uploaded
    Fresh(f64),
    /// Older than the staleness threshold at snapshot time
    Stale,
}

impl FieldValue {
    /// The value if fresh
    pub fn fresh(&self) -> Option<f64> {
        match self {
            FieldValue::Fresh(v) => Some(*v),
            FieldValue::Stale => None,
        }
    }
}

/// Point-in-time view of everything the cache has heard
///
/// Value object: produced by [`ValueCache::snapshot`](crate::cache::ValueCache::snapshot)
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    timestamp: Timestamp,
    unit_system: Option<UnitSystem>,
    fields: BTreeMap<Field, FieldValue>,
}

impl Snapshot {
    /// Assemble a snapshot from its parts
    pub fn from_parts(
        timestamp: Timestamp,
        unit_system: Option<UnitSystem>,
        fields: BTreeMap<Field, FieldValue>,
    ) -> Self {
        Self {
            timestamp,
            unit_system,
            fields,
        }
    }

    /// Time the snapshot describes
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Unit system of the values; `None` only for a cache that never saw a packet
    pub fn unit_system(&self) -> Option<UnitSystem> {
        self.unit_system
    }

    /// Field state, `None` if the field was never reported
    pub fn get(&self, field: &Field) -> Option<FieldValue> {
        self.fields.get(field).copied()
    }

    /// Value of a fresh field
    pub fn value(&self, field: &Field) -> Option<f64> {
        self.get(field).and_then(|v| v.fresh())
    }

    /// Every field the cache has seen, fresh or stale
    pub fn iter(&self) -> impl Iterator<Item = (&Field, &FieldValue)> {
        self.fields.iter()
    }

    /// Number of fields, including stale ones
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if there is nothing here
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields that are fresh
    pub fn fresh_count(&self) -> usize {
        self.fields.values().filter(|v| v.fresh().is_some()).count()
    }

    pub(crate) fn with_unit_system(mut self, unit_system: UnitSystem) -> Self {
        self.unit_system = Some(unit_system);
        self
    }
}

/// Serialises to the flat packet shape, stale fields as `null`
impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        map.serialize_entry(DATE_TIME_KEY, &self.timestamp)?;
        map.serialize_entry(US_UNITS_KEY, &self.unit_system)?;
        for (field, value) in &self.fields {
            map.serialize_entry(field.name(), &value.fresh())?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_round_trips_known_names() {
        for field in Field::KNOWN.iter() {
            assert_eq!(&Field::parse(field.name()), field);
        }
        assert_eq!(Field::parse("extraTemp1"), Field::Other("extraTemp1".into()));
    }

    #[test]
    fn reserved_keys_are_detected() {
        assert!(Field::parse(DATE_TIME_KEY).is_reserved());
        assert!(Field::parse(US_UNITS_KEY).is_reserved());
        assert!(!Field::OutTemp.is_reserved());
    }

    #[test]
    fn packet_samples_skip_nulls() {
        let packet = Packet::new(1000, UnitSystem::Metric)
            .with(Field::OutTemp, 21.0)
            .with_null(Field::WindSpeed);

        let samples: Vec<_> = packet.samples().collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].field, Field::OutTemp);
        assert_eq!(samples[0].observed_at, 1000);
    }

    #[test]
    fn packet_requires_units() {
        let result = serde_json::from_str::<Packet>(r#"{"dateTime": 1000, "outTemp": 1.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_serializes_flat() {
        let snapshot = Snapshot::from_parts(
            1006,
            Some(UnitSystem::Metric),
            [
                (Field::OutTemp, FieldValue::Fresh(21.0)),
                (Field::WindSpeed, FieldValue::Stale),
            ]
            .into_iter()
            .collect(),
        );

        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({"dateTime": 1006, "usUnits": 16, "outTemp": 21.0, "windSpeed": null})
        );
    }

    #[test]
    fn three_field_states() {
        let snapshot = Snapshot::from_parts(
            0,
            Some(UnitSystem::Us),
            [
                (Field::OutTemp, FieldValue::Fresh(50.0)),
                (Field::WindSpeed, FieldValue::Stale),
            ]
            .into_iter()
            .collect(),
        );

        assert_eq!(snapshot.value(&Field::OutTemp), Some(50.0));
        assert_eq!(snapshot.get(&Field::WindSpeed), Some(FieldValue::Stale));
        assert_eq!(snapshot.get(&Field::Barometer), None);
        assert_eq!(snapshot.fresh_count(), 1);
    }
}
