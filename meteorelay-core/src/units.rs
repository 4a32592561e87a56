//! Unit Systems and Conversion to the Wire Convention
//!
//! ## Overview
//!
//! Stations report in one of three unit conventions. The collector always
//! wants METRICWX (°C, m/s, mbar, mm), so every snapshot passes through a
//! [`UnitConverter`] right before it is rendered.
//!
//! | group       | US   | METRIC | METRICWX |
//! |-------------|------|--------|----------|
//! | temperature | °F   | °C     | °C       |
//! | speed       | mph  | km/h   | m/s      |
//! | pressure    | inHg | mbar   | mbar     |
//! | rain        | in   | cm     | mm       |
//!
//! Conversion goes through METRICWX as the pivot, so any system converts to
//! any other and back without a dedicated table per pair.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{CoreError, CoreResult};
use crate::observation::{FieldValue, Snapshot};

/// Unit convention tag carried by every packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum UnitSystem {
    /// °F, mph, inHg, in
    Us = 0x01,
    /// °C, km/h, mbar, cm
    Metric = 0x10,
    /// °C, m/s, mbar, mm
    MetricWx = 0x11,
}

impl UnitSystem {
    /// Numeric code used on the wire by station software
    pub const fn code(&self) -> u8 {
        *self as u8
    }

    /// Look up a unit system by its numeric code
    pub fn from_code(code: u8) -> CoreResult<Self> {
        match code {
            0x01 => Ok(Self::Us),
            0x10 => Ok(Self::Metric),
            0x11 => Ok(Self::MetricWx),
            other => Err(CoreError::UnknownUnitSystem(other)),
        }
    }

    /// Canonical upper-case name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Metric => "METRIC",
            Self::MetricWx => "METRICWX",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "US" => Some(Self::Us),
            "METRIC" => Some(Self::Metric),
            "METRICWX" => Some(Self::MetricWx),
            _ => None,
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for UnitSystem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for UnitSystem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Code(code) => Self::from_code(code).map_err(serde::de::Error::custom),
            Repr::Name(name) => Self::from_name(&name).ok_or_else(|| {
                serde::de::Error::custom(format!("unknown unit system '{}'", name))
            }),
        }
    }
}

/// Physical quantity a field measures, which decides how it converts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitGroup {
    /// °F or °C
    Temperature,
    /// mph, km/h or m/s
    Speed,
    /// inHg or mbar
    Pressure,
    /// in, cm or mm
    Rain,
    /// Percentages, directions, indices: identical in every system
    Dimensionless,
}

const MPH_TO_MS: f64 = 0.44704;
const KMH_TO_MS: f64 = 1.0 / 3.6;
const INHG_TO_MBAR: f64 = 33.863_886_666_7;
const INCH_TO_MM: f64 = 25.4;
const CM_TO_MM: f64 = 10.0;

impl UnitGroup {
    /// Convert a value in `system` to the METRICWX pivot
    pub fn to_metricwx(&self, value: f64, system: UnitSystem) -> f64 {
        match (self, system) {
            (_, UnitSystem::MetricWx) | (Self::Dimensionless, _) => value,
            (Self::Temperature, UnitSystem::Us) => (value - 32.0) * 5.0 / 9.0,
            (Self::Temperature, UnitSystem::Metric) => value,
            (Self::Speed, UnitSystem::Us) => value * MPH_TO_MS,
            (Self::Speed, UnitSystem::Metric) => value * KMH_TO_MS,
            (Self::Pressure, UnitSystem::Us) => value * INHG_TO_MBAR,
            (Self::Pressure, UnitSystem::Metric) => value,
            (Self::Rain, UnitSystem::Us) => value * INCH_TO_MM,
            (Self::Rain, UnitSystem::Metric) => value * CM_TO_MM,
        }
    }

    /// Convert a METRICWX value to `system`
    pub fn from_metricwx(&self, value: f64, system: UnitSystem) -> f64 {
        match (self, system) {
            (_, UnitSystem::MetricWx) | (Self::Dimensionless, _) => value,
            (Self::Temperature, UnitSystem::Us) => value * 9.0 / 5.0 + 32.0,
            (Self::Temperature, UnitSystem::Metric) => value,
            (Self::Speed, UnitSystem::Us) => value / MPH_TO_MS,
            (Self::Speed, UnitSystem::Metric) => value / KMH_TO_MS,
            (Self::Pressure, UnitSystem::Us) => value / INHG_TO_MBAR,
            (Self::Pressure, UnitSystem::Metric) => value,
            (Self::Rain, UnitSystem::Us) => value / INCH_TO_MM,
            (Self::Rain, UnitSystem::Metric) => value / CM_TO_MM,
        }
    }

    /// Convert between any two systems
    pub fn convert(&self, value: f64, from: UnitSystem, to: UnitSystem) -> f64 {
        if from == to {
            return value;
        }
        self.from_metricwx(self.to_metricwx(value, from), to)
    }
}

/// Converts a snapshot into another unit system
///
/// The upload worker only depends on this trait; the table-driven
/// [`StandardConverter`] is what the relay ships with.
pub trait UnitConverter: Send {
    /// Produce a copy of `snapshot` expressed in `target`
    ///
    /// Stale fields stay stale. Fails with [`CoreError::MissingUnitSystem`]
    /// when the snapshot has fields but was never bound to a unit system.
    fn convert(&self, snapshot: &Snapshot, target: UnitSystem) -> CoreResult<Snapshot>;
}

/// Per-field conversion driven by [`Field::group`](crate::observation::Field::group)
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardConverter;

impl UnitConverter for StandardConverter {
    fn convert(&self, snapshot: &Snapshot, target: UnitSystem) -> CoreResult<Snapshot> {
        let from = match snapshot.unit_system() {
            Some(system) => system,
            None if snapshot.is_empty() => {
                return Ok(snapshot.clone().with_unit_system(target));
            }
            None => return Err(CoreError::MissingUnitSystem),
        };

        let fields = snapshot
            .iter()
            .map(|(field, value)| {
                let converted = match value {
                    FieldValue::Fresh(v) => FieldValue::Fresh(field.group().convert(*v, from, target)),
                    FieldValue::Stale => FieldValue::Stale,
                };
                (field.clone(), converted)
            })
            .collect();

        Ok(Snapshot::from_parts(snapshot.timestamp(), Some(target), fields))
    }
}
