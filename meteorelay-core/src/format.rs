//! Wire formatting for the collector's query string
//!
//! A static table maps each known field to the collector's parameter name
//! and the number of decimals it expects. Values must already be in METRICWX.

use crate::observation::{Field, Snapshot};

/// Marker the collector expects first; it stamps the observation on arrival
pub const DATE_MARKER: &str = "dateutc=now";

/// Wire parameter for one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireToken {
    /// Query parameter name
    pub key: &'static str,
    /// Digits after the decimal point
    pub decimals: usize,
}

impl WireToken {
    const fn new(key: &'static str, decimals: usize) -> Self {
        Self { key, decimals }
    }

    /// `key=value` with the configured precision
    pub fn render(&self, value: f64) -> String {
        format!("{}={:.*}", self.key, self.decimals, value)
    }
}

/// Maps internal fields to wire tokens
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFormatter;

impl RequestFormatter {
    /// Token for a field, `None` for fields the collector does not accept
    pub fn token(&self, field: &Field) -> Option<WireToken> {
        let token = match field {
            Field::Barometer => WireToken::new("baromhpa", 3),
            Field::OutTemp => WireToken::new("tempc", 1),
            Field::OutHumidity => WireToken::new("humidity", 0),
            Field::WindSpeed => WireToken::new("windspeedms", 1),
            Field::WindDir => WireToken::new("winddir", 0),
            Field::WindGust => WireToken::new("windgustms", 1),
            Field::Dewpoint => WireToken::new("dewptc", 1),
            Field::HourRain => WireToken::new("rainmm", 2),
            Field::DayRain => WireToken::new("dailyrainmm", 2),
            Field::Radiation => WireToken::new("solarradiation", 2),
            Field::Uv => WireToken::new("UV", 2),
            Field::SoilTemp1 => WireToken::new("soiltempc", 1),
            Field::SoilMoist1 => WireToken::new("soilmoisture", 0),
            Field::LeafWet1 => WireToken::new("leafwetness", 0),
            Field::Other(_) => return None,
        };
        Some(token)
    }

    /// Query string for a snapshot: the date marker, then every fresh known
    /// field in table order, joined by `&`
    pub fn render(&self, snapshot: &Snapshot) -> String {
        let mut parts = vec![DATE_MARKER.to_string()];
        for field in Field::KNOWN.iter() {
            if let (Some(token), Some(value)) = (self.token(field), snapshot.value(field)) {
                if value.is_finite() {
                    parts.push(token.render(value));
                }
            }
        }
        parts.join("&")
    }
}
