//! Relay configuration
//!
//! Options are read from a JSON document laid out like the station
//! software's own configuration: a service section under `StdRESTful`,
//! with `log_success`/`log_failure` optionally inherited from the root.
//!
//! ```json
//! {
//!   "log_failure": true,
//!   "StdRESTful": {
//!     "MeteoCam": {
//!       "enable": "true",
//!       "station_key": "abc123",
//!       "station_id": "42",
//!       "post_interval": 10
//!     }
//!   }
//! }
//! ```
//!
//! Values may be given as JSON scalars or as strings (`"true"`, `"5"`),
//! which is how hand-edited station configs usually carry them.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use meteorelay_core::DEFAULT_CACHE_STALE;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default service section name
pub const DEFAULT_SERVICE: &str = "MeteoCam";

/// Collector endpoint; `<key>` and `<id>` are substituted
pub const DEFAULT_SERVER_URL: &str = "https://pws.meteo.cam/v1/observe/<key>/<id>";

/// Value shipped in sample configs for options the user must fill in
pub const PLACEHOLDER: &str = "replace_me";

/// Configuration errors, detected once at start-up
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Data will not be posted: Missing option {0}")]
    MissingOption(&'static str),

    #[error("Posting not enabled")]
    Disabled,

    #[error("Invalid option {option}: {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },

    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Options of the relay service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    #[serde(deserialize_with = "flexible")]
    pub enable: bool,
    pub station_key: String,
    pub station_id: String,
    pub server_url: String,
    /// Minimum seconds between uploads
    #[serde(deserialize_with = "flexible")]
    pub post_interval: f64,
    /// Queue depth bound, 0 for unbounded
    #[serde(deserialize_with = "flexible")]
    pub max_backlog: usize,
    /// Attempts per snapshot before it is dropped
    #[serde(deserialize_with = "flexible")]
    pub max_tries: u32,
    /// Seconds between attempts
    #[serde(deserialize_with = "flexible")]
    pub retry_wait: f64,
    /// Per-request timeout in seconds
    #[serde(deserialize_with = "flexible")]
    pub timeout: f64,
    /// Snapshots older than this many seconds at send time are not sent
    #[serde(deserialize_with = "flexible_opt")]
    pub stale: Option<u64>,
    /// Age in seconds after which a cached field is left out of snapshots
    #[serde(deserialize_with = "flexible")]
    pub cache_stale: u64,
    #[serde(deserialize_with = "flexible")]
    pub skip_upload: bool,
    #[serde(deserialize_with = "flexible")]
    pub log_success: bool,
    #[serde(deserialize_with = "flexible")]
    pub log_failure: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enable: true,
            station_key: PLACEHOLDER.to_string(),
            station_id: PLACEHOLDER.to_string(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            post_interval: 5.0,
            max_backlog: 0,
            max_tries: 1,
            retry_wait: 5.0,
            timeout: 60.0,
            stale: None,
            cache_stale: DEFAULT_CACHE_STALE,
            skip_upload: false,
            log_success: false,
            log_failure: false,
        }
    }
}

impl RelayConfig {
    /// Create configuration for a station
    pub fn new(station_key: impl Into<String>, station_id: impl Into<String>) -> Self {
        Self {
            station_key: station_key.into(),
            station_id: station_id.into(),
            ..Self::default()
        }
    }

    /// Override the endpoint template
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Set minimum seconds between uploads
    pub fn post_interval_secs(mut self, secs: f64) -> Self {
        self.post_interval = secs;
        self
    }

    /// Set queue depth bound
    pub fn max_backlog(mut self, max_backlog: usize) -> Self {
        self.max_backlog = max_backlog;
        self
    }

    /// Set attempts per snapshot
    pub fn max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Set seconds between attempts
    pub fn retry_wait_secs(mut self, secs: f64) -> Self {
        self.retry_wait = secs;
        self
    }

    /// Set request timeout in seconds
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout = secs;
        self
    }

    /// Set maximum snapshot age at send time
    pub fn stale_secs(mut self, secs: Option<u64>) -> Self {
        self.stale = secs;
        self
    }

    /// Format but never send
    pub fn skip_upload(mut self, skip: bool) -> Self {
        self.skip_upload = skip;
        self
    }

    /// Enable per-outcome logging
    pub fn log_outcomes(mut self, success: bool, failure: bool) -> Self {
        self.log_success = success;
        self.log_failure = failure;
        self
    }

    /// Read the service section from a JSON file
    pub fn load(path: impl AsRef<Path>, service: &str) -> Result<Option<Self>, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let root: Value = serde_json::from_str(&text)?;
        Self::from_root(&root, service)
    }

    /// Extract and validate a service section from a parsed config
    ///
    /// Returns `Ok(None)` when the section is absent or the service is
    /// disabled.
    pub fn from_root(root: &Value, service: &str) -> Result<Option<Self>, ConfigError> {
        let section = root
            .get("StdRESTful")
            .and_then(|restful| restful.get(service))
            .or_else(|| root.get(service));

        let mut site = match section {
            Some(Value::Object(site)) => site.clone(),
            _ => {
                log::info!("{}: No config info. Skipped.", service);
                return Ok(None);
            }
        };

        // Logging preferences fall back to the root level
        for key in ["log_success", "log_failure"] {
            if let Some(value) = root.get(key) {
                site.entry(key).or_insert_with(|| value.clone());
            }
        }

        let config: Self = serde_json::from_value(Value::Object(site))?;
        if !config.enable {
            log::info!("{}: Posting not enabled.", service);
            return Ok(None);
        }
        config.validate().map(Some)
    }

    /// Check required options and value ranges
    pub fn validate(self) -> Result<Self, ConfigError> {
        if !self.enable {
            return Err(ConfigError::Disabled);
        }

        for (option, value) in [("station_key", &self.station_key), ("station_id", &self.station_id)] {
            if value.trim().is_empty() || value == PLACEHOLDER {
                return Err(ConfigError::MissingOption(option));
            }
            // Substituted verbatim into the URL path
            if let Some(c) = value.chars().find(|c| !is_path_safe(*c)) {
                return Err(ConfigError::Invalid {
                    option,
                    reason: format!("character {:?} is not allowed in a URL path segment", c),
                });
            }
        }

        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                option: "server_url",
                reason: "must start with http:// or https://".into(),
            });
        }

        for (option, secs) in [
            ("post_interval", self.post_interval),
            ("retry_wait", self.retry_wait),
            ("timeout", self.timeout),
        ] {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::Invalid {
                    option,
                    reason: format!("{} is not a representable non-negative number of seconds", secs),
                });
            }
        }

        Ok(self)
    }

    /// Endpoint with station key and id filled in
    pub fn endpoint(&self) -> String {
        self.server_url
            .replace("<key>", &self.station_key)
            .replace("<id>", &self.station_id)
    }

    pub fn post_interval(&self) -> Duration {
        secs(self.post_interval)
    }

    pub fn retry_wait(&self) -> Duration {
        secs(self.retry_wait)
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.timeout)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

fn is_path_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// Scalar given either natively or as a string
#[derive(Deserialize)]
#[serde(untagged)]
enum Flexible<T> {
    Native(T),
    Text(String),
}

trait FromConfigText: Sized {
    fn from_config_text(text: &str) -> Option<Self>;
}

impl FromConfigText for bool {
    fn from_config_text(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

macro_rules! from_config_text_via_parse {
    ($($t:ty),*) => {
        $(impl FromConfigText for $t {
            fn from_config_text(text: &str) -> Option<Self> {
                <$t as FromStr>::from_str(text.trim()).ok()
            }
        })*
    };
}

from_config_text_via_parse!(f64, u32, u64, usize);

fn flexible<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromConfigText,
{
    match Flexible::<T>::deserialize(deserializer)? {
        Flexible::Native(value) => Ok(value),
        Flexible::Text(text) => T::from_config_text(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid value '{}'", text))),
    }
}

fn flexible_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromConfigText,
{
    match Option::<Flexible<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Flexible::Native(value)) => Ok(Some(value)),
        Some(Flexible::Text(text)) if text.trim().eq_ignore_ascii_case("none") => Ok(None),
        Some(Flexible::Text(text)) => T::from_config_text(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid value '{}'", text))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root(site: Value) -> Value {
        json!({ "StdRESTful": { "MeteoCam": site } })
    }

    #[test]
    fn defaults_applied() {
        let config = RelayConfig::from_root(
            &root(json!({"station_key": "k", "station_id": "i"})),
            DEFAULT_SERVICE,
        )
        .unwrap()
        .unwrap();

        assert_eq!(config.post_interval(), Duration::from_secs(5));
        assert_eq!(config.max_backlog, 0);
        assert_eq!(config.max_tries, 1);
        assert_eq!(config.retry_wait(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.stale, None);
        assert_eq!(config.cache_stale, 960);
        assert!(!config.skip_upload);
        assert!(!config.log_success);
        assert_eq!(config.endpoint(), "https://pws.meteo.cam/v1/observe/k/i");
    }

    #[test]
    fn string_values_are_accepted() {
        let config = RelayConfig::from_root(
            &root(json!({
                "enable": "yes",
                "station_key": "k",
                "station_id": "i",
                "post_interval": "2.5",
                "max_tries": "3",
                "stale": "600",
                "skip_upload": "true",
            })),
            DEFAULT_SERVICE,
        )
        .unwrap()
        .unwrap();

        assert_eq!(config.post_interval, 2.5);
        assert_eq!(config.max_tries, 3);
        assert_eq!(config.stale, Some(600));
        assert!(config.skip_upload);
    }

    #[test]
    fn disabled_service_yields_none() {
        let result = RelayConfig::from_root(
            &root(json!({"enable": false, "station_key": "k", "station_id": "i"})),
            DEFAULT_SERVICE,
        );
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn missing_section_yields_none() {
        assert!(RelayConfig::from_root(&json!({}), DEFAULT_SERVICE).unwrap().is_none());
    }

    #[test]
    fn placeholder_credentials_rejected() {
        let result = RelayConfig::from_root(
            &root(json!({"station_key": "replace_me", "station_id": "i"})),
            DEFAULT_SERVICE,
        );
        assert!(matches!(result, Err(ConfigError::MissingOption("station_key"))));

        let result = RelayConfig::from_root(&root(json!({"station_key": "k"})), DEFAULT_SERVICE);
        assert!(matches!(result, Err(ConfigError::MissingOption("station_id"))));
    }

    #[test]
    fn root_logging_preferences_inherited() {
        let config = RelayConfig::from_root(
            &json!({
                "log_success": "true",
                "log_failure": true,
                "StdRESTful": {"MeteoCam": {"station_key": "k", "station_id": "i", "log_failure": false}},
            }),
            DEFAULT_SERVICE,
        )
        .unwrap()
        .unwrap();

        assert!(config.log_success);
        assert!(!config.log_failure);
    }

    #[test]
    fn bad_url_rejected() {
        let result = RelayConfig::new("k", "i").server_url("ftp://example.com").validate();
        assert!(matches!(result, Err(ConfigError::Invalid { option: "server_url", .. })));
    }

    #[test]
    fn negative_interval_rejected() {
        let result = RelayConfig::new("k", "i").post_interval_secs(-1.0).validate();
        assert!(matches!(result, Err(ConfigError::Invalid { option: "post_interval", .. })));
    }

    #[test]
    fn disabled_config_fails_validation() {
        let mut config = RelayConfig::new("k", "i");
        config.enable = false;
        assert!(matches!(config.validate(), Err(ConfigError::Disabled)));
    }

    #[test]
    fn unrepresentable_durations_rejected() {
        let result = RelayConfig::new("k", "i").post_interval_secs(1e20).validate();
        assert!(matches!(result, Err(ConfigError::Invalid { option: "post_interval", .. })));

        let result = RelayConfig::new("k", "i").retry_wait_secs(f64::INFINITY).validate();
        assert!(matches!(result, Err(ConfigError::Invalid { option: "retry_wait", .. })));

        let result = RelayConfig::new("k", "i").timeout_secs(1e20).validate();
        assert!(matches!(result, Err(ConfigError::Invalid { option: "timeout", .. })));
    }

    #[test]
    fn oversized_duration_saturates_instead_of_panicking() {
        let config = RelayConfig::new("k", "i").retry_wait_secs(1e20);
        assert_eq!(config.retry_wait(), Duration::MAX);
    }

    #[test]
    fn credentials_must_be_path_safe() {
        for key in ["a/b", "a?b", "a b", "a#b"] {
            let result = RelayConfig::new(key, "i").validate();
            assert!(
                matches!(result, Err(ConfigError::Invalid { option: "station_key", .. })),
                "{:?} accepted",
                key
            );
        }

        let result = RelayConfig::new("k", "../x").validate();
        assert!(matches!(result, Err(ConfigError::Invalid { option: "station_id", .. })));

        let config = RelayConfig::new("Ab-1_2.3~", "42").validate().unwrap();
        assert_eq!(config.endpoint(), "https://pws.meteo.cam/v1/observe/Ab-1_2.3~/42");
    }

    #[test]
    fn garbage_value_is_parse_error() {
        let result = RelayConfig::from_root(
            &root(json!({"station_key": "k", "station_id": "i", "max_tries": "many"})),
            DEFAULT_SERVICE,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
