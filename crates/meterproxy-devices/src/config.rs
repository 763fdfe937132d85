//! mbmd adapter configuration.
//!
//! | Option          | Default       | Effect                                   |
//! |-----------------|---------------|------------------------------------------|
//! | `host`          | `localhost`   | broker address                           |
//! | `port`          | `1883`        | broker port                              |
//! | `keepalive`     | `60`          | keepalive interval in seconds            |
//! | `topic`         | `mbmd`        | base topic of the mbmd daemon            |
//! | `sensorname`    | `sdm2201-1`   | sensor segment in the topic path         |
//! | `energy_offset` | `0.0`         | kWh added to the Export and Sum counters |

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterError, AdapterResult};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_KEEPALIVE: u64 = 60;
pub const DEFAULT_TOPIC: &str = "mbmd";
pub const DEFAULT_SENSOR_NAME: &str = "sdm2201-1";
/// MQTT encodes the keepalive as a 16-bit number of seconds.
pub const MAX_KEEPALIVE: u64 = u16::MAX as u64;

/// Configuration for the mbmd meter adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MbmdConfig {
    /// MQTT broker address
    #[serde(default = "default_host")]
    pub host: String,

    /// MQTT broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,

    /// Base topic the mbmd daemon publishes under
    #[serde(rename = "topic", default = "default_topic")]
    pub base_topic: String,

    /// Sensor name within mbmd (e.g. `sdm2201-1`: SDM220, bus id 1)
    #[serde(rename = "sensorname", default = "default_sensor_name")]
    pub sensor_name: String,

    /// Offset in kWh added to the cumulative energy counters
    #[serde(default)]
    pub energy_offset: f64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_keepalive() -> u64 {
    DEFAULT_KEEPALIVE
}
fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}
fn default_sensor_name() -> String {
    DEFAULT_SENSOR_NAME.to_string()
}

impl Default for MbmdConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            keepalive: DEFAULT_KEEPALIVE,
            base_topic: default_topic(),
            sensor_name: default_sensor_name(),
            energy_offset: 0.0,
        }
    }
}

impl MbmdConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Build a config from string options as handed over by a config loader
    /// (one INI-style section). Absent keys fall back to their defaults.
    pub fn from_options(options: &HashMap<String, String>) -> AdapterResult<Self> {
        let mut config = Self::default();

        if let Some(host) = options.get("host") {
            config.host = host.trim().to_string();
        }
        if let Some(port) = options.get("port") {
            config.port = parse_option("port", port)?;
        }
        if let Some(keepalive) = options.get("keepalive") {
            config.keepalive = parse_option("keepalive", keepalive)?;
        }
        if let Some(topic) = options.get("topic") {
            config.base_topic = topic.trim().to_string();
        }
        if let Some(sensor_name) = options.get("sensorname") {
            config.sensor_name = sensor_name.trim().to_string();
        }
        if let Some(offset) = options.get("energy_offset") {
            config.energy_offset = parse_option("energy_offset", offset)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the values that end up in topic strings and the broker address.
    pub fn validate(&self) -> AdapterResult<()> {
        if self.host.is_empty() {
            return Err(AdapterError::Configuration("host must not be empty".into()));
        }
        if self.keepalive > MAX_KEEPALIVE {
            return Err(AdapterError::Configuration(format!(
                "keepalive must be at most {} seconds, got {}",
                MAX_KEEPALIVE, self.keepalive
            )));
        }
        check_topic_segment("topic", &self.base_topic, true)?;
        check_topic_segment("sensorname", &self.sensor_name, false)?;
        if !self.energy_offset.is_finite() {
            return Err(AdapterError::Configuration(format!(
                "energy_offset must be a finite number, got {}",
                self.energy_offset
            )));
        }
        Ok(())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_keepalive(mut self, keepalive: u64) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.base_topic = topic.into();
        self
    }

    pub fn with_sensor_name(mut self, sensor_name: impl Into<String>) -> Self {
        self.sensor_name = sensor_name.into();
        self
    }

    pub fn with_energy_offset(mut self, energy_offset: f64) -> Self {
        self.energy_offset = energy_offset;
        self
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_option<T>(key: &str, raw: &str) -> AdapterResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        AdapterError::Configuration(format!("invalid value for {}: {:?} ({})", key, raw, e))
    })
}

/// The base topic may span several levels; the sensor name is a single level.
fn check_topic_segment(key: &str, value: &str, allow_levels: bool) -> AdapterResult<()> {
    if value.is_empty() {
        return Err(AdapterError::Configuration(format!("{} must not be empty", key)));
    }
    if value.contains(['+', '#']) {
        return Err(AdapterError::Configuration(format!(
            "{} must not contain MQTT wildcards: {}",
            key, value
        )));
    }
    if !allow_levels && value.contains('/') {
        return Err(AdapterError::Configuration(format!(
            "{} must be a single topic level: {}",
            key, value
        )));
    }
    if value.starts_with('/') || value.ends_with('/') {
        return Err(AdapterError::Configuration(format!(
            "{} must not start or end with '/': {}",
            key, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = MbmdConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.keepalive, 60);
        assert_eq!(config.base_topic, "mbmd");
        assert_eq!(config.sensor_name, "sdm2201-1");
        assert_eq!(config.energy_offset, 0.0);
        assert_eq!(config.broker_addr(), "localhost:1883");
    }

    #[test]
    fn test_from_empty_options() {
        let config = MbmdConfig::from_options(&HashMap::new()).unwrap();
        assert_eq!(config, MbmdConfig::default());
    }

    #[test]
    fn test_from_options() {
        let config = MbmdConfig::from_options(&options(&[
            ("host", "broker.lan"),
            ("port", "8883"),
            ("keepalive", "30"),
            ("topic", "meters/mbmd"),
            ("sensorname", "sdm1201-2"),
            ("energy_offset", " 2.5 "),
        ]))
        .unwrap();

        assert_eq!(config.host, "broker.lan");
        assert_eq!(config.port, 8883);
        assert_eq!(config.keepalive, 30);
        assert_eq!(config.base_topic, "meters/mbmd");
        assert_eq!(config.sensor_name, "sdm1201-2");
        assert_eq!(config.energy_offset, 2.5);
    }

    #[test]
    fn test_from_options_bad_port() {
        let err = MbmdConfig::from_options(&options(&[("port", "eighty")])).unwrap_err();
        assert!(matches!(err, AdapterError::Configuration(_)));
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_from_options_keepalive_too_large() {
        let err = MbmdConfig::from_options(&options(&[("keepalive", "70000")])).unwrap_err();
        assert!(err.to_string().contains("keepalive"));
    }

    #[test]
    fn test_from_options_bad_offset() {
        let err = MbmdConfig::from_options(&options(&[("energy_offset", "lots")])).unwrap_err();
        assert!(err.to_string().contains("energy_offset"));
    }

    #[test]
    fn test_validate_rejects_wildcards() {
        assert!(MbmdConfig::default().with_topic("mbmd/#").validate().is_err());
        assert!(MbmdConfig::default().with_sensor_name("+").validate().is_err());
        assert!(MbmdConfig::default().with_sensor_name("a/b").validate().is_err());
        assert!(MbmdConfig::default().with_topic("").validate().is_err());
        assert!(MbmdConfig::default().with_topic("mbmd/").validate().is_err());
        assert!(MbmdConfig::new("").validate().is_err());
        assert!(MbmdConfig::default().with_keepalive(70_000).validate().is_err());
        assert!(MbmdConfig::default().with_keepalive(65_535).validate().is_ok());
        assert!(MbmdConfig::default()
            .with_energy_offset(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_accepts_nested_base_topic() {
        assert!(MbmdConfig::default().with_topic("site/a/mbmd").validate().is_ok());
    }
}
