use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::telemetry::reading::{BATTERY_PLACES, WEIGHT_PLACES};
use crate::telemetry::DecimalText;
use crate::util::read_file_to_string;

// keeps step counts exactly representable as f64
const MAX_STEP: f64 = 1e15;

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub client_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            keep_alive_secs: 60,
            reconnect_delay_ms: 1000,
            connect_timeout_secs: 10,
            client_prefix: "fitness_client".to_string(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Topics {
    pub data: String,
    pub command: String,
}

impl Default for Topics {
    fn default() -> Self {
        Topics {
            data: "iot/fitness/data".to_string(),
            command: "iot/device/command".to_string(),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// The bounds as whole steps of `10^-places`: the lowest and highest
    /// values with that many decimals that still lie inside `[min, max]`.
    /// `None` when no such value exists or the range is too wide to draw from.
    pub fn steps(&self, places: usize) -> Option<(i64, i64)> {
        let scale = 10f64.powi(places as i32);
        let (lo, hi) = ((self.min * scale).ceil(), (self.max * scale).floor());
        if !(lo.abs() <= MAX_STEP && hi.abs() <= MAX_STEP) {
            return None;
        }

        // float products can land one step off in either direction
        let (mut lo, mut hi) = (lo as i64 - 1, hi as i64 + 1);
        while lo <= hi && !self.contains(DecimalText::from_steps(lo, places).value()) {
            lo += 1;
        }
        while hi >= lo && !self.contains(DecimalText::from_steps(hi, places).value()) {
            hi -= 1;
        }
        (lo <= hi).then_some((lo, hi))
    }

    fn check(&self, name: &str, places: usize) -> Result<(), ConfigError> {
        if !self.min.is_finite()
            || !self.max.is_finite()
            || self.min > self.max
            || !(self.max - self.min).is_finite()
        {
            return Err(ConfigError::Invalid(format!(
                "{} bounds must be finite with min <= max, got [{}, {}]",
                name, self.min, self.max
            )));
        }
        if self.steps(places).is_none() {
            return Err(ConfigError::Invalid(format!(
                "{} bounds [{}, {}] hold no value with {} decimals",
                name, self.min, self.max, places
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct CountBounds {
    pub min: u32,
    pub max: u32,
}

/// Which control messages a generator reacts to.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommandPolicy {
    /// Untargeted commands plus commands targeted at this generator.
    #[default]
    Broadcast,
    /// Only commands targeted at this generator.
    Addressed,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct GeneratorConfig {
    pub interval_ms: u64,
    pub autostart: bool,
    pub uid: Option<String>,
    pub locations: Vec<String>,
    pub battery_voltage: Bounds,
    pub weight: Bounds,
    pub rep_count: CountBounds,
    pub log_path: Option<PathBuf>,
    pub command_policy: CommandPolicy,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            interval_ms: 5000,
            autostart: true,
            uid: None,
            locations: ["Adyar", "T Nagar", "Besant Nagar", "Velachery", "Mylapore"]
                .iter()
                .map(|l| l.to_string())
                .collect(),
            battery_voltage: Bounds { min: 3.5, max: 4.2 },
            weight: Bounds { min: 60.0, max: 80.0 },
            rep_count: CountBounds { min: 10, max: 59 },
            log_path: Some(PathBuf::from("fitnessData.csv")),
            command_policy: CommandPolicy::Broadcast,
        }
    }
}

/// The 40Hz proximity simulator. Uses its own topics since its payload differs.
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct SimulatorConfig {
    pub interval_ms: u64,
    pub autostart: bool,
    pub uid: Option<String>,
    pub topics: Topics,
    pub base_value: f64,
    pub noise_range: f64,
    pub drift_step: f64,
    pub drift_limit: f64,
    pub log_path: Option<PathBuf>,
    pub command_policy: CommandPolicy,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            interval_ms: 25,
            autostart: false,
            uid: None,
            topics: Topics {
                data: "iot/fitness/data".to_string(),
                command: "iot/fitness/command".to_string(),
            },
            base_value: 2000.0,
            noise_range: 100.0,
            drift_step: 10.0,
            drift_limit: 500.0,
            log_path: None,
            command_policy: CommandPolicy::Broadcast,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    Memory,
    Redis {
        #[serde(default = "default_redis_url")]
        url: String,
        #[serde(default = "default_redis_key")]
        key: String,
    },
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_redis_key() -> String {
    "fitness:readings".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Redis {
            url: default_redis_url(),
            key: default_redis_key(),
        }
    }
}

/// What the relay does when an insert fails.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PersistPolicy {
    #[default]
    Drop,
    Retry { attempts: u32, delay_ms: u64 },
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct RelayConfig {
    pub http_port: u16,
    pub store: StoreConfig,
    pub persist_policy: PersistPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            http_port: 3000,
            store: StoreConfig::default(),
            persist_policy: PersistPolicy::Drop,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub topics: Topics,
    pub generator: GeneratorConfig,
    pub simulator: SimulatorConfig,
    pub relay: RelayConfig,
}

impl Config {
    pub fn parse(config_str: &str) -> Result<Config, ConfigError> {
        if config_str.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(config_str)?)
    }

    /// Reads the file (if any), applies environment overrides and validates.
    pub async fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        Config::load_with(path, |key| std::env::var(key).ok()).await
    }

    pub async fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Config::parse(&read_file_to_string(path).await?)?
            }
            None => {
                info!("No config file given, using defaults");
                Config::default()
            }
        };

        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RELAY_MQTT_HOST") {
            info!("RELAY_MQTT_HOST set, using {host}");
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("RELAY_MQTT_PORT") {
            self.mqtt.port = parse_env("RELAY_MQTT_PORT", &port)?;
        }
        if let Some(port) = lookup("RELAY_HTTP_PORT") {
            self.relay.http_port = parse_env("RELAY_HTTP_PORT", &port)?;
        }
        if let Some(url) = lookup("RELAY_REDIS_URL") {
            let key = match &self.relay.store {
                StoreConfig::Redis { key, .. } => key.clone(),
                StoreConfig::Memory => default_redis_key(),
            };
            self.relay.store = StoreConfig::Redis { url, key };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let generator = &self.generator;
        generator
            .battery_voltage
            .check("generator.battery_voltage", BATTERY_PLACES)?;
        generator.weight.check("generator.weight", WEIGHT_PLACES)?;
        if generator.rep_count.min > generator.rep_count.max {
            return Err(ConfigError::Invalid(
                "generator.rep_count min must not exceed max".to_string(),
            ));
        }
        if generator.locations.is_empty() {
            return Err(ConfigError::Invalid(
                "generator.locations must not be empty".to_string(),
            ));
        }
        if generator.interval_ms == 0 || self.simulator.interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be non-zero".to_string()));
        }
        if !(self.simulator.noise_range >= 0.0 && self.simulator.drift_limit >= 0.0) {
            return Err(ConfigError::Invalid(
                "simulator noise_range and drift_limit must be non-negative".to_string(),
            ));
        }
        for (name, topic) in [
            ("topics.data", &self.topics.data),
            ("topics.command", &self.topics.command),
            ("simulator.topics.data", &self.simulator.topics.data),
            ("simulator.topics.command", &self.simulator.topics.command),
        ] {
            if !rumqttc::valid_filter(topic) {
                return Err(ConfigError::Invalid(format!(
                    "{} is not a valid topic: {:?}",
                    name, topic
                )));
            }
        }
        if let PersistPolicy::Retry { attempts: 0, .. } = self.relay.persist_policy {
            return Err(ConfigError::Invalid(
                "relay.persist_policy retry needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let config_str = r#"
mqtt:
  host: "localhost"
  port: 1884
topics:
  data: "gym/data"
  command: "gym/command"
generator:
  interval_ms: 1000
  uid: "beef"
  locations: ["Adyar"]
  weight:
    min: 20
    max: 40
  command_policy: "addressed"
relay:
  http_port: 8080
  store:
    kind: "memory"
  persist_policy:
    mode: "retry"
    attempts: 3
    delay_ms: 50
        "#;
        let config = Config::parse(config_str).unwrap();

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.topics.command, "gym/command");
        assert_eq!(config.generator.interval_ms, 1000);
        assert_eq!(config.generator.uid.as_deref(), Some("beef"));
        assert_eq!(config.generator.weight, Bounds { min: 20.0, max: 40.0 });
        assert_eq!(config.generator.battery_voltage, Bounds { min: 3.5, max: 4.2 });
        assert_eq!(config.generator.command_policy, CommandPolicy::Addressed);
        assert_eq!(config.relay.http_port, 8080);
        assert_eq!(config.relay.store, StoreConfig::Memory);
        assert_eq!(
            config.relay.persist_policy,
            PersistPolicy::Retry {
                attempts: 3,
                delay_ms: 50
            }
        );
        config.validate().unwrap();
    }

    #[test]
    fn empty_document_is_default() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.mqtt.host, "broker.hivemq.com");
        assert_eq!(config.topics, Topics::default());
        assert_eq!(config.generator.locations.len(), 5);
        assert_eq!(config.simulator.interval_ms, 25);
        assert_eq!(config.simulator.topics.command, "iot/fitness/command");
        assert!(!config.simulator.autostart);
        assert_eq!(config.relay.persist_policy, PersistPolicy::Drop);
        config.validate().unwrap();
    }

    #[test]
    fn redis_store_defaults() {
        let config = Config::parse("relay:\n  store:\n    kind: redis\n").unwrap();
        assert_eq!(config.relay.store, StoreConfig::default());
    }

    #[test]
    fn rejects_inverted_bounds() {
        let config = Config::parse("generator:\n  weight:\n    min: 80\n    max: 60\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_empty_locations() {
        let config = Config::parse("generator:\n  locations: []\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_retry_attempts() {
        let config = Config::parse(
            "relay:\n  persist_policy:\n    mode: retry\n    attempts: 0\n    delay_ms: 10\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides() {
        let mut config = Config::default();
        config.relay.store = StoreConfig::Memory;

        config
            .apply_overrides(|key| match key {
                "RELAY_MQTT_HOST" => Some("mosquitto".to_string()),
                "RELAY_MQTT_PORT" => Some("1885".to_string()),
                "RELAY_REDIS_URL" => Some("redis://cache:6379".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.mqtt.host, "mosquitto");
        assert_eq!(config.mqtt.port, 1885);
        assert_eq!(config.relay.http_port, 3000);
        assert_eq!(
            config.relay.store,
            StoreConfig::Redis {
                url: "redis://cache:6379".to_string(),
                key: "fitness:readings".to_string()
            }
        );
    }

    #[test]
    fn bad_env_value() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| {
            (key == "RELAY_HTTP_PORT").then(|| "eighty".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Env { .. })));
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        std::fs::write(&path, "generator:\n  interval_ms: 250\n").unwrap();

        let config = Config::load_with(Some(&path), |_| None).await.unwrap();
        assert_eq!(config.generator.interval_ms, 250);
        assert_eq!(config.mqtt.host, "broker.hivemq.com");
    }

    #[tokio::test]
    async fn load_applies_lookup_then_validates() {
        let config = Config::load_with(None, |key| {
            (key == "RELAY_HTTP_PORT").then(|| "8081".to_string())
        })
        .await
        .unwrap();
        assert_eq!(config.relay.http_port, 8081);

        let missing = Path::new("/nonexistent/relay.yaml");
        assert!(matches!(
            Config::load_with(Some(missing), |_| None).await,
            Err(ConfigError::Read(_))
        ));
    }

    #[test]
    fn bounds_snap_to_output_precision() {
        let weight = Bounds { min: 60.04, max: 60.16 };
        assert_eq!(weight.steps(1), Some((601, 601)));

        let battery = Bounds { min: 3.501, max: 3.504 };
        assert_eq!(battery.steps(2), None);

        let defaults = GeneratorConfig::default();
        assert_eq!(defaults.weight.steps(1), Some((600, 800)));
        assert_eq!(defaults.battery_voltage.steps(2), Some((350, 420)));
    }

    #[test]
    fn rejects_bounds_without_representable_values() {
        let config = Config::parse(
            "generator:\n  battery_voltage:\n    min: 3.501\n    max: 3.504\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config::parse("generator:\n  weight:\n    min: 60.04\n    max: 60.06\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_overflowing_range() {
        let config = Config::parse("generator:\n  weight:\n    min: -1.0e308\n    max: 1.0e308\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn wildcard_topics_are_valid_filters() {
        let config = Config::parse("topics:\n  data: \"iot/+/data\"\n").unwrap();
        config.validate().unwrap();

        let config = Config::parse("topics:\n  data: \"iot/#/data\"\n").unwrap();
        assert!(config.validate().is_err());
    }
}
