//! # Configuration File
//!
//! Loads the daemon configuration from a TOML file with three sections:
//!
//! ```toml
//! [General]
//! switch_name = "Pi USB Power"
//! hub_location = "1-1"
//!
//! [MQTTBrokerConfig]
//! mqtt_host = "broker.local"
//! mqtt_port = 1883
//! mqtt_client_id = ""
//! mqtt_use_authentication = false
//! mqtt_username = ""
//! mqtt_password = ""
//! mqtt_use_ssl = false
//! mqtt_port_ssl = 8883
//!
//! [MQTTTopicConfig]
//! mqtt_topic_set_switch_state = "home/usb_power/set"
//! mqtt_topic_report_switch_state = "home/usb_power/state"
//! ```
//!
//! Values are accepted the way hand-edited files tend to write them: flags
//! may be booleans, `0`/`1` or `true`/`high`/`false`/`low` strings, ports may
//! be quoted, and an empty string means "not set". Keys may be given with or
//! without the `mqtt_` prefix.
//!
//! Everything is validated up front so a broken file stops the daemon before
//! any hardware or network access happens.

use rand::Rng;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CLIENT_ID_PREFIX: &str = "usb_power_controller_";
const HEX_DIGITS: &[u8] = b"0123456789abcdef";
const DEFAULT_KEEPALIVE_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to access config file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Error parsing the config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config value cannot be empty for {0}")]
    Missing(&'static str),

    #[error("Config value {value:?} is invalid for {field}")]
    InvalidValue { field: &'static str, value: String },
}

/// Validated daemon configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub general: GeneralConfig,
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneralConfig {
    /// Device name, also names the log directory
    pub switch_name: String,
    /// uhubctl style location of the hub to control, first hub if unset
    pub hub_location: Option<String>,
    /// Parent directory of the per-device log directory
    pub log_directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub use_authentication: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_ssl: bool,
    pub port_ssl: Option<u16>,
    pub keepalive: Duration,
}

impl BrokerConfig {
    /// Port to connect to, depending on whether SSL is enabled
    pub fn port(&self) -> u16 {
        match (self.use_ssl, self.port_ssl) {
            (true, Some(port)) => port,
            _ => self.port,
        }
    }

    /// Username and password, only when authentication is enabled
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if !self.use_authentication {
            return None;
        }
        Some((self.username.as_deref()?, self.password.as_deref()?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicConfig {
    /// Inbound commands
    pub set_state: String,
    /// Outbound retained state
    pub report_state: String,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;
        raw.validate()
    }
}

/// Generates `usb_power_controller_` followed by 32 random hex digits
pub fn generate_client_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..32)
        .map(|_| HEX_DIGITS[rng.random_range(0..HEX_DIGITS.len())] as char)
        .collect();
    format!("{}{}", CLIENT_ID_PREFIX, suffix)
}

// File layout before validation

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Scalar {
    fn render(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Str(s) => s.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(rename = "General", default)]
    general: RawGeneral,
    #[serde(rename = "MQTTBrokerConfig", default)]
    broker: RawBroker,
    #[serde(rename = "MQTTTopicConfig", default)]
    topics: RawTopics,
}

#[derive(Debug, Default, Deserialize)]
struct RawGeneral {
    switch_name: Option<Scalar>,
    hub_location: Option<Scalar>,
    log_directory: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBroker {
    #[serde(alias = "host")]
    mqtt_host: Option<Scalar>,
    #[serde(alias = "port")]
    mqtt_port: Option<Scalar>,
    #[serde(alias = "client_id")]
    mqtt_client_id: Option<Scalar>,
    #[serde(alias = "use_authentication")]
    mqtt_use_authentication: Option<Scalar>,
    #[serde(alias = "username")]
    mqtt_username: Option<Scalar>,
    #[serde(alias = "password")]
    mqtt_password: Option<Scalar>,
    #[serde(alias = "use_ssl")]
    mqtt_use_ssl: Option<Scalar>,
    #[serde(alias = "port_ssl")]
    mqtt_port_ssl: Option<Scalar>,
    #[serde(alias = "keepalive")]
    mqtt_keepalive: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTopics {
    #[serde(alias = "set_switch_state")]
    mqtt_topic_set_switch_state: Option<Scalar>,
    #[serde(alias = "report_switch_state")]
    mqtt_topic_report_switch_state: Option<Scalar>,
}

impl RawConfig {
    fn validate(self) -> Result<Config, ConfigError> {
        let general = GeneralConfig {
            switch_name: required(text("switch_name", self.general.switch_name)?, "switch_name")?,
            hub_location: text("hub_location", self.general.hub_location)?,
            log_directory: text("log_directory", self.general.log_directory)?
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let b = self.broker;
        let use_authentication = flag("mqtt_use_authentication", b.mqtt_use_authentication, false)?;
        let use_ssl = flag("mqtt_use_ssl", b.mqtt_use_ssl, false)?;

        let mut username = text("mqtt_username", b.mqtt_username)?;
        let mut password = text("mqtt_password", b.mqtt_password)?;
        if use_authentication {
            username = Some(required(username, "mqtt_username")?);
            password = Some(required(password, "mqtt_password")?);
        }

        let mut port_ssl = port("mqtt_port_ssl", b.mqtt_port_ssl)?;
        if use_ssl {
            port_ssl = Some(required(port_ssl, "mqtt_port_ssl")?);
        }

        let keepalive = keepalive("mqtt_keepalive", b.mqtt_keepalive)?
            .unwrap_or(Duration::from_secs(DEFAULT_KEEPALIVE_SECS));

        let broker = BrokerConfig {
            host: required(text("mqtt_host", b.mqtt_host)?, "mqtt_host")?,
            port: required(port("mqtt_port", b.mqtt_port)?, "mqtt_port")?,
            client_id: text("mqtt_client_id", b.mqtt_client_id)?.unwrap_or_else(generate_client_id),
            use_authentication,
            username,
            password,
            use_ssl,
            port_ssl,
            keepalive,
        };

        let t = self.topics;
        let topics = TopicConfig {
            set_state: required(
                text("mqtt_topic_set_switch_state", t.mqtt_topic_set_switch_state)?,
                "mqtt_topic_set_switch_state",
            )?,
            report_state: required(
                text("mqtt_topic_report_switch_state", t.mqtt_topic_report_switch_state)?,
                "mqtt_topic_report_switch_state",
            )?,
        };

        Ok(Config {
            general,
            broker,
            topics,
        })
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Missing(field))
}

fn text(field: &'static str, value: Option<Scalar>) -> Result<Option<String>, ConfigError> {
    match value {
        None => Ok(None),
        Some(Scalar::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Scalar::Str(s)) => Ok(Some(s)),
        Some(other) => Err(ConfigError::InvalidValue {
            field,
            value: other.render(),
        }),
    }
}

fn flag(field: &'static str, value: Option<Scalar>, default: bool) -> Result<bool, ConfigError> {
    let invalid = |value: String| ConfigError::InvalidValue { field, value };
    match value {
        None => Ok(default),
        Some(Scalar::Bool(b)) => Ok(b),
        Some(Scalar::Int(1)) => Ok(true),
        Some(Scalar::Int(0)) => Ok(false),
        Some(Scalar::Int(i)) => Err(invalid(i.to_string())),
        Some(Scalar::Str(s)) => match s.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "true" | "high" | "1" => Ok(true),
            "false" | "low" | "0" => Ok(false),
            _ => Err(invalid(s)),
        },
    }
}

fn number(field: &'static str, value: Option<Scalar>) -> Result<Option<u64>, ConfigError> {
    let invalid = |value: String| ConfigError::InvalidValue { field, value };
    match value {
        None => Ok(None),
        Some(Scalar::Int(i)) => u64::try_from(i).map(Some).map_err(|_| invalid(i.to_string())),
        Some(Scalar::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Scalar::Str(s)) => s.trim().parse().map(Some).map_err(|_| invalid(s)),
        Some(other) => Err(invalid(other.render())),
    }
}

fn port(field: &'static str, value: Option<Scalar>) -> Result<Option<u16>, ConfigError> {
    let rendered = value.as_ref().map(Scalar::render).unwrap_or_default();
    match number(field, value)? {
        None => Ok(None),
        Some(n) => match u16::try_from(n) {
            Ok(p) if p > 0 => Ok(Some(p)),
            _ => Err(ConfigError::InvalidValue {
                field,
                value: rendered,
            }),
        },
    }
}

/// Keep-alive travels as a 16 bit field in CONNECT, 0 disables it
fn keepalive(
    field: &'static str,
    value: Option<Scalar>,
) -> Result<Option<Duration>, ConfigError> {
    let rendered = value.as_ref().map(Scalar::render).unwrap_or_default();
    match number(field, value)? {
        None => Ok(None),
        Some(n) => match u16::try_from(n) {
            Ok(secs) => Ok(Some(Duration::from_secs(u64::from(secs)))),
            Err(_) => Err(ConfigError::InvalidValue {
                field,
                value: rendered,
            }),
        },
    }
}
