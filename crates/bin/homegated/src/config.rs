//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `homegate.toml` in the working directory. Every field has a
//! default so the file is optional. Environment variables take precedence
//! over file values.

use std::path::PathBuf;

use homegate_adapter_mqtt::MqttConfig;
use homegate_app::gateway::GatewayOptions;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Remote MQTT client settings.
    pub mqtt: MqttConfig,
    /// Embedded broker settings.
    pub broker: BrokerConfig,
    pub sms: SmsConfig,
    pub gateway: GatewayConfig,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub enabled: bool,
    /// Where the broker's listener properties are persisted.
    pub properties_path: PathBuf,
    /// Overrides the port stored in the properties file.
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub enabled: bool,
}

/// Channel sizes of the gateway core.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub inbound_capacity: usize,
    pub notification_capacity: usize,
}

impl Config {
    /// Load configuration from `homegate.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result does not validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("homegate.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HOMEGATE_DATABASE_URL") {
            self.database.url = val;
        }
        if let Ok(val) = std::env::var("HOMEGATE_BROKER_PORT") {
            if let Ok(port) = val.parse() {
                self.broker.port = Some(port);
            }
        }
        if let Ok(val) = std::env::var("HOMEGATE_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.port == Some(0) {
            return Err(ConfigError::Validation(
                "broker port must be non-zero".to_string(),
            ));
        }
        if self.gateway.inbound_capacity == 0 || self.gateway.notification_capacity == 0 {
            return Err(ConfigError::Validation(
                "channel capacities must be non-zero".to_string(),
            ));
        }
        if self.mqtt.request_capacity == 0 {
            return Err(ConfigError::Validation(
                "mqtt request capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    #[must_use]
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            inbound_capacity: self.gateway.inbound_capacity,
            notification_capacity: self.gateway.notification_capacity,
            broker_enabled: self.broker.enabled,
            sms_enabled: self.sms.enabled,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:homegate.db?mode=rwc".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "homegated=info,homegate=info,rumqttd=warn".to_string(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            properties_path: PathBuf::from("broker.toml"),
            port: None,
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let options = GatewayOptions::default();
        Self {
            inbound_capacity: options.inbound_capacity,
            notification_capacity: options.notification_capacity,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
