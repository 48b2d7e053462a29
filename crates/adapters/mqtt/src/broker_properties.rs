//! Persisted settings of the embedded broker.
//!
//! Stored as a small TOML file next to the database. The file is read each
//! time the broker starts; when it is missing or unreadable the defaults are
//! used and written back so the next start finds a valid file.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MqttError;

/// Name of the only authenticator the gateway ships.
pub const STORED_CREDENTIALS: &str = "stored-credentials";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerProperties {
    pub host: String,
    pub port: u16,
    /// Accept clients whose credentials do not match a stored connection.
    pub allow_anonymous: bool,
    pub authenticator: String,
}

impl Default for BrokerProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1883,
            allow_anonymous: false,
            authenticator: STORED_CREDENTIALS.to_string(),
        }
    }
}

impl BrokerProperties {
    /// Read the properties stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, MqttError> {
        let content = std::fs::read_to_string(path).map_err(MqttError::PropertiesIo)?;
        toml::from_str(&content).map_err(MqttError::PropertiesParse)
    }

    /// Read the properties stored at `path`, falling back to the defaults.
    ///
    /// The defaults are persisted when the file could not be loaded.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(properties) => properties,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "broker properties unusable, restoring defaults"
                );
                let properties = Self::default();
                if let Err(err) = properties.persist(path) {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to persist broker properties"
                    );
                }
                properties
            }
        }
    }

    /// Write the properties to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn persist(&self, path: &Path) -> Result<(), MqttError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(MqttError::PropertiesIo)?;
        }
        let content = toml::to_string(self).map_err(MqttError::PropertiesSerialize)?;
        std::fs::write(path, content).map_err(MqttError::PropertiesIo)
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Socket address the broker listens on.
    ///
    /// # Errors
    ///
    /// Returns [`MqttError::Broker`] when `host` is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr, MqttError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| {
                MqttError::Broker(format!("invalid listen address {}:{}", self.host, self.port))
            })
    }
}
