//! Remote client configuration.

use std::time::Duration;

use serde::Deserialize;

/// Settings shared by every remote MQTT client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
    /// Client identifiers are `<prefix>-<connection id>`.
    pub client_id_prefix: String,
    /// Capacity of the request queue between a client handle and its event loop.
    pub request_capacity: usize,
    /// Pause between two connection attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl MqttConfig {
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 30,
            client_id_prefix: "homegate".to_string(),
            request_capacity: 64,
            retry_delay_ms: 3_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = MqttConfig::default();
        assert_eq!(config.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.client_id_prefix, "homegate");
        assert_eq!(config.request_capacity, 64);
        assert_eq!(config.retry_delay(), Duration::from_secs(3));
    }

    #[test]
    fn should_deserialize_from_toml() {
        let toml = r#"
            keep_alive_secs = 60
            client_id_prefix = "attic"
            request_capacity = 10
            retry_delay_ms = 500
        "#;
        let config: MqttConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.client_id_prefix, "attic");
        assert_eq!(config.request_capacity, 10);
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn should_use_defaults_for_missing_fields() {
        let config: MqttConfig = toml::from_str("keep_alive_secs = 5").unwrap();
        assert_eq!(config.keep_alive_secs, 5);
        assert_eq!(config.client_id_prefix, "homegate");
    }
}
