//! Turns connection records into rumqttc clients.

use homegate_app::client_hooks::ClientHooks;
use homegate_app::ports::MqttClientFactory;
use homegate_domain::connection::{Connection, ProtocolVersion};
use homegate_domain::error::GatewayError;

use crate::client::{ClientOptions, RumqttClient};
use crate::config::MqttConfig;
use crate::error::MqttError;

#[derive(Debug, Clone, Default)]
pub struct RumqttClientFactory {
    config: MqttConfig,
}

impl RumqttClientFactory {
    #[must_use]
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    /// Client options for `connection`: protocol version, TLS and credentials.
    ///
    /// # Errors
    ///
    /// Returns [`MqttError::InvalidOptions`] when the connection has no host.
    pub fn options(&self, connection: &Connection) -> Result<ClientOptions, MqttError> {
        let host = connection.host();
        if host.is_empty() {
            return Err(MqttError::InvalidOptions(format!(
                "connection {} has no host",
                connection.id
            )));
        }
        let client_id = format!("{}-{}", self.config.client_id_prefix, connection.id);

        let options = match connection.mode {
            ProtocolVersion::V311 => {
                let mut options = rumqttc::MqttOptions::new(client_id, host, connection.port);
                options.set_keep_alive(self.config.keep_alive());
                if let Some((username, password)) = connection.credentials() {
                    options.set_credentials(username, password);
                }
                if connection.tls {
                    options.set_transport(rumqttc::Transport::tls_with_default_config());
                }
                ClientOptions::V4(options)
            }
            ProtocolVersion::V5 => {
                let mut options = rumqttc::v5::MqttOptions::new(client_id, host, connection.port);
                options.set_keep_alive(self.config.keep_alive());
                if let Some((username, password)) = connection.credentials() {
                    options.set_credentials(username, password);
                }
                if connection.tls {
                    options.set_transport(rumqttc::Transport::tls_with_default_config());
                }
                ClientOptions::V5(Box::new(options))
            }
        };
        Ok(options)
    }
}

impl MqttClientFactory for RumqttClientFactory {
    type Client = RumqttClient;

    fn create(
        &self,
        connection: &Connection,
        hooks: ClientHooks,
    ) -> Result<RumqttClient, GatewayError> {
        let options = self.options(connection)?;
        tracing::debug!(
            address = %connection.address,
            mode = %connection.mode,
            tls = connection.tls,
            "mqtt client created"
        );
        Ok(RumqttClient::new(
            options,
            self.config.request_capacity,
            self.config.retry_delay(),
            hooks,
        ))
    }
}
