//! MQTT adapter error types.

use homegate_domain::error::{GatewayError, TransportError};

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The v3.1.1 client rejected a request.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// The v5 client rejected a request.
    #[error("MQTT v5 client error")]
    ClientV5(#[source] rumqttc::v5::ClientError),

    /// The connection record cannot be turned into client options.
    #[error("invalid client options: {0}")]
    InvalidOptions(String),

    /// The embedded broker could not be set up.
    #[error("broker error: {0}")]
    Broker(String),

    /// The broker properties file could not be read or written.
    #[error("broker properties io error")]
    PropertiesIo(#[source] std::io::Error),

    #[error("broker properties are not valid toml")]
    PropertiesParse(#[source] toml::de::Error),

    #[error("broker properties cannot be serialized")]
    PropertiesSerialize(#[source] toml::ser::Error),
}

impl MqttError {
    /// Convert into the [`TransportError`] reported across port boundaries.
    #[must_use]
    pub fn into_transport(self) -> TransportError {
        match self {
            Self::Client(err) => TransportError::PublishFailed(err.to_string()),
            Self::ClientV5(err) => TransportError::PublishFailed(err.to_string()),
            other => TransportError::Unavailable(other.to_string()),
        }
    }
}

impl From<MqttError> for TransportError {
    fn from(err: MqttError) -> Self {
        err.into_transport()
    }
}

impl From<MqttError> for GatewayError {
    fn from(err: MqttError) -> Self {
        GatewayError::Transport(err.into_transport())
    }
}
