//! Connection: a transport endpoint devices are reached through.
//!
//! Three flavours exist: a remote MQTT broker (keyed by its address), a
//! session on the gateway's own embedded broker (keyed by the username the
//! device authenticates with) and an SMS endpoint (keyed by phone number).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, ValidationError};
use crate::id::ConnectionId;
use crate::kind::define_kind;

/// Host every local-broker connection is bound to.
pub const LOCAL_BROKER_HOST: &str = "127.0.0.1";

/// Default TTL for pending SMS sends, in milliseconds.
pub const DEFAULT_EXPIRED_TIME_MS: u64 = 60_000;

define_kind!(
    /// Which transport a [`Connection`] describes.
    ConnectionType {
        Sms => "sms",
        Mqtt => "mqtt",
        LocalMqtt => "local_mqtt",
    }
);

define_kind!(
    /// MQTT protocol version spoken to a remote broker.
    ProtocolVersion {
        /// MQTT 3.1.1.
        V311 => "v311",
        /// MQTT 5.
        V5 => "v5",
    }
);

/// A configured transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tls: bool,
    pub mode: ProtocolVersion,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Grammar used to split inbound SMS bodies into fields.
    pub parser: Option<String>,
    /// How long a pending SMS send stays valid, in milliseconds.
    pub expired_time_ms: u64,
    pub connection_type: ConnectionType,
}

impl Connection {
    /// Create a builder for constructing a [`Connection`].
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - a remote MQTT or SMS connection has no address ([`ValidationError::MissingAddress`])
    /// - a local broker connection has no username ([`ValidationError::MissingUsername`])
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        match self.connection_type {
            ConnectionType::LocalMqtt => {
                if self.username.as_deref().is_none_or(str::is_empty) {
                    return Err(ValidationError::MissingUsername.into());
                }
            }
            ConnectionType::Mqtt | ConnectionType::Sms => {
                if self.address.is_empty() {
                    return Err(ValidationError::MissingAddress.into());
                }
            }
        }
        Ok(())
    }

    /// Key the connection is registered and looked up under.
    ///
    /// Local broker sessions are keyed by username, everything else by address.
    #[must_use]
    pub fn key(&self) -> &str {
        match self.connection_type {
            ConnectionType::LocalMqtt => self.username.as_deref().unwrap_or_default(),
            ConnectionType::Mqtt | ConnectionType::Sms => &self.address,
        }
    }

    /// Address inbound messages from this connection are attributed to.
    #[must_use]
    pub fn source_address(&self) -> String {
        match self.connection_type {
            ConnectionType::LocalMqtt => local_source_address(self.key()),
            ConnectionType::Mqtt | ConnectionType::Sms => self.address.clone(),
        }
    }

    /// Host to dial.
    #[must_use]
    pub fn host(&self) -> &str {
        match self.connection_type {
            ConnectionType::LocalMqtt => LOCAL_BROKER_HOST,
            ConnectionType::Mqtt | ConnectionType::Sms => &self.address,
        }
    }

    /// Username and password, when both are set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    #[must_use]
    pub fn expired_time(&self) -> Duration {
        Duration::from_millis(self.expired_time_ms)
    }

    #[must_use]
    pub fn is_mqtt(&self) -> bool {
        matches!(
            self.connection_type,
            ConnectionType::Mqtt | ConnectionType::LocalMqtt
        )
    }
}

/// Source address of a publish received by the local broker from `username`.
#[must_use]
pub fn local_source_address(username: &str) -> String {
    format!("{LOCAL_BROKER_HOST}:{username}")
}

/// Extract the username from a local broker source address, if it is one.
#[must_use]
pub fn parse_local_source_address(address: &str) -> Option<&str> {
    address
        .strip_prefix(LOCAL_BROKER_HOST)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|user| !user.is_empty())
}

/// Step-by-step builder for [`Connection`].
#[derive(Debug, Default)]
pub struct ConnectionBuilder {
    id: Option<ConnectionId>,
    name: Option<String>,
    address: Option<String>,
    port: Option<u16>,
    tls: bool,
    mode: Option<ProtocolVersion>,
    username: Option<String>,
    password: Option<String>,
    parser: Option<String>,
    expired_time_ms: Option<u64>,
    connection_type: Option<ConnectionType>,
}

impl ConnectionBuilder {
    #[must_use]
    pub fn id(mut self, id: ConnectionId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: ProtocolVersion) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn parser(mut self, parser: impl Into<String>) -> Self {
        self.parser = Some(parser.into());
        self
    }

    #[must_use]
    pub fn expired_time_ms(mut self, ms: u64) -> Self {
        self.expired_time_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = Some(connection_type);
        self
    }

    /// Consume the builder, validate, and return a [`Connection`].
    ///
    /// Local broker connections always get [`LOCAL_BROKER_HOST`] as address.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] if required fields are missing or empty.
    pub fn build(self) -> Result<Connection, GatewayError> {
        let connection_type = self.connection_type.unwrap_or(ConnectionType::Mqtt);
        let address = match connection_type {
            ConnectionType::LocalMqtt => LOCAL_BROKER_HOST.to_string(),
            ConnectionType::Mqtt | ConnectionType::Sms => self.address.unwrap_or_default(),
        };
        let connection = Connection {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            address,
            port: self.port.unwrap_or(1883),
            tls: self.tls,
            mode: self.mode.unwrap_or(ProtocolVersion::V311),
            username: self.username,
            password: self.password,
            parser: self.parser,
            expired_time_ms: self.expired_time_ms.unwrap_or(DEFAULT_EXPIRED_TIME_MS),
            connection_type,
        };
        connection.validate()?;
        Ok(connection)
    }
}
