//! Device: a physical or virtual thing whose value the gateway mirrors.
//!
//! A device may be reachable over MQTT and SMS at the same time; each
//! transport addresses it independently.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, ValidationError};
use crate::id::{CommandId, ConnectionId, DeviceId, EventId};
use crate::kind::define_kind;

define_kind!(
    /// Behavioural class of a device.
    DeviceType {
        Switch => "switch",
        Light => "light",
        Sensor => "sensor",
        Lock => "lock",
        Generic => "generic",
    }
);

impl DeviceType {
    /// Whether the device has a state worth displaying.
    #[must_use]
    pub fn has_state(self) -> bool {
        !matches!(self, Self::Generic)
    }
}

/// A device known to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Last known value, as reported by an event or confirmed by a command.
    pub value: String,
    pub device_type: DeviceType,
    pub mqtt_connection_id: Option<ConnectionId>,
    pub sms_connection_id: Option<ConnectionId>,
}

impl Device {
    /// Create a builder for constructing a [`Device`].
    #[must_use]
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] when `name` is empty.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        Ok(())
    }
}

/// What caused a device value to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Provenance {
    /// An inbound message resolved to this event.
    Event(EventId),
    /// An outbound command was confirmed by its transport.
    Command(CommandId),
    /// Set by the configuration layer.
    Manual,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event(id) => write!(f, "event({id})"),
            Self::Command(id) => write!(f, "command({id})"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Step-by-step builder for [`Device`].
#[derive(Debug, Default)]
pub struct DeviceBuilder {
    id: Option<DeviceId>,
    name: Option<String>,
    value: Option<String>,
    device_type: Option<DeviceType>,
    mqtt_connection_id: Option<ConnectionId>,
    sms_connection_id: Option<ConnectionId>,
}

impl DeviceBuilder {
    #[must_use]
    pub fn id(mut self, id: DeviceId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    #[must_use]
    pub fn mqtt_connection(mut self, id: ConnectionId) -> Self {
        self.mqtt_connection_id = Some(id);
        self
    }

    #[must_use]
    pub fn sms_connection(mut self, id: ConnectionId) -> Self {
        self.sms_connection_id = Some(id);
        self
    }

    /// Consume the builder, validate, and return a [`Device`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] if the name is missing or empty.
    pub fn build(self) -> Result<Device, GatewayError> {
        let device = Device {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            value: self.value.unwrap_or_default(),
            device_type: self.device_type.unwrap_or(DeviceType::Generic),
            mqtt_connection_id: self.mqtt_connection_id,
            sms_connection_id: self.sms_connection_id,
        };
        device.validate()?;
        Ok(device)
    }
}
