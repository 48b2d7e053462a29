//! Command: the outbound message template for one device action.
//!
//! A device action may have one command per transport; the dispatcher picks
//! the MQTT variant first and falls back to SMS.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, ValidationError};
use crate::id::{CommandId, ConnectionId, DeviceId};
use crate::kind::define_kind;
use crate::payload;

define_kind!(
    /// Transport a command variant targets.
    TransportKind {
        Mqtt => "mqtt",
        Sms => "sms",
    }
);

define_kind!(
    /// How a sent command expects to be answered.
    ExecutionMode {
        /// Fire and forget; confirmed by the transport receipt.
        Async => "async",
        /// The answer is re-resolved as an event of the same device.
        Match => "match",
        /// The answer is carried into a synthetic "set" event.
        Set => "set",
        /// The answer is written as the device value.
        Confirm => "confirm",
        /// Any answer is ignored.
        Ignore => "ignore",
    }
);

impl ExecutionMode {
    /// Whether a send must wait for the previous send to the same number.
    #[must_use]
    pub fn is_sync(self) -> bool {
        matches!(self, Self::Match | Self::Set | Self::Confirm)
    }
}

/// Outbound template for a device action over one transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    /// Domain verb, e.g. `"on"`, `"off"`, `"set"`.
    pub action: String,
    pub transport: TransportKind,
    pub connection_id: ConnectionId,
    pub device_id: DeviceId,
    pub topic: String,
    /// Template; either contains `{value}` or is a JSON document.
    pub payload: String,
    pub data_field: Option<String>,
    pub is_json: bool,
    pub mode: ExecutionMode,
}

impl Command {
    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] when `action` is empty.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.action.is_empty() {
            return Err(ValidationError::EmptyAction.into());
        }
        Ok(())
    }

    /// Render the wire payload for `value`.
    ///
    /// JSON commands set their `data_field`; plain ones substitute `{value}`.
    #[must_use]
    pub fn render(&self, value: Option<&str>) -> String {
        if self.is_json {
            payload::apply_json_field(&self.payload, self.data_field.as_deref(), value)
        } else {
            payload::apply_value(&self.payload, value)
        }
    }

    /// Value the device is expected to hold once this command is confirmed.
    #[must_use]
    pub fn confirmed_value(&self, value: Option<&str>) -> String {
        value.map_or_else(|| self.action.clone(), str::to_string)
    }
}
