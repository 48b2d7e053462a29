//! Event: an inbound message template that raises a domain signal.
//!
//! An event with a payload matches messages equal to it (or, for JSON events,
//! equal except for `data_field`). An event without payload is a "set" catch
//! and matches any message on its topic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, ValidationError};
use crate::id::{ConnectionId, DeviceId, EventId};
use crate::payload;

/// Event type given to synthetic events built from a command answer.
pub const SET_EVENT_TYPE: &str = "set";

/// An inbound message template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Domain signal name, e.g. `"on"`, `"motion"`, `"set"`.
    pub event_type: String,
    pub connection_id: ConnectionId,
    pub device_id: DeviceId,
    pub topic: String,
    /// Literal or JSON template. `None` marks a topic-level "set" catch.
    pub payload: Option<String>,
    pub is_json: bool,
    /// JSON key carrying the value, ignored when comparing.
    pub data_field: Option<String>,
}

impl Event {
    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] when `event_type` is empty.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.event_type.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        Ok(())
    }

    /// Whether this event matches any payload on its topic.
    #[must_use]
    pub fn is_set_catch(&self) -> bool {
        self.payload.is_none()
    }

    /// Match a parsed JSON payload against this event's template.
    ///
    /// Returns the firing on match. The carried value is `actual[data_field]`
    /// when present, otherwise the stored template.
    #[must_use]
    pub fn match_json(&self, actual: &Value) -> Option<EventFiring> {
        let template = self.payload.as_deref()?;
        let template: Value = serde_json::from_str(template).ok()?;
        if !payload::json_matches(&template, actual, self.data_field.as_deref()) {
            return None;
        }
        let carried = self
            .data_field
            .as_deref()
            .and_then(|field| payload::carried_value(actual, field))
            .or_else(|| self.payload.clone());
        Some(EventFiring::new(self.clone(), carried))
    }

    /// Build a synthetic "set" event for `device_id` carrying an answer.
    #[must_use]
    pub fn synthetic_set(connection_id: ConnectionId, device_id: DeviceId, topic: &str) -> Self {
        Self {
            id: EventId::new(),
            event_type: SET_EVENT_TYPE.to_string(),
            connection_id,
            device_id,
            topic: topic.to_string(),
            payload: None,
            is_json: false,
            data_field: None,
        }
    }
}

/// A resolved event together with the value it carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFiring {
    pub event: Event,
    pub value: Option<String>,
}

impl EventFiring {
    #[must_use]
    pub fn new(event: Event, value: Option<String>) -> Self {
        Self { event, value }
    }
}
