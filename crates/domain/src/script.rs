//! Script: an automation rule binding a trigger to a device command.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, ValidationError};
use crate::id::{DeviceId, EventId, ScriptId, TimerId};

/// What starts a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ScriptTrigger {
    Event(EventId),
    Timer(TimerId),
}

/// Precondition on the value carried by the trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "operand", rename_all = "snake_case")]
pub enum Guard {
    Equals(String),
    NotEquals(String),
    Above(f64),
    Below(f64),
}

impl Guard {
    /// Check the guard against a carried value.
    ///
    /// Numeric guards reject values that are missing or not numbers.
    #[must_use]
    pub fn accepts(&self, value: Option<&str>) -> bool {
        match self {
            Self::Equals(expected) => value == Some(expected.as_str()),
            Self::NotEquals(expected) => value != Some(expected.as_str()),
            Self::Above(threshold) => parse_number(value).is_some_and(|v| v > *threshold),
            Self::Below(threshold) => parse_number(value).is_some_and(|v| v < *threshold),
        }
    }
}

fn parse_number(value: Option<&str>) -> Option<f64> {
    value?.trim().parse().ok()
}

/// An automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: ScriptId,
    pub name: String,
    pub trigger: ScriptTrigger,
    pub guard: Option<Guard>,
    pub device_id: DeviceId,
    pub command_action: String,
    pub enabled: bool,
}

impl Script {
    /// Create a builder for constructing a [`Script`].
    #[must_use]
    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - `command_action` is empty ([`ValidationError::EmptyAction`])
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.command_action.is_empty() {
            return Err(ValidationError::EmptyAction.into());
        }
        Ok(())
    }

    /// Whether the script should run for a trigger carrying `value`.
    #[must_use]
    pub fn should_run(&self, value: Option<&str>) -> bool {
        self.enabled && self.guard.as_ref().is_none_or(|guard| guard.accepts(value))
    }
}

/// Step-by-step builder for [`Script`].
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    id: Option<ScriptId>,
    name: Option<String>,
    trigger: Option<ScriptTrigger>,
    guard: Option<Guard>,
    device_id: Option<DeviceId>,
    command_action: Option<String>,
    disabled: bool,
}

impl ScriptBuilder {
    #[must_use]
    pub fn id(mut self, id: ScriptId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn on_event(mut self, id: EventId) -> Self {
        self.trigger = Some(ScriptTrigger::Event(id));
        self
    }

    #[must_use]
    pub fn on_timer(mut self, id: TimerId) -> Self {
        self.trigger = Some(ScriptTrigger::Timer(id));
        self
    }

    #[must_use]
    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    #[must_use]
    pub fn run(mut self, device_id: DeviceId, action: impl Into<String>) -> Self {
        self.device_id = Some(device_id);
        self.command_action = Some(action.into());
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Consume the builder, validate, and return a [`Script`].
    ///
    /// A script without an explicit trigger listens to a fresh, unused event id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] if required fields are missing or empty.
    pub fn build(self) -> Result<Script, GatewayError> {
        let script = Script {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            trigger: self
                .trigger
                .unwrap_or_else(|| ScriptTrigger::Event(EventId::new())),
            guard: self.guard,
            device_id: self.device_id.unwrap_or_default(),
            command_action: self.command_action.unwrap_or_default(),
            enabled: !self.disabled,
        };
        script.validate()?;
        Ok(script)
    }
}
