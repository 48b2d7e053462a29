//! User-visible notifications raised by the engines.

use serde::{Deserialize, Serialize};

use crate::id::CommandId;

/// Enough to re-attempt a failed command through the dispatcher's retry path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRequest {
    pub command_id: CommandId,
    /// Whether the failed attempt went over MQTT.
    pub mqtt: bool,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub content: String,
    pub retry: Option<RetryRequest>,
}

impl Notification {
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            retry: None,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryRequest) -> Self {
        self.retry = Some(retry);
        self
    }

    /// A remote broker keeps dropping the connection.
    #[must_use]
    pub fn reconnecting(address: &str) -> Self {
        Self::new("Reconnecting", format!("Connection to {address} lost, reconnecting"))
    }

    /// A remote broker could not be reached and its client was evicted.
    #[must_use]
    pub fn connection_failed(address: &str) -> Self {
        Self::new("Connection failed", format!("Could not connect to {address}"))
    }

    /// An event was resolved for a device.
    #[must_use]
    pub fn event(device: &str, event_type: &str) -> Self {
        Self::new(device, event_type)
    }

    /// A command could not be delivered.
    #[must_use]
    pub fn not_delivered(device: &str, action: &str, retry: RetryRequest) -> Self {
        Self::new(device, format!("Command {action} not delivered")).with_retry(retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_carry_retry_request_on_failure() {
        let retry = RetryRequest {
            command_id: CommandId::new(),
            mqtt: true,
            value: Some("7".to_string()),
        };
        let notification = Notification::not_delivered("Lamp", "on", retry.clone());
        assert_eq!(notification.retry, Some(retry));
        assert_eq!(notification.content, "Command on not delivered");
    }

    #[test]
    fn should_name_address_in_connection_notices() {
        assert!(Notification::reconnecting("broker.local").content.contains("broker.local"));
        assert_eq!(Notification::connection_failed("b").title, "Connection failed");
    }
}
