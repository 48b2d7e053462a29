//! Append-only audit record of transport traffic.

use serde::{Deserialize, Serialize};

use crate::id::{ConnectionId, LogMessageId};
use crate::kind::define_kind;
use crate::time::{Timestamp, now};

define_kind!(
    /// Whether the message entered or left the gateway.
    Direction {
        Inbound => "inbound",
        Outbound => "outbound",
    }
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub id: LogMessageId,
    pub direction: Direction,
    pub connection_id: Option<ConnectionId>,
    /// Broker address, local source address or phone number.
    pub address: String,
    pub topic: String,
    pub payload: String,
    pub timestamp: Timestamp,
}

impl LogMessage {
    #[must_use]
    pub fn inbound(address: &str, topic: &str, payload: &str) -> Self {
        Self::new(Direction::Inbound, address, topic, payload)
    }

    #[must_use]
    pub fn outbound(address: &str, topic: &str, payload: &str) -> Self {
        Self::new(Direction::Outbound, address, topic, payload)
    }

    #[must_use]
    pub fn with_connection(mut self, id: ConnectionId) -> Self {
        self.connection_id = Some(id);
        self
    }

    fn new(direction: Direction, address: &str, topic: &str, payload: &str) -> Self {
        Self {
            id: LogMessageId::new(),
            direction,
            connection_id: None,
            address: address.to_string(),
            topic: topic.to_string(),
            payload: payload.to_string(),
            timestamp: now(),
        }
    }
}
