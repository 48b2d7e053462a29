//! Embedded broker port.

use std::sync::Arc;

use tokio::sync::mpsc;

use homegate_domain::error::TransportError;

/// Validates credentials presented by clients of the embedded broker.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: &str, password: &[u8]) -> bool;
}

/// Something the embedded broker observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    ClientConnected { username: String },
    ClientDisconnected { username: String },
    /// A client published a message.
    ///
    /// Backends only report publishes they can tie to the session of
    /// `username`; anything else is dropped before it gets here.
    Published {
        username: String,
        topic: String,
        payload: Vec<u8>,
    },
}

/// A running MQTT broker the gateway hosts itself.
pub trait BrokerBackend: Send + Sync + 'static {
    /// Bind and start serving. Observations are pushed into `events`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unavailable`] when the broker cannot start.
    fn start(
        &self,
        authenticator: Arc<dyn Authenticator>,
        events: mpsc::UnboundedSender<BrokerEvent>,
    ) -> Result<(), TransportError>;

    fn stop(&self);

    /// Publish directly into the broker's subscriber set.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] when the broker rejects the message.
    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError>;
}
