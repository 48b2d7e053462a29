//! MQTT client port: remote broker sessions.

use std::future::Future;

use homegate_domain::connection::Connection;
use homegate_domain::error::{GatewayError, TransportError};

use crate::client_hooks::ClientHooks;

/// A session with one remote MQTT broker.
///
/// Implementations keep a [`SubscriptionSet`](crate::subscription::SubscriptionSet)
/// so that subscribing twice to a topic issues a single protocol subscribe,
/// and report every connectivity transition and received publish to the
/// [`ClientHooks`] they were created with.
pub trait MqttClient: Send + Sync + 'static {
    /// Start the session. Returns once the first connection attempt is under way.
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Stop the session on purpose. No notification is raised.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    /// Publish a message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] when the client is not
    /// connected or the library rejects the request. No retry is attempted.
    fn publish(
        &self,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn is_connected(&self) -> bool;
}

/// Builds clients from connection records.
pub trait MqttClientFactory: Send + Sync + 'static {
    type Client: MqttClient;

    /// Configure a client for `connection` (protocol version, TLS, credentials).
    ///
    /// # Errors
    ///
    /// Returns an error when the connection cannot be turned into client options.
    fn create(
        &self,
        connection: &Connection,
        hooks: ClientHooks,
    ) -> Result<Self::Client, GatewayError>;
}
