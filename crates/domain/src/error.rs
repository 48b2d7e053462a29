//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`GatewayError`] via `From` when crossing a port boundary.

/// Base error for every fallible operation in the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A domain invariant was violated.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// A referenced record does not exist.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// A transport could not carry a message.
    #[error("transport error")]
    Transport(#[from] TransportError),

    /// The storage collaborator failed.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Domain invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("remote connections require an address")]
    MissingAddress,

    #[error("local broker connections require a username")]
    MissingUsername,

    #[error("command action must not be empty")]
    EmptyAction,

    #[error("repeating timers require a non-zero interval")]
    ZeroInterval,

    #[error("invalid SMS parser template: {0}")]
    InvalidParser(String),
}

/// A lookup by id returned nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Failures reported by a transport (MQTT client, local broker, SMS modem).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No client or session exists for the target.
    #[error("no transport available for {0}")]
    Unavailable(String),

    /// The transport accepted the request but reported a failure.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// The transport has not been started.
    #[error("transport not running")]
    NotRunning,

    /// The host refused the permission needed to use the transport.
    #[error("transport permission denied")]
    PermissionDenied,
}
