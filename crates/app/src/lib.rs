//! # homegate-app
//!
//! Application layer: engines and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters implement:
//!   - storage repositories for every entity, grouped under [`ports::Storage`]
//!   - [`ports::MqttClient`] / [`ports::MqttClientFactory`] for remote brokers
//!   - [`ports::BrokerBackend`] for the embedded broker
//!   - [`ports::SmsModem`] for the SMS primitive
//! - Resolve inbound messages into events ([`event_resolver`])
//! - Dispatch device actions as commands ([`command_dispatcher`])
//! - Own the runtime transport state: client registry, local broker
//!   sessions, SMS queues, armed timers
//! - Provide in-process infrastructure (notification sink, inbound router)
//!
//! ## Dependency rule
//! Depends on `homegate-domain` only (plus `tokio` for channels, timers and tasks).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod automation_engine;
pub mod client_hooks;
pub mod command_dispatcher;
pub mod connection_registry;
pub mod event_resolver;
pub mod gateway;
pub mod inbound;
pub mod local_broker;
pub mod notification_sink;
pub mod ports;
pub mod reconnect;
pub mod router;
pub mod sms_gateway;
pub mod sms_parser;
pub mod subscription;
pub mod timer_scheduler;

pub mod sync;

#[cfg(test)]
mod testing;
