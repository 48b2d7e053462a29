//! # homegate-adapter-mqtt
//!
//! MQTT transports for homegate.
//!
//! ## Responsibilities
//! - [`RumqttClientFactory`] / [`RumqttClient`]: sessions with remote brokers,
//!   MQTT 3.1.1 or 5 depending on the connection, optionally over TLS
//! - [`RumqttdBackend`]: the broker the gateway hosts for local devices,
//!   reached through a relay that attributes sessions and publishes
//! - [`BrokerProperties`]: listen settings of that broker, persisted as TOML
//!
//! ## Dependency rule
//! Depends on `homegate-app` (ports) and `homegate-domain`. The engines never
//! see rumqttc or rumqttd types.

pub mod broker;
pub mod broker_properties;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
mod relay;

pub use broker::RumqttdBackend;
pub use broker_properties::BrokerProperties;
pub use client::RumqttClient;
pub use config::MqttConfig;
pub use error::MqttError;
pub use factory::RumqttClientFactory;
