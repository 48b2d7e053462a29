//! # homegate-domain
//!
//! Pure domain model for the homegate home-automation gateway.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Connections** (MQTT brokers, the local broker, SMS endpoints)
//! - Define **Devices** (things whose value the gateway mirrors)
//! - Define **Commands** (outbound message templates for a device action)
//! - Define **Events** (inbound message templates that raise a signal)
//! - Define **Scripts** and **Timers** (automation triggers and effects)
//! - Payload templating and JSON template matching
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
mod kind;
pub mod time;

pub mod command;
pub mod connection;
pub mod device;
pub mod event;
pub mod log_message;
pub mod notification;
pub mod payload;
pub mod script;
pub mod timer;

pub use kind::UnknownVariant;
