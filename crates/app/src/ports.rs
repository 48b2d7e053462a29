//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the engine layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod broker;
pub mod mqtt;
pub mod sms;
pub mod storage;

pub use broker::{Authenticator, BrokerBackend, BrokerEvent};
pub use mqtt::{MqttClient, MqttClientFactory};
pub use sms::SmsModem;
pub use storage::{
    CommandRepository, ConnectionRepository, DeviceRepository, EventRepository, LogRepository,
    ScriptRepository, Storage, TimerRepository,
};
