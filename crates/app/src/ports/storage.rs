//! Storage port: repository traits for persistence.
//!
//! The engines only read configuration records. The one mutation they perform
//! is [`DeviceRepository::update_device_value`], which also records what
//! caused the change.
//!
//! Method names carry the entity so one storage handle can implement every
//! repository without ambiguous calls.

use std::future::Future;

use homegate_domain::command::{Command, TransportKind};
use homegate_domain::connection::{Connection, ConnectionType};
use homegate_domain::device::{Device, Provenance};
use homegate_domain::error::GatewayError;
use homegate_domain::event::Event;
use homegate_domain::id::{CommandId, ConnectionId, DeviceId, EventId, TimerId};
use homegate_domain::log_message::LogMessage;
use homegate_domain::script::{Script, ScriptTrigger};
use homegate_domain::timer::Timer;

/// Repository for [`Connection`] persistence.
pub trait ConnectionRepository {
    fn create_connection(
        &self,
        connection: Connection,
    ) -> impl Future<Output = Result<Connection, GatewayError>> + Send;

    fn get_connection(
        &self,
        id: ConnectionId,
    ) -> impl Future<Output = Result<Option<Connection>, GatewayError>> + Send;

    fn list_connections(&self)
    -> impl Future<Output = Result<Vec<Connection>, GatewayError>> + Send;

    fn list_connections_by_type(
        &self,
        connection_type: ConnectionType,
    ) -> impl Future<Output = Result<Vec<Connection>, GatewayError>> + Send;

    /// Find a remote MQTT or SMS connection by its address.
    fn find_connection_by_address(
        &self,
        address: &str,
        connection_type: ConnectionType,
    ) -> impl Future<Output = Result<Option<Connection>, GatewayError>> + Send;

    /// Find the local broker connection a username authenticates as.
    fn find_local_connection(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<Connection>, GatewayError>> + Send;

    fn delete_connection(
        &self,
        id: ConnectionId,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Repository for [`Device`] persistence.
pub trait DeviceRepository {
    fn create_device(
        &self,
        device: Device,
    ) -> impl Future<Output = Result<Device, GatewayError>> + Send;

    fn get_device(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, GatewayError>> + Send;

    fn list_devices(&self) -> impl Future<Output = Result<Vec<Device>, GatewayError>> + Send;

    /// Devices whose type has a displayable state.
    fn list_devices_with_state(
        &self,
    ) -> impl Future<Output = Result<Vec<Device>, GatewayError>> + Send;

    /// Set a device value and record what caused it.
    ///
    /// Returns the updated device, or `None` when no device has `id`.
    fn update_device_value(
        &self,
        id: DeviceId,
        value: &str,
        provenance: Provenance,
    ) -> impl Future<Output = Result<Option<Device>, GatewayError>> + Send;

    /// What caused the last value update of a device.
    fn device_provenance(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Provenance>, GatewayError>> + Send;

    fn delete_device(&self, id: DeviceId) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Repository for [`Command`] persistence.
pub trait CommandRepository {
    fn create_command(
        &self,
        command: Command,
    ) -> impl Future<Output = Result<Command, GatewayError>> + Send;

    fn get_command(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<Option<Command>, GatewayError>> + Send;

    /// The command a device runs for `action` over `transport`.
    fn find_command(
        &self,
        device_id: DeviceId,
        action: &str,
        transport: TransportKind,
    ) -> impl Future<Output = Result<Option<Command>, GatewayError>> + Send;

    fn delete_command(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Repository for [`Event`] persistence.
pub trait EventRepository {
    fn create_event(
        &self,
        event: Event,
    ) -> impl Future<Output = Result<Event, GatewayError>> + Send;

    fn get_event(
        &self,
        id: EventId,
    ) -> impl Future<Output = Result<Option<Event>, GatewayError>> + Send;

    fn events_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> impl Future<Output = Result<Vec<Event>, GatewayError>> + Send;

    fn events_for_topic(
        &self,
        connection_id: ConnectionId,
        topic: &str,
    ) -> impl Future<Output = Result<Vec<Event>, GatewayError>> + Send;

    /// Events on `topic` whose literal payload equals `payload`.
    fn events_for_payload(
        &self,
        connection_id: ConnectionId,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<Vec<Event>, GatewayError>> + Send;

    fn events_for_device(
        &self,
        device_id: DeviceId,
    ) -> impl Future<Output = Result<Vec<Event>, GatewayError>> + Send;

    fn delete_event(&self, id: EventId) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Repository for [`Script`] persistence.
pub trait ScriptRepository {
    fn create_script(
        &self,
        script: Script,
    ) -> impl Future<Output = Result<Script, GatewayError>> + Send;

    fn list_scripts(&self) -> impl Future<Output = Result<Vec<Script>, GatewayError>> + Send;

    fn scripts_for_trigger(
        &self,
        trigger: ScriptTrigger,
    ) -> impl Future<Output = Result<Vec<Script>, GatewayError>> + Send;
}

/// Repository for [`Timer`] persistence.
pub trait TimerRepository {
    fn create_timer(
        &self,
        timer: Timer,
    ) -> impl Future<Output = Result<Timer, GatewayError>> + Send;

    fn get_timer(
        &self,
        id: TimerId,
    ) -> impl Future<Output = Result<Option<Timer>, GatewayError>> + Send;

    fn list_timers(&self) -> impl Future<Output = Result<Vec<Timer>, GatewayError>> + Send;

    /// Timers armed automatically at start.
    fn list_boot_timers(&self) -> impl Future<Output = Result<Vec<Timer>, GatewayError>> + Send;

    fn delete_timer(&self, id: TimerId) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Append-only audit log of transport traffic.
pub trait LogRepository {
    fn append_log(
        &self,
        message: LogMessage,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Most recent records, newest first.
    fn recent_logs(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LogMessage>, GatewayError>> + Send;
}

/// Everything the engines need from persistence, as one cloneable handle.
pub trait Storage:
    ConnectionRepository
    + DeviceRepository
    + CommandRepository
    + EventRepository
    + ScriptRepository
    + TimerRepository
    + LogRepository
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<T> Storage for T where
    T: ConnectionRepository
        + DeviceRepository
        + CommandRepository
        + EventRepository
        + ScriptRepository
        + TimerRepository
        + LogRepository
        + Clone
        + Send
        + Sync
        + 'static
{
}
