//! In-memory fakes of every port, shared by the engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use homegate_domain::command::{Command, ExecutionMode, TransportKind};
use homegate_domain::connection::{Connection, ConnectionType};
use homegate_domain::device::{Device, Provenance};
use homegate_domain::error::{GatewayError, TransportError};
use homegate_domain::event::Event;
use homegate_domain::id::{CommandId, ConnectionId, DeviceId, EventId, ScriptId, TimerId};
use homegate_domain::log_message::LogMessage;
use homegate_domain::script::{Script, ScriptTrigger};
use homegate_domain::timer::Timer;

use crate::client_hooks::ClientHooks;
use crate::inbound::Inbound;
use crate::ports::{
    Authenticator, BrokerBackend, BrokerEvent, CommandRepository, ConnectionRepository,
    DeviceRepository, EventRepository, LogRepository, MqttClient, MqttClientFactory,
    ScriptRepository, SmsModem, TimerRepository,
};
use crate::subscription::SubscriptionSet;

// ── Storage ────────────────────────────────────────────────────────

#[derive(Default)]
struct Store {
    connections: HashMap<ConnectionId, Connection>,
    devices: HashMap<DeviceId, Device>,
    provenance: HashMap<DeviceId, Provenance>,
    commands: HashMap<CommandId, Command>,
    events: Vec<Event>,
    scripts: HashMap<ScriptId, Script>,
    timers: HashMap<TimerId, Timer>,
    logs: Vec<LogMessage>,
}

#[derive(Clone, Default)]
pub struct InMemoryStorage {
    store: Arc<Mutex<Store>>,
}

impl InMemoryStorage {
    pub fn with_connection(self, connection: &Connection) -> Self {
        self.store
            .lock()
            .unwrap()
            .connections
            .insert(connection.id, connection.clone());
        self
    }

    pub fn with_device(self, device: &Device) -> Self {
        self.store
            .lock()
            .unwrap()
            .devices
            .insert(device.id, device.clone());
        self
    }

    pub fn with_command(self, command: &Command) -> Self {
        self.store
            .lock()
            .unwrap()
            .commands
            .insert(command.id, command.clone());
        self
    }

    pub fn with_event(self, event: &Event) -> Self {
        self.store.lock().unwrap().events.push(event.clone());
        self
    }

    pub fn with_script(self, script: &Script) -> Self {
        self.store
            .lock()
            .unwrap()
            .scripts
            .insert(script.id, script.clone());
        self
    }

    pub fn with_timer(self, timer: &Timer) -> Self {
        self.store
            .lock()
            .unwrap()
            .timers
            .insert(timer.id, timer.clone());
        self
    }

    pub fn device_value(&self, id: DeviceId) -> Option<String> {
        self.store
            .lock()
            .unwrap()
            .devices
            .get(&id)
            .map(|d| d.value.clone())
    }

    pub fn logs(&self) -> Vec<LogMessage> {
        self.store.lock().unwrap().logs.clone()
    }
}

impl ConnectionRepository for InMemoryStorage {
    async fn create_connection(&self, connection: Connection) -> Result<Connection, GatewayError> {
        let mut store = self.store.lock().unwrap();
        store.connections.insert(connection.id, connection.clone());
        Ok(connection)
    }

    async fn get_connection(&self, id: ConnectionId) -> Result<Option<Connection>, GatewayError> {
        Ok(self.store.lock().unwrap().connections.get(&id).cloned())
    }

    async fn list_connections(&self) -> Result<Vec<Connection>, GatewayError> {
        Ok(self.store.lock().unwrap().connections.values().cloned().collect())
    }

    async fn list_connections_by_type(
        &self,
        connection_type: ConnectionType,
    ) -> Result<Vec<Connection>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .connections
            .values()
            .filter(|c| c.connection_type == connection_type)
            .cloned()
            .collect())
    }

    async fn find_connection_by_address(
        &self,
        address: &str,
        connection_type: ConnectionType,
    ) -> Result<Option<Connection>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .connections
            .values()
            .find(|c| c.connection_type == connection_type && c.address == address)
            .cloned())
    }

    async fn find_local_connection(
        &self,
        username: &str,
    ) -> Result<Option<Connection>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .connections
            .values()
            .find(|c| {
                c.connection_type == ConnectionType::LocalMqtt
                    && c.username.as_deref() == Some(username)
            })
            .cloned())
    }

    async fn delete_connection(&self, id: ConnectionId) -> Result<(), GatewayError> {
        self.store.lock().unwrap().connections.remove(&id);
        Ok(())
    }
}

impl DeviceRepository for InMemoryStorage {
    async fn create_device(&self, device: Device) -> Result<Device, GatewayError> {
        self.store
            .lock()
            .unwrap()
            .devices
            .insert(device.id, device.clone());
        Ok(device)
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, GatewayError> {
        Ok(self.store.lock().unwrap().devices.get(&id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, GatewayError> {
        Ok(self.store.lock().unwrap().devices.values().cloned().collect())
    }

    async fn list_devices_with_state(&self) -> Result<Vec<Device>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .devices
            .values()
            .filter(|d| d.device_type.has_state())
            .cloned()
            .collect())
    }

    async fn update_device_value(
        &self,
        id: DeviceId,
        value: &str,
        provenance: Provenance,
    ) -> Result<Option<Device>, GatewayError> {
        let mut store = self.store.lock().unwrap();
        let Some(device) = store.devices.get_mut(&id) else {
            return Ok(None);
        };
        device.value = value.to_string();
        let device = device.clone();
        store.provenance.insert(id, provenance);
        Ok(Some(device))
    }

    async fn device_provenance(&self, id: DeviceId) -> Result<Option<Provenance>, GatewayError> {
        Ok(self.store.lock().unwrap().provenance.get(&id).copied())
    }

    async fn delete_device(&self, id: DeviceId) -> Result<(), GatewayError> {
        self.store.lock().unwrap().devices.remove(&id);
        Ok(())
    }
}

impl CommandRepository for InMemoryStorage {
    async fn create_command(&self, command: Command) -> Result<Command, GatewayError> {
        self.store
            .lock()
            .unwrap()
            .commands
            .insert(command.id, command.clone());
        Ok(command)
    }

    async fn get_command(&self, id: CommandId) -> Result<Option<Command>, GatewayError> {
        Ok(self.store.lock().unwrap().commands.get(&id).cloned())
    }

    async fn find_command(
        &self,
        device_id: DeviceId,
        action: &str,
        transport: TransportKind,
    ) -> Result<Option<Command>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .commands
            .values()
            .find(|c| c.device_id == device_id && c.action == action && c.transport == transport)
            .cloned())
    }

    async fn delete_command(&self, id: CommandId) -> Result<(), GatewayError> {
        self.store.lock().unwrap().commands.remove(&id);
        Ok(())
    }
}

impl EventRepository for InMemoryStorage {
    async fn create_event(&self, event: Event) -> Result<Event, GatewayError> {
        self.store.lock().unwrap().events.push(event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store.events.iter().find(|e| e.id == id).cloned())
    }

    async fn events_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<Event>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .events
            .iter()
            .filter(|e| e.connection_id == connection_id)
            .cloned()
            .collect())
    }

    async fn events_for_topic(
        &self,
        connection_id: ConnectionId,
        topic: &str,
    ) -> Result<Vec<Event>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .events
            .iter()
            .filter(|e| e.connection_id == connection_id && e.topic == topic)
            .cloned()
            .collect())
    }

    async fn events_for_payload(
        &self,
        connection_id: ConnectionId,
        topic: &str,
        payload: &str,
    ) -> Result<Vec<Event>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .events
            .iter()
            .filter(|e| {
                e.connection_id == connection_id
                    && e.topic == topic
                    && e.payload.as_deref() == Some(payload)
            })
            .cloned()
            .collect())
    }

    async fn events_for_device(&self, device_id: DeviceId) -> Result<Vec<Event>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .events
            .iter()
            .filter(|e| e.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn delete_event(&self, id: EventId) -> Result<(), GatewayError> {
        self.store.lock().unwrap().events.retain(|e| e.id != id);
        Ok(())
    }
}

impl ScriptRepository for InMemoryStorage {
    async fn create_script(&self, script: Script) -> Result<Script, GatewayError> {
        self.store
            .lock()
            .unwrap()
            .scripts
            .insert(script.id, script.clone());
        Ok(script)
    }

    async fn list_scripts(&self) -> Result<Vec<Script>, GatewayError> {
        Ok(self.store.lock().unwrap().scripts.values().cloned().collect())
    }

    async fn scripts_for_trigger(
        &self,
        trigger: ScriptTrigger,
    ) -> Result<Vec<Script>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .scripts
            .values()
            .filter(|s| s.trigger == trigger)
            .cloned()
            .collect())
    }
}

impl TimerRepository for InMemoryStorage {
    async fn create_timer(&self, timer: Timer) -> Result<Timer, GatewayError> {
        self.store
            .lock()
            .unwrap()
            .timers
            .insert(timer.id, timer.clone());
        Ok(timer)
    }

    async fn get_timer(&self, id: TimerId) -> Result<Option<Timer>, GatewayError> {
        Ok(self.store.lock().unwrap().timers.get(&id).cloned())
    }

    async fn list_timers(&self) -> Result<Vec<Timer>, GatewayError> {
        Ok(self.store.lock().unwrap().timers.values().cloned().collect())
    }

    async fn list_boot_timers(&self) -> Result<Vec<Timer>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store.timers.values().filter(|t| t.boot_init).cloned().collect())
    }

    async fn delete_timer(&self, id: TimerId) -> Result<(), GatewayError> {
        self.store.lock().unwrap().timers.remove(&id);
        Ok(())
    }
}

impl LogRepository for InMemoryStorage {
    async fn append_log(&self, message: LogMessage) -> Result<(), GatewayError> {
        self.store.lock().unwrap().logs.push(message);
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogMessage>, GatewayError> {
        let store = self.store.lock().unwrap();
        Ok(store.logs.iter().rev().take(limit).cloned().collect())
    }
}

// ── MQTT client ────────────────────────────────────────────────────

pub struct FakeClient {
    pub hooks: ClientHooks,
    subscriptions: SubscriptionSet,
    subscribe_calls: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, String)>>,
    connected: AtomicBool,
    fail_publish: bool,
}

impl FakeClient {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscribe_calls(&self) -> Vec<String> {
        self.subscribe_calls.lock().unwrap().clone()
    }
}

impl MqttClient for FakeClient {
    async fn connect(&self) -> Result<(), TransportError> {
        self.hooks.connecting();
        self.hooks.connected();
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.hooks.stopped();
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if self.fail_publish {
            return Err(TransportError::PublishFailed("rejected".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if self.subscriptions.insert(topic) {
            self.subscribe_calls.lock().unwrap().push(topic.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.remove(topic);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct FakeClientFactory {
    pub fail_publish: bool,
    pub created: Arc<AtomicUsize>,
}

impl FakeClientFactory {
    pub fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }
}

impl MqttClientFactory for FakeClientFactory {
    type Client = FakeClient;

    fn create(
        &self,
        _connection: &Connection,
        hooks: ClientHooks,
    ) -> Result<FakeClient, GatewayError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeClient {
            hooks,
            subscriptions: SubscriptionSet::default(),
            subscribe_calls: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            fail_publish: self.fail_publish,
        })
    }
}

// ── Broker backend ─────────────────────────────────────────────────

#[derive(Default)]
struct BrokerState {
    authenticator: Option<Arc<dyn Authenticator>>,
    events: Option<mpsc::UnboundedSender<BrokerEvent>>,
    published: Vec<(String, String)>,
    starts: usize,
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    pub fn emit(&self, event: BrokerEvent) {
        let state = self.state.lock().unwrap();
        state.events.as_ref().unwrap().send(event).unwrap();
    }

    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        let auth = self.state.lock().unwrap().authenticator.clone().unwrap();
        auth.authenticate(username, password.as_bytes())
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }
}

impl BrokerBackend for FakeBroker {
    fn start(
        &self,
        authenticator: Arc<dyn Authenticator>,
        events: mpsc::UnboundedSender<BrokerEvent>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.authenticator = Some(authenticator);
        state.events = Some(events);
        state.starts += 1;
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().unwrap().events = None;
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        self.state
            .lock()
            .unwrap()
            .published
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

// ── SMS modem ──────────────────────────────────────────────────────

#[derive(Default)]
struct ModemState {
    registered: Option<mpsc::Sender<Inbound>>,
    sent: Vec<(String, String, CommandId)>,
}

#[derive(Clone)]
pub struct FakeModem {
    state: Arc<Mutex<ModemState>>,
    permission: bool,
    fail_send: bool,
}

impl Default for FakeModem {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            permission: true,
            fail_send: false,
        }
    }
}

impl FakeModem {
    /// A modem the user never granted SMS access to.
    pub fn without_permission() -> Self {
        Self {
            permission: false,
            ..Self::default()
        }
    }

    /// A modem whose every send fails immediately.
    pub fn failing() -> Self {
        Self {
            fail_send: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String, CommandId)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_ids(&self) -> Vec<CommandId> {
        self.sent().into_iter().map(|(_, _, id)| id).collect()
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().unwrap().registered.is_some()
    }
}

impl SmsModem for FakeModem {
    fn has_permission(&self) -> bool {
        self.permission
    }

    fn register(&self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError> {
        self.state.lock().unwrap().registered = Some(inbound);
        Ok(())
    }

    fn unregister(&self) {
        self.state.lock().unwrap().registered = None;
    }

    async fn send(
        &self,
        number: &str,
        body: &str,
        receipt: CommandId,
    ) -> Result<(), TransportError> {
        if self.fail_send {
            return Err(TransportError::PublishFailed("no signal".to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .sent
            .push((number.to_string(), body.to_string(), receipt));
        Ok(())
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

pub fn remote_connection(address: &str) -> Connection {
    Connection::builder()
        .name(address)
        .address(address)
        .build()
        .unwrap()
}

pub fn local_connection(username: &str, password: &str) -> Connection {
    Connection::builder()
        .name(username)
        .credentials(username, password)
        .connection_type(ConnectionType::LocalMqtt)
        .build()
        .unwrap()
}

pub fn sms_connection(number: &str, expired_time_ms: u64) -> Connection {
    Connection::builder()
        .name(number)
        .address(number)
        .expired_time_ms(expired_time_ms)
        .connection_type(ConnectionType::Sms)
        .build()
        .unwrap()
}

pub fn device(name: &str) -> Device {
    Device::builder().name(name).build().unwrap()
}

pub fn command(
    device: &Device,
    connection: &Connection,
    action: &str,
    transport: TransportKind,
    mode: ExecutionMode,
) -> Command {
    Command {
        id: CommandId::new(),
        action: action.to_string(),
        transport,
        connection_id: connection.id,
        device_id: device.id,
        topic: "lamp/set".to_string(),
        payload: "{value}".to_string(),
        data_field: None,
        is_json: false,
        mode,
    }
}

pub fn event(
    device: &Device,
    connection: &Connection,
    topic: &str,
    payload: Option<&str>,
) -> Event {
    Event {
        id: EventId::new(),
        event_type: "on".to_string(),
        connection_id: connection.id,
        device_id: device.id,
        topic: topic.to_string(),
        payload: payload.map(str::to_string),
        is_json: false,
        data_field: None,
    }
}
