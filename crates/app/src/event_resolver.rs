//! Event resolution: turns inbound messages into event firings.
//!
//! MQTT payloads that parse as a JSON object are matched against JSON event
//! templates; anything else is matched literally. Topic-level "set" catches
//! match every payload on their topic. Each firing is raised in order: a
//! notification, the device value update and the firing itself.

use serde_json::Value;

use homegate_domain::command::{Command, ExecutionMode};
use homegate_domain::connection::{Connection, ConnectionType, parse_local_source_address};
use homegate_domain::device::Provenance;
use homegate_domain::error::GatewayError;
use homegate_domain::event::{Event, EventFiring};
use homegate_domain::id::ConnectionId;
use homegate_domain::log_message::LogMessage;
use homegate_domain::notification::Notification;
use homegate_domain::payload;

use crate::notification_sink::NotificationSink;
use crate::ports::Storage;
use crate::sms_parser::{SmsFields, SmsParser};

pub struct EventResolver<S> {
    storage: S,
    sink: NotificationSink,
}

impl<S: Storage> EventResolver<S> {
    pub fn new(storage: S, sink: NotificationSink) -> Self {
        Self { storage, sink }
    }

    /// Resolve a publish received from `address` (a broker address or a
    /// local source address).
    ///
    /// # Errors
    ///
    /// Returns a storage error. An unknown address resolves to nothing.
    #[tracing::instrument(skip(self, payload))]
    pub async fn resolve_mqtt(
        &self,
        address: &str,
        topic: &str,
        payload: &str,
    ) -> Result<Vec<EventFiring>, GatewayError> {
        let connection = self.mqtt_connection(address).await?;
        self.audit(LogMessage::inbound(address, topic, payload), connection.as_ref())
            .await;
        let Some(connection) = connection else {
            tracing::debug!("no connection for address");
            return Ok(Vec::new());
        };

        let firings = match serde_json::from_str::<Value>(payload) {
            Ok(actual) if actual.is_object() => {
                self.match_json(connection.id, topic, payload, &actual).await?
            }
            _ => self.match_plain(connection.id, topic, payload).await?,
        };
        self.raise_all(&firings).await;
        Ok(firings)
    }

    /// Resolve a text message received from `number`.
    ///
    /// # Errors
    ///
    /// Returns a storage error. An unknown number resolves to nothing.
    #[tracing::instrument(skip(self, message))]
    pub async fn resolve_sms(
        &self,
        number: &str,
        message: &str,
    ) -> Result<Vec<EventFiring>, GatewayError> {
        let connection = self
            .storage
            .find_connection_by_address(number, ConnectionType::Sms)
            .await?;
        self.audit(LogMessage::inbound(number, "", message), connection.as_ref())
            .await;
        let Some(connection) = connection else {
            tracing::debug!("no sms connection for number");
            return Ok(Vec::new());
        };

        let firings = match connection.parser.as_deref() {
            Some(grammar) => match SmsParser::compile(grammar) {
                Ok(parser) => match parser.parse(message) {
                    Some(fields) => self.match_fields(connection.id, fields).await?,
                    None => Vec::new(),
                },
                Err(err) => {
                    tracing::warn!(error = %err, "invalid sms parser");
                    Vec::new()
                }
            },
            None => {
                let body = message.trim();
                self.storage
                    .events_for_connection(connection.id)
                    .await?
                    .into_iter()
                    .filter(|event| event.payload.as_deref() == Some(body))
                    .map(|event| EventFiring::new(event, Some(body.to_string())))
                    .collect()
            }
        };
        self.raise_all(&firings).await;
        Ok(firings)
    }

    /// Treat `message` as the answer to a pending synchronous `command`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(
        skip(self, command, message),
        fields(command_id = %command.id, mode = %command.mode)
    )]
    pub async fn process_answer(
        &self,
        command: &Command,
        message: &str,
    ) -> Result<Vec<EventFiring>, GatewayError> {
        let firings = match command.mode {
            ExecutionMode::Confirm => {
                self.storage
                    .update_device_value(
                        command.device_id,
                        message,
                        Provenance::Command(command.id),
                    )
                    .await?;
                Vec::new()
            }
            ExecutionMode::Match => {
                let actual = serde_json::from_str::<Value>(message)
                    .ok()
                    .filter(Value::is_object);
                self.storage
                    .events_for_device(command.device_id)
                    .await?
                    .into_iter()
                    .filter_map(|event| match_answer(event, message, actual.as_ref()))
                    .collect()
            }
            ExecutionMode::Set => {
                let event =
                    Event::synthetic_set(command.connection_id, command.device_id, &command.topic);
                vec![EventFiring::new(event, Some(message.to_string()))]
            }
            ExecutionMode::Async | ExecutionMode::Ignore => {
                tracing::debug!("answer ignored");
                Vec::new()
            }
        };
        self.raise_all(&firings).await;
        Ok(firings)
    }

    async fn mqtt_connection(&self, address: &str) -> Result<Option<Connection>, GatewayError> {
        match parse_local_source_address(address) {
            Some(username) => self.storage.find_local_connection(username).await,
            None => {
                self.storage
                    .find_connection_by_address(address, ConnectionType::Mqtt)
                    .await
            }
        }
    }

    async fn match_json(
        &self,
        connection_id: ConnectionId,
        topic: &str,
        raw: &str,
        actual: &Value,
    ) -> Result<Vec<EventFiring>, GatewayError> {
        let events = self.storage.events_for_topic(connection_id, topic).await?;
        Ok(events
            .into_iter()
            .filter_map(|event| {
                if event.is_set_catch() {
                    let value = event
                        .data_field
                        .as_deref()
                        .and_then(|field| payload::carried_value(actual, field))
                        .unwrap_or_else(|| raw.to_string());
                    Some(EventFiring::new(event, Some(value)))
                } else if event.is_json {
                    event.match_json(actual)
                } else {
                    None
                }
            })
            .collect())
    }

    async fn match_plain(
        &self,
        connection_id: ConnectionId,
        topic: &str,
        payload: &str,
    ) -> Result<Vec<EventFiring>, GatewayError> {
        let literal = self
            .storage
            .events_for_payload(connection_id, topic, payload)
            .await?
            .into_iter()
            .filter(|event| !event.is_json);
        let catches = self
            .storage
            .events_for_topic(connection_id, topic)
            .await?
            .into_iter()
            .filter(Event::is_set_catch);
        Ok(literal
            .chain(catches)
            .map(|event| EventFiring::new(event, Some(payload.to_string())))
            .collect())
    }

    async fn match_fields(
        &self,
        connection_id: ConnectionId,
        fields: SmsFields,
    ) -> Result<Vec<EventFiring>, GatewayError> {
        let Some(address) = fields.address else {
            return Ok(Vec::new());
        };
        match (fields.payload, fields.value) {
            (Some(payload), value) => {
                let carried = value.unwrap_or_else(|| payload.clone());
                Ok(self
                    .storage
                    .events_for_payload(connection_id, &address, &payload)
                    .await?
                    .into_iter()
                    .map(|event| EventFiring::new(event, Some(carried.clone())))
                    .collect())
            }
            (None, Some(value)) => Ok(self
                .storage
                .events_for_topic(connection_id, &address)
                .await?
                .into_iter()
                .filter(Event::is_set_catch)
                .map(|event| EventFiring::new(event, Some(value.clone())))
                .collect()),
            (None, None) => Ok(Vec::new()),
        }
    }

    async fn raise_all(&self, firings: &[EventFiring]) {
        for firing in firings {
            self.raise(firing).await;
        }
    }

    async fn raise(&self, firing: &EventFiring) {
        let event = &firing.event;
        let device = match self.storage.get_device(event.device_id).await {
            Ok(Some(device)) => device.name,
            Ok(None) => event.device_id.to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "device lookup failed");
                event.device_id.to_string()
            }
        };
        self.sink.notify(Notification::event(&device, &event.event_type));

        if let Some(value) = firing.value.as_deref() {
            if let Err(err) = self
                .storage
                .update_device_value(event.device_id, value, Provenance::Event(event.id))
                .await
            {
                tracing::warn!(error = %err, "device update failed");
            }
        }
        self.sink.fire(firing.clone());
    }

    async fn audit(&self, message: LogMessage, connection: Option<&Connection>) {
        let message = match connection {
            Some(connection) => message.with_connection(connection.id),
            None => message,
        };
        if let Err(err) = self.storage.append_log(message).await {
            tracing::warn!(error = %err, "audit log append failed");
        }
    }
}

fn match_answer(event: Event, message: &str, actual: Option<&Value>) -> Option<EventFiring> {
    if event.is_set_catch() {
        return Some(EventFiring::new(event, Some(message.to_string())));
    }
    match actual {
        Some(actual) if event.is_json => event.match_json(actual),
        _ if event.payload.as_deref() == Some(message.trim()) => {
            Some(EventFiring::new(event, Some(message.to_string())))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use homegate_domain::command::TransportKind;
    use homegate_domain::device::Device;

    use super::*;
    use crate::ports::DeviceRepository;
    use crate::testing::{
        InMemoryStorage, command, device, event, local_connection, remote_connection,
        sms_connection,
    };

    fn resolver(storage: &InMemoryStorage) -> (EventResolver<InMemoryStorage>, NotificationSink) {
        let sink = NotificationSink::new(16);
        (EventResolver::new(storage.clone(), sink.clone()), sink)
    }

    fn json_event(device: &Device, connection: &Connection, template: &str, field: &str) -> Event {
        Event {
            is_json: true,
            data_field: Some(field.to_string()),
            ..event(device, connection, "t", Some(template))
        }
    }

    #[tokio::test]
    async fn should_resolve_json_event_and_update_device_with_carried_value() {
        let conn = remote_connection("broker.local");
        let lamp = device("Lamp");
        let ev = json_event(&lamp, &conn, r#"{"state":"on","id":"*"}"#, "id");
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&lamp)
            .with_event(&ev);
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver
            .resolve_mqtt("broker.local", "t", r#"{"state":"on","id":"x"}"#)
            .await
            .unwrap();

        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].event.id, ev.id);
        assert_eq!(firings[0].value.as_deref(), Some("x"));
        assert_eq!(storage.device_value(lamp.id).as_deref(), Some("x"));
        assert_eq!(
            storage.device_provenance(lamp.id).await.unwrap(),
            Some(Provenance::Event(ev.id))
        );
    }

    #[tokio::test]
    async fn should_not_resolve_json_event_when_other_field_differs() {
        let conn = remote_connection("broker.local");
        let lamp = device("Lamp");
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&lamp)
            .with_event(&json_event(&lamp, &conn, r#"{"state":"on","id":"*"}"#, "id"));
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver
            .resolve_mqtt("broker.local", "t", r#"{"state":"off","id":"x"}"#)
            .await
            .unwrap();

        assert!(firings.is_empty());
        assert_eq!(storage.device_value(lamp.id).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn should_union_literal_events_with_set_catches() {
        let conn = remote_connection("broker.local");
        let lamp = device("Lamp");
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&lamp)
            .with_event(&event(&lamp, &conn, "t", Some("on")))
            .with_event(&event(&lamp, &conn, "t", Some("off")))
            .with_event(&event(&lamp, &conn, "t", None));
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver.resolve_mqtt("broker.local", "t", "on").await.unwrap();

        assert_eq!(firings.len(), 2);
        assert!(firings.iter().all(|f| f.value.as_deref() == Some("on")));
    }

    #[tokio::test]
    async fn should_fall_back_to_literal_match_for_non_object_json() {
        let conn = remote_connection("broker.local");
        let lamp = device("Lamp");
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&lamp)
            .with_event(&event(&lamp, &conn, "temp", Some("21")));
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver.resolve_mqtt("broker.local", "temp", "21").await.unwrap();

        assert_eq!(firings.len(), 1);
    }

    #[tokio::test]
    async fn should_carry_json_field_on_set_catch() {
        let conn = remote_connection("broker.local");
        let sensor = device("Sensor");
        let catch = Event {
            data_field: Some("temperature".to_string()),
            ..event(&sensor, &conn, "t", None)
        };
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&sensor)
            .with_event(&catch);
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver
            .resolve_mqtt("broker.local", "t", r#"{"temperature":19.5}"#)
            .await
            .unwrap();

        assert_eq!(firings[0].value.as_deref(), Some("19.5"));
    }

    #[tokio::test]
    async fn should_resolve_nothing_for_unknown_address_but_still_audit() {
        let storage = InMemoryStorage::default();
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver.resolve_mqtt("nowhere", "t", "on").await.unwrap();

        assert!(firings.is_empty());
        assert_eq!(storage.logs().len(), 1);
        assert_eq!(storage.logs()[0].connection_id, None);
    }

    #[tokio::test]
    async fn should_resolve_local_broker_source_address() {
        let conn = local_connection("kitchen", "pw");
        let lamp = device("Lamp");
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&lamp)
            .with_event(&event(&lamp, &conn, "t", Some("on")));
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver.resolve_mqtt("127.0.0.1:kitchen", "t", "on").await.unwrap();
        assert_eq!(firings.len(), 1);
        let firings = resolver.resolve_mqtt("127.0.0.1:garage", "t", "on").await.unwrap();
        assert!(firings.is_empty());
    }

    #[tokio::test]
    async fn should_notify_before_firing() {
        let conn = remote_connection("broker.local");
        let lamp = device("Lamp");
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&lamp)
            .with_event(&event(&lamp, &conn, "t", Some("on")));
        let (resolver, sink) = resolver(&storage);
        let mut notifications = sink.subscribe_notifications();
        let mut firings = sink.subscribe_firings();

        resolver.resolve_mqtt("broker.local", "t", "on").await.unwrap();

        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.title, "Lamp");
        assert_eq!(notification.content, "on");
        assert_eq!(firings.recv().await.unwrap().value.as_deref(), Some("on"));
    }

    #[tokio::test]
    async fn should_resolve_sms_with_parser_grammar() {
        let conn = Connection {
            parser: Some("{address}:{payload}".to_string()),
            ..sms_connection("+3360000", 60_000)
        };
        let door = device("Door");
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&door)
            .with_event(&event(&door, &conn, "garage", Some("open")));
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver.resolve_sms("+3360000", "garage:open").await.unwrap();

        assert_eq!(firings.len(), 1);
        assert_eq!(storage.device_value(door.id).as_deref(), Some("open"));
    }

    #[tokio::test]
    async fn should_resolve_sms_value_through_set_catch() {
        let conn = Connection {
            parser: Some("{address}={value}".to_string()),
            ..sms_connection("+3360000", 60_000)
        };
        let boiler = device("Boiler");
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&boiler)
            .with_event(&event(&boiler, &conn, "boiler", None));
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver.resolve_sms("+3360000", "boiler=55").await.unwrap();

        assert_eq!(firings[0].value.as_deref(), Some("55"));
        assert_eq!(storage.device_value(boiler.id).as_deref(), Some("55"));
    }

    #[tokio::test]
    async fn should_resolve_sms_literally_without_parser() {
        let conn = sms_connection("+3360000", 60_000);
        let alarm = device("Alarm");
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&alarm)
            .with_event(&event(&alarm, &conn, "", Some("ALARM ON")));
        let (resolver, _sink) = resolver(&storage);

        assert_eq!(resolver.resolve_sms("+3360000", "ALARM ON\n").await.unwrap().len(), 1);
        assert!(resolver.resolve_sms("+3360000", "ALARM OFF").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_confirm_answer_into_device_value() {
        let conn = sms_connection("+3360000", 60_000);
        let lamp = device("Lamp");
        let cmd = command(&lamp, &conn, "status", TransportKind::Sms, ExecutionMode::Confirm);
        let storage = InMemoryStorage::default().with_connection(&conn).with_device(&lamp);
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver.process_answer(&cmd, "ON").await.unwrap();

        assert!(firings.is_empty());
        assert_eq!(storage.device_value(lamp.id).as_deref(), Some("ON"));
        assert_eq!(
            storage.device_provenance(lamp.id).await.unwrap(),
            Some(Provenance::Command(cmd.id))
        );
    }

    #[tokio::test]
    async fn should_match_answer_against_device_events() {
        let conn = sms_connection("+3360000", 60_000);
        let lamp = device("Lamp");
        let other = device("Other");
        let cmd = command(&lamp, &conn, "status", TransportKind::Sms, ExecutionMode::Match);
        let storage = InMemoryStorage::default()
            .with_connection(&conn)
            .with_device(&lamp)
            .with_event(&event(&lamp, &conn, "", Some("ON")))
            .with_event(&event(&lamp, &conn, "", Some("OFF")))
            .with_event(&event(&other, &conn, "", Some("ON")));
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver.process_answer(&cmd, "ON").await.unwrap();

        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].event.device_id, lamp.id);
    }

    #[tokio::test]
    async fn should_synthesize_set_event_for_set_answer() {
        let conn = sms_connection("+3360000", 60_000);
        let lamp = device("Lamp");
        let cmd = command(&lamp, &conn, "level", TransportKind::Sms, ExecutionMode::Set);
        let storage = InMemoryStorage::default().with_connection(&conn).with_device(&lamp);
        let (resolver, _sink) = resolver(&storage);

        let firings = resolver.process_answer(&cmd, "42").await.unwrap();

        assert_eq!(firings[0].event.event_type, "set");
        assert_eq!(storage.device_value(lamp.id).as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn should_ignore_answer_for_ignore_mode() {
        let conn = sms_connection("+3360000", 60_000);
        let lamp = device("Lamp");
        let cmd = command(&lamp, &conn, "on", TransportKind::Sms, ExecutionMode::Ignore);
        let storage = InMemoryStorage::default().with_device(&lamp);
        let (resolver, _sink) = resolver(&storage);

        assert!(resolver.process_answer(&cmd, "OK").await.unwrap().is_empty());
        assert_eq!(storage.device_value(lamp.id).as_deref(), Some(""));
    }
}
