//! Command dispatch: turns a device action into a wire message.
//!
//! Every action resolves to exactly one [`Command`]: the MQTT variant when one
//! exists, the SMS variant otherwise. Failures never propagate as errors;
//! they come back as [`DispatchOutcome::Failed`] and raise a notification
//! carrying a [`RetryRequest`] for [`CommandDispatcher::retry`].

use std::sync::Arc;

use homegate_domain::command::{Command, TransportKind};
use homegate_domain::connection::{Connection, ConnectionType};
use homegate_domain::device::{Device, Provenance};
use homegate_domain::error::{GatewayError, TransportError};
use homegate_domain::id::{CommandId, DeviceId};
use homegate_domain::log_message::LogMessage;
use homegate_domain::notification::{Notification, RetryRequest};
use homegate_domain::payload::apply_value;

use crate::connection_registry::ConnectionRegistry;
use crate::local_broker::LocalBroker;
use crate::notification_sink::NotificationSink;
use crate::ports::{BrokerBackend, MqttClient, MqttClientFactory, SmsModem, Storage};
use crate::sms_gateway::{SmsGateway, SmsSendOutcome};

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Published, or handed to the modem.
    Sent,
    /// Queued behind a pending synchronous SMS to the same number.
    Queued,
    /// The transport refused; a notification with a retry request was raised.
    Failed(TransportError),
    /// Nothing to do: the device, command or connection no longer exists.
    Skipped,
}

/// Where a command is about to go.
enum TransportHandle<C> {
    Remote(Arc<C>),
    Local(String),
    Sms(Connection),
}

pub struct CommandDispatcher<S, F: MqttClientFactory, B, M> {
    storage: S,
    registry: Arc<ConnectionRegistry<S, F>>,
    broker: Arc<LocalBroker<S, B>>,
    sms: Arc<SmsGateway<S, M>>,
    sink: NotificationSink,
}

impl<S, F, B, M> CommandDispatcher<S, F, B, M>
where
    S: Storage,
    F: MqttClientFactory,
    B: BrokerBackend,
    M: SmsModem,
{
    pub fn new(
        storage: S,
        registry: Arc<ConnectionRegistry<S, F>>,
        broker: Arc<LocalBroker<S, B>>,
        sms: Arc<SmsGateway<S, M>>,
        sink: NotificationSink,
    ) -> Self {
        Self {
            storage,
            registry,
            broker,
            sms,
            sink,
        }
    }

    /// Execute `action` on the device with id `device_id`.
    ///
    /// # Errors
    ///
    /// Returns a storage error. A missing device is [`DispatchOutcome::Skipped`].
    pub async fn execute_by_action(
        &self,
        device_id: DeviceId,
        action: &str,
        value: Option<&str>,
    ) -> Result<DispatchOutcome, GatewayError> {
        let Some(device) = self.storage.get_device(device_id).await? else {
            tracing::debug!(%device_id, "device not found");
            return Ok(DispatchOutcome::Skipped);
        };
        self.execute_by_device_action(&device, action, value).await
    }

    /// Execute `action` on `device`, over MQTT when possible.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(skip(self, device), fields(device_id = %device.id))]
    pub async fn execute_by_device_action(
        &self,
        device: &Device,
        action: &str,
        value: Option<&str>,
    ) -> Result<DispatchOutcome, GatewayError> {
        for transport in [TransportKind::Mqtt, TransportKind::Sms] {
            if let Some(command) = self.storage.find_command(device.id, action, transport).await? {
                return self.execute(device, &command, value).await;
            }
        }
        tracing::debug!("no command configured for action");
        Ok(DispatchOutcome::Skipped)
    }

    /// Re-attempt a command that failed.
    ///
    /// An MQTT command retried with `mqtt == false` falls back to the SMS
    /// command of the same device and action.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn retry(
        &self,
        command_id: CommandId,
        mqtt: bool,
        value: Option<&str>,
    ) -> Result<DispatchOutcome, GatewayError> {
        let Some(command) = self.storage.get_command(command_id).await? else {
            tracing::debug!("command not found");
            return Ok(DispatchOutcome::Skipped);
        };
        let command = match command.transport {
            TransportKind::Mqtt if mqtt => command,
            TransportKind::Sms => command,
            TransportKind::Mqtt => {
                let fallback = self
                    .storage
                    .find_command(command.device_id, &command.action, TransportKind::Sms)
                    .await?;
                let Some(fallback) = fallback else {
                    tracing::debug!("no sms command to fall back to");
                    return Ok(DispatchOutcome::Skipped);
                };
                fallback
            }
        };
        let Some(device) = self.storage.get_device(command.device_id).await? else {
            return Ok(DispatchOutcome::Skipped);
        };
        self.execute(&device, &command, value).await
    }

    async fn execute(
        &self,
        device: &Device,
        command: &Command,
        value: Option<&str>,
    ) -> Result<DispatchOutcome, GatewayError> {
        let Some(connection) = self.storage.get_connection(command.connection_id).await? else {
            tracing::debug!(command_id = %command.id, "connection not found");
            return Ok(DispatchOutcome::Skipped);
        };
        let payload = match command.transport {
            TransportKind::Mqtt => command.render(value),
            TransportKind::Sms => apply_value(&command.payload, value),
        };

        let log = LogMessage::outbound(&connection.source_address(), &command.topic, &payload)
            .with_connection(connection.id);
        if let Err(err) = self.storage.append_log(log).await {
            tracing::warn!(error = %err, "audit log append failed");
        }

        let sent = match self.handle(command, connection) {
            Ok(handle) => self.send(handle, command, &payload, value).await,
            Err(err) => Err(err),
        };
        match sent {
            Ok(SmsSendOutcome::Queued) => Ok(DispatchOutcome::Queued),
            Ok(SmsSendOutcome::Sent) => {
                if command.transport == TransportKind::Mqtt {
                    let confirmed = command.confirmed_value(value);
                    self.storage
                        .update_device_value(device.id, &confirmed, Provenance::Command(command.id))
                        .await?;
                }
                tracing::debug!(command_id = %command.id, "command sent");
                Ok(DispatchOutcome::Sent)
            }
            Err(err) => {
                tracing::warn!(command_id = %command.id, error = %err, "command not delivered");
                let retry = RetryRequest {
                    command_id: command.id,
                    mqtt: command.transport == TransportKind::Mqtt,
                    value: value.map(str::to_string),
                };
                self.sink
                    .notify(Notification::not_delivered(&device.name, &command.action, retry));
                Ok(DispatchOutcome::Failed(err))
            }
        }
    }

    fn handle(
        &self,
        command: &Command,
        connection: Connection,
    ) -> Result<TransportHandle<F::Client>, TransportError> {
        match (command.transport, connection.connection_type) {
            (TransportKind::Mqtt, ConnectionType::Mqtt) => self
                .registry
                .get(&connection.address)
                .map(TransportHandle::Remote)
                .ok_or(TransportError::Unavailable(connection.address)),
            (TransportKind::Mqtt, ConnectionType::LocalMqtt) => {
                let username = connection.key().to_string();
                if self.broker.has(&username) {
                    Ok(TransportHandle::Local(username))
                } else {
                    Err(TransportError::Unavailable(username))
                }
            }
            (TransportKind::Sms, ConnectionType::Sms) => {
                if self.sms.is_running() {
                    Ok(TransportHandle::Sms(connection))
                } else {
                    Err(TransportError::NotRunning)
                }
            }
            (transport, kind) => Err(TransportError::Unavailable(format!(
                "{transport} command over {kind} connection"
            ))),
        }
    }

    async fn send(
        &self,
        handle: TransportHandle<F::Client>,
        command: &Command,
        payload: &str,
        value: Option<&str>,
    ) -> Result<SmsSendOutcome, TransportError> {
        match handle {
            TransportHandle::Remote(client) => client
                .publish(&command.topic, payload)
                .await
                .map(|()| SmsSendOutcome::Sent),
            TransportHandle::Local(username) => {
                tracing::trace!(%username, "publishing to local session");
                self.broker
                    .publish(&command.topic, payload)
                    .map(|()| SmsSendOutcome::Sent)
            }
            TransportHandle::Sms(connection) => {
                self.sms.send(command, &connection, payload, value).await
            }
        }
    }
}
