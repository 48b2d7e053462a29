//! SMS gateway: ordered sends, delivery receipts and expiry.
//!
//! Every send is tracked in `sent` until its receipt arrives or its deadline
//! passes. Synchronous commands are additionally queued per destination
//! number and only the head of a queue is ever in flight. Once a synchronous
//! send is delivered it waits for an answer from the same number, which the
//! router claims through [`SmsGateway::take_answer`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use homegate_domain::command::Command;
use homegate_domain::connection::{Connection, ConnectionType};
use homegate_domain::device::Provenance;
use homegate_domain::error::{GatewayError, TransportError};
use homegate_domain::id::CommandId;
use homegate_domain::notification::{Notification, RetryRequest};
use homegate_domain::time::{Timestamp, deadline_after, now};

use crate::inbound::Inbound;
use crate::notification_sink::NotificationSink;
use crate::ports::{SmsModem, Storage};
use crate::sync::lock;

/// Sweep period when no SMS connection is configured.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsSendOutcome {
    /// Handed to the modem.
    Sent,
    /// Waiting behind an earlier synchronous send to the same number.
    Queued,
}

/// A delivered synchronous command claimed as the target of an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAnswer {
    pub command: Command,
    pub value: Option<String>,
    deadline: Timestamp,
}

#[derive(Debug, Clone)]
struct PendingSend {
    command: Command,
    number: String,
    value: Option<String>,
    ttl: Duration,
    deadline: Timestamp,
}

#[derive(Debug, Clone)]
struct QueuedSend {
    command: Command,
    body: String,
    value: Option<String>,
    ttl: Duration,
    /// Set once the send is handed to the modem.
    deadline: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct SmsState {
    sent: HashMap<CommandId, PendingSend>,
    queues: HashMap<String, VecDeque<QueuedSend>>,
    awaiting: HashMap<String, PendingAnswer>,
}

impl SmsState {
    /// Mark the queue head of `number` as in flight, unless it already is.
    fn start_head(&mut self, number: &str, now: Timestamp) -> Option<(CommandId, String)> {
        let head = self.queues.get_mut(number)?.front_mut()?;
        if head.deadline.is_some() {
            return None;
        }
        let deadline = deadline_after(now, head.ttl);
        head.deadline = Some(deadline);
        let started = (head.command.id, head.body.clone());
        let pending = PendingSend {
            command: head.command.clone(),
            number: number.to_string(),
            value: head.value.clone(),
            ttl: head.ttl,
            deadline,
        };
        self.sent.insert(pending.command.id, pending);
        Some(started)
    }

    fn pop_head(&mut self, number: &str) -> Option<QueuedSend> {
        let queue = self.queues.get_mut(number)?;
        let head = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(number);
        }
        head
    }

    fn is_head(&self, number: &str, id: CommandId) -> bool {
        self.queues
            .get(number)
            .and_then(VecDeque::front)
            .is_some_and(|head| head.command.id == id)
    }

    /// Forget a send the modem refused. Returns it for the failure notice.
    fn fail(&mut self, number: &str, id: CommandId) -> Option<PendingSend> {
        if self.is_head(number, id) {
            self.pop_head(number);
        }
        self.sent.remove(&id)
    }

    /// Drop everything whose deadline has passed.
    ///
    /// Returns how many sends expired and which queues lost their head.
    fn expire(&mut self, now: Timestamp) -> (usize, Vec<String>) {
        let before = self.sent.len();
        self.sent.retain(|_, pending| pending.deadline >= now);
        let expired = before - self.sent.len();

        self.awaiting.retain(|_, answer| answer.deadline >= now);

        let stale: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, queue)| {
                queue
                    .front()
                    .and_then(|head| head.deadline)
                    .is_some_and(|deadline| deadline < now)
            })
            .map(|(number, _)| number.clone())
            .collect();
        for number in &stale {
            self.pop_head(number);
        }
        (expired, stale)
    }
}

pub struct SmsGateway<S, M> {
    storage: S,
    modem: M,
    sink: NotificationSink,
    inbound: mpsc::Sender<Inbound>,
    state: Mutex<SmsState>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl<S, M> SmsGateway<S, M>
where
    S: Storage,
    M: SmsModem,
{
    pub fn new(
        storage: S,
        modem: M,
        sink: NotificationSink,
        inbound: mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            storage,
            modem,
            sink,
            inbound,
            state: Mutex::new(SmsState::default()),
            sweeper: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Register the modem receivers and start the expiry sweep.
    ///
    /// No-op when already running.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PermissionDenied`] when the host refused
    /// SMS permission, or the modem's error when registration fails.
    #[tracing::instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        if self.is_running() {
            return Ok(());
        }
        if !self.modem.has_permission() {
            return Err(TransportError::PermissionDenied.into());
        }
        let period = self.sweep_interval().await?;
        self.modem.register(self.inbound.clone())?;

        let gateway = Arc::downgrade(self);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(gateway) = gateway.upgrade() else {
                    break;
                };
                let expired = gateway.sweep(now()).await;
                if expired > 0 {
                    tracing::debug!(expired, "expired pending sms");
                }
            }
        });
        *lock(&self.sweeper) = Some(sweeper);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(?period, "sms gateway started");
        Ok(())
    }

    /// Unregister the modem receivers and drop all runtime state.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.modem.unregister();
        if let Some(sweeper) = lock(&self.sweeper).take() {
            sweeper.abort();
        }
        *lock(&self.state) = SmsState::default();
        tracing::info!("sms gateway stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sends still waiting for a receipt.
    #[must_use]
    pub fn pending_sends(&self) -> usize {
        lock(&self.state).sent.len()
    }

    /// Synchronous sends queued for `number`, including the one in flight.
    #[must_use]
    pub fn queued(&self, number: &str) -> usize {
        lock(&self.state).queues.get(number).map_or(0, VecDeque::len)
    }

    /// Send `body` for `command` to the connection's number.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotRunning`] when stopped, or the modem's
    /// error when the immediate send fails.
    #[tracing::instrument(
        skip(self, command, connection, body),
        fields(command_id = %command.id, number = %connection.address)
    )]
    pub async fn send(
        &self,
        command: &Command,
        connection: &Connection,
        body: &str,
        value: Option<&str>,
    ) -> Result<SmsSendOutcome, TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }
        let number = connection.address.as_str();
        let ttl = connection.expired_time();

        if !command.mode.is_sync() {
            let pending = PendingSend {
                command: command.clone(),
                number: number.to_string(),
                value: value.map(str::to_string),
                ttl,
                deadline: deadline_after(now(), ttl),
            };
            lock(&self.state).sent.insert(command.id, pending);
            if let Err(err) = self.modem.send(number, body, command.id).await {
                lock(&self.state).sent.remove(&command.id);
                return Err(err);
            }
            return Ok(SmsSendOutcome::Sent);
        }

        let started = {
            let mut state = lock(&self.state);
            state
                .queues
                .entry(number.to_string())
                .or_default()
                .push_back(QueuedSend {
                    command: command.clone(),
                    body: body.to_string(),
                    value: value.map(str::to_string),
                    ttl,
                    deadline: None,
                });
            state.start_head(number, now())
        };
        let Some((id, body)) = started else {
            tracing::debug!("queued behind pending sync send");
            return Ok(SmsSendOutcome::Queued);
        };
        if id != command.id {
            // an older head was started instead; ours stays queued
            if !self.send_started(number, id, &body).await {
                self.pump(number).await;
            }
            return Ok(SmsSendOutcome::Queued);
        }
        match self.modem.send(number, &body, id).await {
            Ok(()) => Ok(SmsSendOutcome::Sent),
            Err(err) => {
                lock(&self.state).fail(number, id);
                self.pump(number).await;
                Err(err)
            }
        }
    }

    /// Handle a delivery receipt.
    #[tracing::instrument(skip(self))]
    pub async fn delivered(&self, id: CommandId, success: bool) {
        let pending = {
            let mut state = lock(&self.state);
            let Some(pending) = state.sent.remove(&id) else {
                tracing::debug!("receipt for unknown or expired send");
                return;
            };
            if pending.command.mode.is_sync() && state.is_head(&pending.number, id) {
                state.pop_head(&pending.number);
                if success {
                    let answer = PendingAnswer {
                        command: pending.command.clone(),
                        value: pending.value.clone(),
                        deadline: deadline_after(now(), pending.ttl),
                    };
                    state.awaiting.insert(pending.number.clone(), answer);
                }
            }
            pending
        };

        let sync = pending.command.mode.is_sync();
        if !success {
            tracing::warn!(number = %pending.number, "sms not delivered");
            self.notify_failure(&pending).await;
        } else if !sync {
            let value = pending.command.confirmed_value(pending.value.as_deref());
            if let Err(err) = self
                .storage
                .update_device_value(pending.command.device_id, &value, Provenance::Command(id))
                .await
            {
                tracing::warn!(error = %err, "device update failed");
            }
        }
        if sync {
            self.pump(&pending.number).await;
        }
    }

    /// Claim the command an unmatched message from `number` answers.
    ///
    /// A delivered synchronous command is preferred; otherwise the in-flight
    /// queue head is taken and the next queued send starts.
    pub async fn take_answer(&self, number: &str) -> Option<PendingAnswer> {
        let now = now();
        let (answer, advance) = {
            let mut state = lock(&self.state);
            match state.awaiting.remove(number) {
                Some(answer) if answer.deadline >= now => (Some(answer), false),
                _ => {
                    let in_flight = state
                        .queues
                        .get(number)
                        .and_then(VecDeque::front)
                        .and_then(|head| head.deadline)
                        .is_some_and(|deadline| deadline >= now);
                    if in_flight {
                        let answer = state.pop_head(number).map(|head| {
                            state.sent.remove(&head.command.id);
                            PendingAnswer {
                                command: head.command,
                                value: head.value,
                                deadline: now,
                            }
                        });
                        (answer, true)
                    } else {
                        (None, false)
                    }
                }
            }
        };
        if advance {
            self.pump(number).await;
        }
        answer
    }

    /// Expire sends and queue heads whose deadline is before `now`.
    ///
    /// Returns the number of expired sends.
    pub async fn sweep(&self, now: Timestamp) -> usize {
        let (expired, stale) = lock(&self.state).expire(now);
        for number in stale {
            self.pump(&number).await;
        }
        expired
    }

    /// Start queue heads until one is accepted by the modem or the queue drains.
    async fn pump(&self, number: &str) {
        loop {
            let started = lock(&self.state).start_head(number, now());
            let Some((id, body)) = started else {
                return;
            };
            if self.send_started(number, id, &body).await {
                return;
            }
        }
    }

    async fn send_started(&self, number: &str, id: CommandId, body: &str) -> bool {
        match self.modem.send(number, body, id).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%number, error = %err, "queued sms send failed");
                let failed = lock(&self.state).fail(number, id);
                if let Some(pending) = failed {
                    self.notify_failure(&pending).await;
                }
                false
            }
        }
    }

    async fn notify_failure(&self, pending: &PendingSend) {
        let command = &pending.command;
        let device = match self.storage.get_device(command.device_id).await {
            Ok(Some(device)) => device.name,
            _ => command.device_id.to_string(),
        };
        let retry = RetryRequest {
            command_id: command.id,
            mqtt: false,
            value: pending.value.clone(),
        };
        self.sink
            .notify(Notification::not_delivered(&device, &command.action, retry));
    }

    async fn sweep_interval(&self) -> Result<Duration, GatewayError> {
        let connections = self
            .storage
            .list_connections_by_type(ConnectionType::Sms)
            .await?;
        Ok(connections
            .iter()
            .map(Connection::expired_time)
            .min()
            .unwrap_or(DEFAULT_SWEEP_INTERVAL)
            .max(MIN_SWEEP_INTERVAL))
    }
}

#[cfg(test)]
mod tests {
    use homegate_domain::command::{ExecutionMode, TransportKind};

    use super::*;
    use crate::testing::{FakeModem, InMemoryStorage, command, device, sms_connection};

    const NUMBER: &str = "+33600000000";

    struct Fixture {
        gateway: Arc<SmsGateway<InMemoryStorage, FakeModem>>,
        modem: FakeModem,
        storage: InMemoryStorage,
        sink: NotificationSink,
        connection: Connection,
        lamp: homegate_domain::device::Device,
    }

    async fn fixture(modem: FakeModem) -> Fixture {
        let connection = sms_connection(NUMBER, 60_000);
        let lamp = device("Lamp");
        let storage = InMemoryStorage::default()
            .with_connection(&connection)
            .with_device(&lamp);
        let sink = NotificationSink::new(16);
        let (tx, _rx) = mpsc::channel(8);
        let gateway = Arc::new(SmsGateway::new(storage.clone(), modem.clone(), sink.clone(), tx));
        gateway.start().await.unwrap();
        Fixture {
            gateway,
            modem,
            storage,
            sink,
            connection,
            lamp,
        }
    }

    fn sms_command(f: &Fixture, mode: ExecutionMode) -> Command {
        command(&f.lamp, &f.connection, "on", TransportKind::Sms, mode)
    }

    #[tokio::test]
    async fn should_send_async_command_immediately_and_confirm_on_receipt() {
        let f = fixture(FakeModem::default()).await;
        let cmd = sms_command(&f, ExecutionMode::Async);

        let outcome = f.gateway.send(&cmd, &f.connection, "ON", Some("7")).await.unwrap();
        assert_eq!(outcome, SmsSendOutcome::Sent);
        assert_eq!(f.gateway.pending_sends(), 1);

        f.gateway.delivered(cmd.id, true).await;

        assert_eq!(f.gateway.pending_sends(), 0);
        assert_eq!(f.storage.device_value(f.lamp.id).as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn should_hold_second_sync_command_until_first_is_delivered() {
        let f = fixture(FakeModem::default()).await;
        let c1 = sms_command(&f, ExecutionMode::Confirm);
        let c2 = sms_command(&f, ExecutionMode::Confirm);

        assert_eq!(
            f.gateway.send(&c1, &f.connection, "1", None).await.unwrap(),
            SmsSendOutcome::Sent
        );
        assert_eq!(
            f.gateway.send(&c2, &f.connection, "2", None).await.unwrap(),
            SmsSendOutcome::Queued
        );
        assert_eq!(f.modem.sent_ids(), vec![c1.id]);

        f.gateway.delivered(c1.id, true).await;

        assert_eq!(f.modem.sent_ids(), vec![c1.id, c2.id]);
        assert_eq!(f.gateway.queued(NUMBER), 1);
    }

    #[tokio::test]
    async fn should_advance_queue_when_head_expires() {
        let f = fixture(FakeModem::default()).await;
        let c1 = sms_command(&f, ExecutionMode::Match);
        let c2 = sms_command(&f, ExecutionMode::Match);
        f.gateway.send(&c1, &f.connection, "1", None).await.unwrap();
        f.gateway.send(&c2, &f.connection, "2", None).await.unwrap();

        let later = now() + chrono::Duration::seconds(61);
        let expired = f.gateway.sweep(later).await;

        assert_eq!(expired, 1);
        assert_eq!(f.modem.sent_ids(), vec![c1.id, c2.id]);
        assert_eq!(f.gateway.pending_sends(), 1);
    }

    #[tokio::test]
    async fn should_notify_with_retry_request_on_failed_receipt() {
        let f = fixture(FakeModem::default()).await;
        let mut notifications = f.sink.subscribe_notifications();
        let c1 = sms_command(&f, ExecutionMode::Set);
        let c2 = sms_command(&f, ExecutionMode::Set);
        f.gateway.send(&c1, &f.connection, "1", Some("3")).await.unwrap();
        f.gateway.send(&c2, &f.connection, "2", None).await.unwrap();

        f.gateway.delivered(c1.id, false).await;

        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.title, "Lamp");
        assert_eq!(
            notification.retry,
            Some(RetryRequest {
                command_id: c1.id,
                mqtt: false,
                value: Some("3".to_string()),
            })
        );
        assert_eq!(f.modem.sent_ids(), vec![c1.id, c2.id]);
    }

    #[tokio::test]
    async fn should_claim_delivered_sync_command_as_answer() {
        let f = fixture(FakeModem::default()).await;
        let c1 = sms_command(&f, ExecutionMode::Confirm);
        f.gateway.send(&c1, &f.connection, "1", None).await.unwrap();
        f.gateway.delivered(c1.id, true).await;

        let answer = f.gateway.take_answer(NUMBER).await.unwrap();
        assert_eq!(answer.command.id, c1.id);
        assert!(f.gateway.take_answer(NUMBER).await.is_none());
    }

    #[tokio::test]
    async fn should_claim_in_flight_head_and_start_next() {
        let f = fixture(FakeModem::default()).await;
        let c1 = sms_command(&f, ExecutionMode::Confirm);
        let c2 = sms_command(&f, ExecutionMode::Confirm);
        f.gateway.send(&c1, &f.connection, "1", None).await.unwrap();
        f.gateway.send(&c2, &f.connection, "2", None).await.unwrap();

        let answer = f.gateway.take_answer(NUMBER).await.unwrap();

        assert_eq!(answer.command.id, c1.id);
        assert_eq!(f.modem.sent_ids(), vec![c1.id, c2.id]);
    }

    #[tokio::test]
    async fn should_not_claim_answer_for_unknown_number() {
        let f = fixture(FakeModem::default()).await;
        assert!(f.gateway.take_answer("+100").await.is_none());
    }

    #[tokio::test]
    async fn should_refuse_to_send_when_stopped() {
        let f = fixture(FakeModem::default()).await;
        f.gateway.stop();
        let cmd = sms_command(&f, ExecutionMode::Async);
        assert_eq!(
            f.gateway.send(&cmd, &f.connection, "ON", None).await,
            Err(TransportError::NotRunning)
        );
        assert!(!f.modem.is_registered());
    }

    #[tokio::test]
    async fn should_refuse_to_start_without_permission() {
        let modem = FakeModem::without_permission();
        let (tx, _rx) = mpsc::channel(8);
        let gateway = Arc::new(SmsGateway::new(
            InMemoryStorage::default(),
            modem.clone(),
            NotificationSink::new(4),
            tx,
        ));

        let result = gateway.start().await;

        assert!(matches!(
            result,
            Err(GatewayError::Transport(TransportError::PermissionDenied))
        ));
        assert!(!gateway.is_running());
        assert!(!modem.is_registered());
    }

    #[tokio::test]
    async fn should_surface_immediate_modem_failure() {
        let modem = FakeModem::failing();
        let f = fixture(modem).await;
        let cmd = sms_command(&f, ExecutionMode::Confirm);

        let result = f.gateway.send(&cmd, &f.connection, "1", None).await;

        assert!(matches!(result, Err(TransportError::PublishFailed(_))));
        assert_eq!(f.gateway.pending_sends(), 0);
        assert_eq!(f.gateway.queued(NUMBER), 0);
    }

    fn pending(deadline: Timestamp) -> PendingSend {
        let connection = sms_connection(NUMBER, 1_000);
        let lamp = device("Lamp");
        PendingSend {
            command: command(&lamp, &connection, "on", TransportKind::Sms, ExecutionMode::Async),
            number: NUMBER.to_string(),
            value: None,
            ttl: Duration::from_secs(1),
            deadline,
        }
    }

    #[test]
    fn should_keep_send_whose_deadline_is_now() {
        let at = now();
        let mut state = SmsState::default();
        let send = pending(at);
        state.sent.insert(send.command.id, send);

        assert_eq!(state.expire(at).0, 0);
        assert_eq!(state.expire(at + chrono::Duration::milliseconds(1)).0, 1);
    }
}
