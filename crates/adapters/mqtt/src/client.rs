//! Remote MQTT client backed by rumqttc.
//!
//! One client drives one rumqttc event loop on a tokio task. The loop reports
//! every transition to the [`ClientHooks`] it was built with; rumqttc itself
//! redials on the next poll after an error, the hooks decide when to give up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use homegate_app::client_hooks::ClientHooks;
use homegate_app::ports::MqttClient;
use homegate_app::subscription::SubscriptionSet;
use homegate_app::sync::lock;
use homegate_domain::error::TransportError;

use crate::error::MqttError;

/// Protocol-specific client options, as built by the factory.
pub enum ClientOptions {
    V4(rumqttc::MqttOptions),
    V5(Box<rumqttc::v5::MqttOptions>),
}

enum Session {
    V4(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

impl Session {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), MqttError> {
        let payload = payload.as_bytes().to_vec();
        match self {
            Self::V4(client) => client
                .publish(topic, rumqttc::QoS::AtLeastOnce, false, payload)
                .await
                .map_err(MqttError::Client),
            Self::V5(client) => client
                .publish(topic, rumqttc::v5::mqttbytes::QoS::AtLeastOnce, false, payload)
                .await
                .map_err(MqttError::ClientV5),
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        match self {
            Self::V4(client) => client
                .subscribe(topic, rumqttc::QoS::AtLeastOnce)
                .await
                .map_err(MqttError::Client),
            Self::V5(client) => client
                .subscribe(topic, rumqttc::v5::mqttbytes::QoS::AtLeastOnce)
                .await
                .map_err(MqttError::ClientV5),
        }
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        match self {
            Self::V4(client) => client.unsubscribe(topic).await.map_err(MqttError::Client),
            Self::V5(client) => client.unsubscribe(topic).await.map_err(MqttError::ClientV5),
        }
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        match self {
            Self::V4(client) => client.disconnect().await.map_err(MqttError::Client),
            Self::V5(client) => client.disconnect().await.map_err(MqttError::ClientV5),
        }
    }
}

/// What one poll of the event loop produced.
enum LoopEvent {
    Connected,
    Publish { topic: String, payload: Vec<u8> },
    /// The broker closed the session; the next poll reports the error.
    Closed,
    Failed(String),
    Other,
}

enum EventLoop {
    V4(rumqttc::EventLoop),
    V5(Box<rumqttc::v5::EventLoop>),
}

impl EventLoop {
    async fn next(&mut self) -> LoopEvent {
        match self {
            Self::V4(events) => {
                use rumqttc::{Event, Packet};
                match events.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => LoopEvent::Connected,
                    Ok(Event::Incoming(Packet::Publish(publish))) => LoopEvent::Publish {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    },
                    Ok(Event::Incoming(Packet::Disconnect)) => LoopEvent::Closed,
                    Ok(_) => LoopEvent::Other,
                    Err(err) => LoopEvent::Failed(err.to_string()),
                }
            }
            Self::V5(events) => {
                use rumqttc::v5::Event;
                use rumqttc::v5::mqttbytes::v5::Packet;
                match events.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => LoopEvent::Connected,
                    Ok(Event::Incoming(Packet::Publish(publish))) => LoopEvent::Publish {
                        topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                        payload: publish.payload.to_vec(),
                    },
                    Ok(Event::Incoming(Packet::Disconnect(_))) => LoopEvent::Closed,
                    Ok(_) => LoopEvent::Other,
                    Err(err) => LoopEvent::Failed(err.to_string()),
                }
            }
        }
    }
}

struct Shared {
    session: Session,
    hooks: ClientHooks,
    subscriptions: SubscriptionSet,
    connected: AtomicBool,
}

impl Shared {
    async fn on_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.hooks.connected();
        for topic in self.subscriptions.topics() {
            if let Err(err) = self.session.subscribe(&topic).await {
                tracing::warn!(
                    address = %self.hooks.address(),
                    %topic,
                    error = %err,
                    "resubscribe failed"
                );
            }
        }
    }
}

pub struct RumqttClient {
    shared: Arc<Shared>,
    events: Mutex<Option<EventLoop>>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    retry_delay: Duration,
}

impl RumqttClient {
    /// Build a client. Nothing is dialed before [`MqttClient::connect`].
    #[must_use]
    pub fn new(
        options: ClientOptions,
        capacity: usize,
        retry_delay: Duration,
        hooks: ClientHooks,
    ) -> Self {
        let (session, events) = match options {
            ClientOptions::V4(options) => {
                let (client, events) = rumqttc::AsyncClient::new(options, capacity);
                (Session::V4(client), EventLoop::V4(events))
            }
            ClientOptions::V5(options) => {
                let (client, events) = rumqttc::v5::AsyncClient::new(*options, capacity);
                (Session::V5(client), EventLoop::V5(Box::new(events)))
            }
        };
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                session,
                hooks,
                subscriptions: SubscriptionSet::default(),
                connected: AtomicBool::new(false),
            }),
            events: Mutex::new(Some(events)),
            task: Mutex::new(None),
            shutdown,
            retry_delay,
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        self.shared.hooks.address()
    }

    /// Topics the client keeps subscribed across reconnects.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.shared.subscriptions.topics()
    }
}

impl MqttClient for RumqttClient {
    #[tracing::instrument(skip(self), fields(address = %self.address()))]
    async fn connect(&self) -> Result<(), TransportError> {
        let Some(events) = lock(&self.events).take() else {
            tracing::debug!("event loop already started");
            return Ok(());
        };
        self.shared.hooks.connecting();
        let task = tokio::spawn(drive(
            Arc::clone(&self.shared),
            events,
            self.shutdown.subscribe(),
            self.retry_delay,
        ));
        *lock(&self.task) = Some(task);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(address = %self.address()))]
    async fn disconnect(&self) {
        self.shared.hooks.stopped();
        if self.shared.connected.swap(false, Ordering::SeqCst)
            && let Err(err) = self.shared.session.disconnect().await
        {
            tracing::debug!(error = %err, "disconnect request not delivered");
        }
        self.shutdown.send_replace(true);
        lock(&self.task).take();
        tracing::info!("mqtt client disconnected");
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::PublishFailed(format!(
                "{} is not connected",
                self.address()
            )));
        }
        self.shared
            .session
            .publish(topic, payload)
            .await
            .map_err(MqttError::into_transport)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.shared.subscriptions.insert(topic) {
            return Ok(());
        }
        // before the first ConnAck the resubscribe pass covers it
        if self.is_connected()
            && let Err(err) = self.shared.session.subscribe(topic).await
        {
            self.shared.subscriptions.remove(topic);
            return Err(err.into_transport());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.shared.subscriptions.remove(topic) {
            return Ok(());
        }
        if self.is_connected() {
            self.shared
                .session
                .unsubscribe(topic)
                .await
                .map_err(MqttError::into_transport)?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for RumqttClient {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

async fn drive(
    shared: Arc<Shared>,
    mut events: EventLoop,
    mut shutdown: watch::Receiver<bool>,
    retry_delay: Duration,
) {
    let address = shared.hooks.address().to_string();
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = events.next() => event,
        };
        match event {
            LoopEvent::Connected => shared.on_connected().await,
            LoopEvent::Publish { topic, payload } => shared.hooks.forward(&topic, &payload).await,
            LoopEvent::Closed => {
                shared.connected.store(false, Ordering::SeqCst);
                tracing::debug!(%address, "broker closed the session");
            }
            LoopEvent::Failed(reason) => {
                shared.connected.store(false, Ordering::SeqCst);
                tracing::debug!(%address, %reason, "mqtt event loop error");
                if shared.hooks.disconnected() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(retry_delay) => {}
                }
            }
            LoopEvent::Other => {}
        }
    }
    tracing::debug!(%address, "mqtt event loop stopped");
}
