//! Connection registry: one live client per remote MQTT broker address.
//!
//! This is the only place clients are created. Local broker sessions are
//! served by [`LocalBroker`](crate::local_broker::LocalBroker) and SMS by the
//! [`SmsGateway`](crate::sms_gateway::SmsGateway); both are ignored here.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use homegate_domain::connection::{Connection, ConnectionType};
use homegate_domain::error::GatewayError;

use crate::client_hooks::{ClientHooks, EvictFn};
use crate::inbound::Inbound;
use crate::notification_sink::NotificationSink;
use crate::ports::{MqttClient, MqttClientFactory, Storage};
use crate::sync::lock;

type Clients<C> = Arc<Mutex<HashMap<String, Arc<C>>>>;

pub struct ConnectionRegistry<S, F: MqttClientFactory> {
    storage: S,
    factory: F,
    clients: Clients<F::Client>,
    inbound: mpsc::Sender<Inbound>,
    sink: NotificationSink,
    running: AtomicBool,
}

impl<S, F> ConnectionRegistry<S, F>
where
    S: Storage,
    F: MqttClientFactory,
{
    pub fn new(
        storage: S,
        factory: F,
        inbound: mpsc::Sender<Inbound>,
        sink: NotificationSink,
    ) -> Self {
        Self {
            storage,
            factory,
            clients: Arc::new(Mutex::new(HashMap::new())),
            inbound,
            sink,
            running: AtomicBool::new(false),
        }
    }

    /// Create, register and connect a client for `connection`.
    ///
    /// No-op when a client is already registered for the address, or when the
    /// connection is not a remote MQTT one.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built or fails to connect;
    /// the entry is removed again in that case.
    #[tracing::instrument(skip(self, connection), fields(address = %connection.address))]
    pub async fn connect(&self, connection: &Connection) -> Result<(), GatewayError> {
        if connection.connection_type != ConnectionType::Mqtt {
            tracing::debug!(kind = %connection.connection_type, "not a remote mqtt connection");
            return Ok(());
        }
        let address = connection.address.clone();

        let client = {
            let mut clients = lock(&self.clients);
            if clients.contains_key(&address) {
                tracing::debug!("client already registered");
                return Ok(());
            }
            let hooks = ClientHooks::new(
                address.as_str(),
                self.inbound.clone(),
                self.sink.clone(),
                self.evict_fn(),
            );
            let client = Arc::new(self.factory.create(connection, hooks)?);
            clients.insert(address.clone(), Arc::clone(&client));
            client
        };

        if let Err(err) = client.connect().await {
            lock(&self.clients).remove(&address);
            return Err(err.into());
        }

        let topics: BTreeSet<String> = self
            .storage
            .events_for_connection(connection.id)
            .await?
            .into_iter()
            .map(|event| event.topic)
            .collect();
        for topic in topics {
            if let Err(err) = client.subscribe(&topic).await {
                tracing::warn!(%topic, error = %err, "subscribe failed");
            }
        }
        tracing::info!("mqtt client registered");
        Ok(())
    }

    /// Tear down and forget the client for `address`.
    pub async fn disconnect(&self, address: &str) {
        let removed = lock(&self.clients).remove(address);
        if let Some(client) = removed {
            client.disconnect().await;
            tracing::info!(%address, "mqtt client disconnected");
        }
    }

    #[must_use]
    pub fn get(&self, address: &str) -> Option<Arc<F::Client>> {
        lock(&self.clients).get(address).cloned()
    }

    /// Disconnect when a client is registered, connect otherwise.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`connect`](Self::connect).
    pub async fn toggle(&self, connection: &Connection) -> Result<(), GatewayError> {
        if self.get(&connection.address).is_some() {
            self.disconnect(&connection.address).await;
            Ok(())
        } else {
            self.connect(connection).await
        }
    }

    /// Connect every stored remote MQTT connection.
    ///
    /// A connection that fails is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the connections cannot be listed.
    pub async fn start(&self) -> Result<(), GatewayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let connections = self
            .storage
            .list_connections_by_type(ConnectionType::Mqtt)
            .await?;
        for connection in &connections {
            if let Err(err) = self.connect(connection).await {
                tracing::warn!(address = %connection.address, error = %err, "connect failed");
            }
        }
        Ok(())
    }

    /// Disconnect every registered client.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let addresses: Vec<String> = lock(&self.clients).keys().cloned().collect();
        for address in addresses {
            self.disconnect(&address).await;
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn evict_fn(&self) -> EvictFn {
        let clients = Arc::downgrade(&self.clients);
        Arc::new(move |address: &str| {
            if let Some(clients) = clients.upgrade() {
                lock(&clients).remove(address);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{
        FakeClientFactory, InMemoryStorage, device, event, local_connection, remote_connection,
    };

    fn registry(
        storage: InMemoryStorage,
        factory: FakeClientFactory,
    ) -> ConnectionRegistry<InMemoryStorage, FakeClientFactory> {
        let (tx, _rx) = mpsc::channel(8);
        ConnectionRegistry::new(storage, factory, tx, NotificationSink::new(8))
    }

    #[tokio::test]
    async fn should_create_one_client_per_address() {
        let factory = FakeClientFactory::default();
        let registry = registry(InMemoryStorage::default(), factory.clone());
        let conn = remote_connection("broker.local");

        registry.connect(&conn).await.unwrap();
        registry.connect(&conn).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(registry.get("broker.local").unwrap().is_connected());
    }

    #[tokio::test]
    async fn should_ignore_local_connections() {
        let factory = FakeClientFactory::default();
        let registry = registry(InMemoryStorage::default(), factory.clone());

        registry.connect(&local_connection("kitchen", "pw")).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn should_subscribe_to_event_topics_once() {
        let conn = remote_connection("broker.local");
        let lamp = device("Lamp");
        let storage = InMemoryStorage::default()
            .with_event(&event(&lamp, &conn, "lamp/state", Some("on")))
            .with_event(&event(&lamp, &conn, "lamp/state", Some("off")))
            .with_event(&event(&lamp, &conn, "lamp/level", None));
        let registry = registry(storage, FakeClientFactory::default());

        registry.connect(&conn).await.unwrap();
        let client = registry.get("broker.local").unwrap();
        client.subscribe("lamp/state").await.unwrap();

        assert_eq!(client.subscribe_calls(), vec!["lamp/level", "lamp/state"]);
    }

    #[tokio::test]
    async fn should_toggle_client() {
        let registry = registry(InMemoryStorage::default(), FakeClientFactory::default());
        let conn = remote_connection("broker.local");

        registry.toggle(&conn).await.unwrap();
        assert!(registry.get("broker.local").is_some());
        registry.toggle(&conn).await.unwrap();
        assert!(registry.get("broker.local").is_none());
    }

    #[tokio::test]
    async fn should_evict_client_that_gives_up() {
        let registry = registry(InMemoryStorage::default(), FakeClientFactory::default());
        registry.connect(&remote_connection("broker.local")).await.unwrap();
        let client = registry.get("broker.local").unwrap();

        client.hooks.connecting();
        for _ in 0..4 {
            client.hooks.disconnected();
        }

        assert!(registry.get("broker.local").is_none());
    }

    #[tokio::test]
    async fn should_connect_stored_connections_on_start_and_drop_them_on_stop() {
        let storage = InMemoryStorage::default()
            .with_connection(&remote_connection("a.local"))
            .with_connection(&remote_connection("b.local"))
            .with_connection(&local_connection("kitchen", "pw"));
        let factory = FakeClientFactory::default();
        let registry = registry(storage, factory.clone());

        registry.start().await.unwrap();
        assert!(registry.is_running());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);

        registry.stop().await;
        assert!(!registry.is_running());
        assert!(registry.get("a.local").is_none());
        assert!(registry.get("b.local").is_none());
    }
}
