//! Local broker: sessions on the MQTT broker the gateway hosts itself.
//!
//! Devices connect to the embedded broker with the credentials of a
//! `LocalMqtt` connection. The broker tracks which usernames are currently
//! connected, which is what decides whether a command can be delivered to
//! them, and forwards each publish of a connected session to the router
//! attributed to `<LOCAL_BROKER_HOST>:<username>`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use homegate_domain::connection::{ConnectionType, local_source_address};
use homegate_domain::error::{GatewayError, TransportError};

use crate::inbound::Inbound;
use crate::ports::{Authenticator, BrokerBackend, BrokerEvent, Storage};
use crate::sync::lock;

/// Accepts a client when its password equals the one stored on the
/// `LocalMqtt` connection with the same username.
#[derive(Debug, Default)]
pub struct StoredCredentialsAuthenticator {
    credentials: RwLock<HashMap<String, String>>,
}

impl StoredCredentialsAuthenticator {
    /// Replace the credential snapshot.
    pub fn replace(&self, credentials: HashMap<String, String>) {
        let mut guard = self
            .credentials
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = credentials;
    }
}

impl Authenticator for StoredCredentialsAuthenticator {
    fn authenticate(&self, username: &str, password: &[u8]) -> bool {
        let guard = self
            .credentials
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .get(username)
            .is_some_and(|stored| stored.as_bytes() == password)
    }
}

pub struct LocalBroker<S, B> {
    storage: S,
    backend: B,
    authenticator: Arc<StoredCredentialsAuthenticator>,
    connected: Arc<Mutex<HashSet<String>>>,
    inbound: mpsc::Sender<Inbound>,
    pump: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl<S, B> LocalBroker<S, B>
where
    S: Storage,
    B: BrokerBackend,
{
    pub fn new(storage: S, backend: B, inbound: mpsc::Sender<Inbound>) -> Self {
        Self {
            storage,
            backend,
            authenticator: Arc::new(StoredCredentialsAuthenticator::default()),
            connected: Arc::new(Mutex::new(HashSet::new())),
            inbound,
            pump: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Reload the credentials of every `LocalMqtt` connection.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the connections cannot be listed.
    pub async fn refresh_credentials(&self) -> Result<(), GatewayError> {
        let credentials = self
            .storage
            .list_connections_by_type(ConnectionType::LocalMqtt)
            .await?
            .into_iter()
            .filter_map(|c| Some((c.username?, c.password.unwrap_or_default())))
            .collect::<HashMap<_, _>>();
        tracing::debug!(count = credentials.len(), "local broker credentials loaded");
        self.authenticator.replace(credentials);
        Ok(())
    }

    /// Start the embedded broker. No-op when already running.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials cannot be loaded or the backend fails to start.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), GatewayError> {
        if self.is_running() {
            return Ok(());
        }
        self.refresh_credentials().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let authenticator: Arc<dyn Authenticator> = self.authenticator.clone();
        self.backend.start(authenticator, tx)?;

        let pump = tokio::spawn(pump_events(
            rx,
            Arc::clone(&self.connected),
            self.inbound.clone(),
        ));
        *lock(&self.pump) = Some(pump);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("local broker started");
        Ok(())
    }

    /// Stop the embedded broker. No-op when not running.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.backend.stop();
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        lock(&self.connected).clear();
        tracing::info!("local broker stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether `username` currently has a session on the broker.
    #[must_use]
    pub fn has(&self, username: &str) -> bool {
        lock(&self.connected).contains(username)
    }

    /// Publish into the broker's own subscriber set.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotRunning`] when the broker is stopped, or
    /// the backend's error when it rejects the message.
    pub fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }
        self.backend.publish(topic, payload)
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<BrokerEvent>,
    connected: Arc<Mutex<HashSet<String>>>,
    inbound: mpsc::Sender<Inbound>,
) {
    while let Some(event) = events.recv().await {
        match event {
            BrokerEvent::ClientConnected { username } => {
                tracing::debug!(%username, "local client connected");
                lock(&connected).insert(username);
            }
            BrokerEvent::ClientDisconnected { username } => {
                tracing::debug!(%username, "local client disconnected");
                lock(&connected).remove(&username);
            }
            BrokerEvent::Published {
                username,
                topic,
                payload,
            } => {
                if !lock(&connected).contains(&username) {
                    tracing::debug!(%username, %topic, "publish from unknown session dropped");
                    continue;
                }
                let address = local_source_address(&username);
                let Some(message) = Inbound::mqtt(address, topic.as_str(), &payload) else {
                    continue;
                };
                if inbound.send(message).await.is_err() {
                    return;
                }
            }
        }
    }
}
