//! Embedded broker backed by rumqttd.
//!
//! rumqttd runs its own threads once started and cannot be shut down from the
//! outside. It listens on a loopback port only; clients reach it through the
//! relay in [`crate::relay`], which owns the public listener and is what
//! reports sessions and their publishes. [`RumqttdBackend::stop`] closes the
//! relayed connections and refuses new ones; a later start reuses the
//! running broker.

use std::collections::HashMap;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rumqttd::local::{LinkRx, LinkTx};
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use tokio::sync::{mpsc, watch};

use homegate_app::ports::{Authenticator, BrokerBackend, BrokerEvent};
use homegate_app::sync::lock;
use homegate_domain::error::TransportError;

use crate::broker_properties::{BrokerProperties, STORED_CREDENTIALS};
use crate::error::MqttError;
use crate::relay::{self, MAX_PACKET_SIZE};

const LINK_NAME: &str = "homegate";

type AuthHandler =
    Arc<dyn Fn(String, String, String) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// State shared by the rumqttd auth hook and the relay tasks.
pub(crate) struct Shared {
    forwarding: AtomicBool,
    allow_anonymous: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<BrokerEvent>>>,
    authenticator: Mutex<Option<Arc<dyn Authenticator>>>,
    /// live relayed connections per authenticated username
    sessions: Mutex<HashMap<String, usize>>,
    closing: watch::Sender<u64>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            forwarding: AtomicBool::new(false),
            allow_anonymous: AtomicBool::new(false),
            events: Mutex::new(None),
            authenticator: Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
            closing: watch::channel(0).0,
        }
    }
}

impl Shared {
    fn emit(&self, event: BrokerEvent) {
        if let Some(events) = lock(&self.events).as_ref()
            && events.send(event).is_err()
        {
            tracing::debug!("local broker listener gone");
        }
    }

    fn is_known(&self, username: &str, password: &[u8]) -> bool {
        let authenticator = lock(&self.authenticator).clone();
        authenticator.is_some_and(|auth| auth.authenticate(username, password))
    }

    /// Connection check run by rumqttd for every CONNECT.
    fn admit(&self, client_id: &str, username: &str, password: &str) -> bool {
        if !self.forwarding.load(Ordering::SeqCst) {
            return false;
        }
        let accepted = self.is_known(username, password.as_bytes())
            || self.allow_anonymous.load(Ordering::SeqCst);
        if !accepted {
            tracing::info!(%client_id, %username, "local client rejected");
        }
        accepted
    }

    /// A relayed client sent CONNECT. Returns whether the session is tracked.
    ///
    /// Anonymous sessions are let through by [`Shared::admit`] but never
    /// tracked, so nothing they publish is reported.
    pub(crate) fn session_opened(&self, username: &str, password: &[u8]) -> bool {
        if !self.forwarding.load(Ordering::SeqCst) || !self.is_known(username, password) {
            return false;
        }
        let first = {
            let mut sessions = lock(&self.sessions);
            let count = sessions.entry(username.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            self.emit(BrokerEvent::ClientConnected {
                username: username.to_string(),
            });
        }
        true
    }

    /// A tracked relay ended. The username is reported gone with its last connection.
    pub(crate) fn session_closed(&self, username: &str) {
        let last = {
            let mut sessions = lock(&self.sessions);
            match sessions.get_mut(username) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => sessions.remove(username).is_some(),
                None => false,
            }
        };
        if last {
            self.emit(BrokerEvent::ClientDisconnected {
                username: username.to_string(),
            });
        }
    }

    pub(crate) fn published(&self, username: &str, topic: String, payload: Vec<u8>) {
        if !self.forwarding.load(Ordering::SeqCst) {
            return;
        }
        self.emit(BrokerEvent::Published {
            username: username.to_string(),
            topic,
            payload,
        });
    }

    /// Changes each time the broker is stopped.
    pub(crate) fn closing(&self) -> watch::Receiver<u64> {
        self.closing.subscribe()
    }

    fn stopped(&self) {
        self.forwarding.store(false, Ordering::SeqCst);
        lock(&self.sessions).clear();
        lock(&self.events).take();
        self.closing.send_modify(|generation| *generation += 1);
    }
}

/// The gateway's own session on the router.
struct Link {
    tx: LinkTx,
    _rx: LinkRx,
}

pub struct RumqttdBackend {
    properties_path: PathBuf,
    port_override: Option<u16>,
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
}

impl RumqttdBackend {
    /// Backend whose listen settings are read from `properties_path` at start.
    #[must_use]
    pub fn new(properties_path: impl Into<PathBuf>) -> Self {
        Self {
            properties_path: properties_path.into(),
            port_override: None,
            shared: Arc::new(Shared::default()),
            link: Mutex::new(None),
        }
    }

    /// Listen on `port` whatever the properties file says.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port_override = Some(port);
        self
    }

    /// The properties the next start will use.
    #[must_use]
    pub fn properties(&self) -> BrokerProperties {
        let properties = BrokerProperties::load_or_default(&self.properties_path);
        match self.port_override {
            Some(port) => properties.with_port(port),
            None => properties,
        }
    }

    fn launch(&self, properties: &BrokerProperties) -> Result<Link, MqttError> {
        let listen = properties.listen_addr()?;
        if properties.authenticator != STORED_CREDENTIALS {
            tracing::warn!(
                authenticator = %properties.authenticator,
                "unknown authenticator, using stored credentials"
            );
        }
        self.shared
            .allow_anonymous
            .store(properties.allow_anonymous, Ordering::SeqCst);

        let public = TcpListener::bind(listen)
            .and_then(|listener| listener.set_nonblocking(true).map(|()| listener))
            .map_err(|err| MqttError::Broker(format!("cannot listen on {listen}: {err}")))?;
        let upstream = loopback_port()?;

        let auth = auth_handler(Arc::clone(&self.shared));
        let mut broker = Broker::new(broker_config(upstream, auth));
        let (tx, rx) = broker
            .link(LINK_NAME)
            .map_err(|err| MqttError::Broker(err.to_string()))?;

        spawn_named("homegate-broker", move || {
            if let Err(err) = broker.start() {
                tracing::error!(error = %err, "local broker exited");
            }
        })?;
        let shared = Arc::clone(&self.shared);
        spawn_named("homegate-broker-relay", move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::error!(error = %err, "local broker relay runtime failed");
                    return;
                }
            };
            runtime.block_on(async move {
                match tokio::net::TcpListener::from_std(public) {
                    Ok(listener) => relay::serve(listener, upstream, shared).await,
                    Err(err) => tracing::error!(error = %err, "local broker listener unusable"),
                }
            });
        })?;

        tracing::info!(
            %listen,
            %upstream,
            allow_anonymous = properties.allow_anonymous,
            "local broker listening"
        );
        Ok(Link { tx, _rx: rx })
    }
}

impl BrokerBackend for RumqttdBackend {
    fn start(
        &self,
        authenticator: Arc<dyn Authenticator>,
        events: mpsc::UnboundedSender<BrokerEvent>,
    ) -> Result<(), TransportError> {
        *lock(&self.shared.authenticator) = Some(authenticator);
        *lock(&self.shared.events) = Some(events);

        let mut link = lock(&self.link);
        if link.is_none() {
            *link = Some(self.launch(&self.properties())?);
        } else {
            tracing::debug!("reusing running local broker");
        }
        self.shared.forwarding.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.shared.stopped();
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        let Some(link) = link.as_mut() else {
            return Err(TransportError::NotRunning);
        };
        link.tx
            .publish(topic.to_string(), payload.as_bytes().to_vec())
            .map(|_| ())
            .map_err(|err| TransportError::PublishFailed(err.to_string()))
    }
}

fn auth_handler(shared: Arc<Shared>) -> AuthHandler {
    Arc::new(move |client_id, username, password| {
        let shared = Arc::clone(&shared);
        Box::pin(async move { shared.admit(&client_id, &username, &password) })
    })
}

/// A free port on the loopback interface for rumqttd to bind.
fn loopback_port() -> Result<SocketAddr, MqttError> {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .and_then(|listener| listener.local_addr())
        .map_err(|err| MqttError::Broker(format!("no loopback port available: {err}")))
}

fn broker_config(listen: SocketAddr, auth: AuthHandler) -> Config {
    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 60_000,
                max_payload_size: MAX_PACKET_SIZE,
                max_inflight_count: 100,
                auth: None,
                external_auth: Some(auth),
                dynamic_filters: false,
            },
        },
    );

    Config {
        id: 0,
        router: RouterConfig {
            max_connections: 1000,
            max_outgoing_packet_count: 200,
            max_segment_size: 1024 * 1024,
            max_segment_count: 10,
            ..Default::default()
        },
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        console: None,
        bridge: None,
        cluster: None,
    }
}

fn spawn_named(name: &str, work: impl FnOnce() + Send + 'static) -> Result<(), MqttError> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(work)
        .map(|_| ())
        .map_err(|err| MqttError::Broker(format!("cannot spawn {name}: {err}")))
}
