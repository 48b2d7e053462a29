//! Callbacks a remote MQTT client reports into.
//!
//! Adapters drive their event loop and call these hooks on every transition.
//! The hooks own the reconnect bookkeeping, raise the matching
//! notifications and evict the client from the registry when it gives up.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use homegate_domain::notification::Notification;

use crate::inbound::Inbound;
use crate::notification_sink::NotificationSink;
use crate::reconnect::{LinkState, ReconnectMonitor, ReconnectOutcome};
use crate::sync::lock;

/// Called with the broker address when a client gives up.
pub type EvictFn = Arc<dyn Fn(&str) + Send + Sync>;

pub struct ClientHooks {
    address: String,
    inbound: mpsc::Sender<Inbound>,
    sink: NotificationSink,
    on_disconnected: EvictFn,
    monitor: Mutex<ReconnectMonitor>,
}

impl std::fmt::Debug for ClientHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHooks")
            .field("address", &self.address)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl ClientHooks {
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        inbound: mpsc::Sender<Inbound>,
        sink: NotificationSink,
        on_disconnected: EvictFn,
    ) -> Self {
        Self {
            address: address.into(),
            inbound,
            sink,
            on_disconnected,
            monitor: Mutex::new(ReconnectMonitor::default()),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        lock(&self.monitor).state()
    }

    pub fn connecting(&self) {
        lock(&self.monitor).connecting();
    }

    pub fn connected(&self) {
        tracing::info!(address = %self.address, "mqtt client connected");
        lock(&self.monitor).connected();
    }

    pub fn stopped(&self) {
        lock(&self.monitor).stopped();
    }

    /// Record an unexpected disconnect.
    ///
    /// Returns `true` when the client gave up and must stop its event loop.
    pub fn disconnected(&self) -> bool {
        let outcome = lock(&self.monitor).disconnected();
        match outcome {
            ReconnectOutcome::Retry => {
                tracing::debug!(address = %self.address, "mqtt client disconnected");
                false
            }
            ReconnectOutcome::Reconnecting => {
                tracing::warn!(address = %self.address, "mqtt client reconnecting");
                self.sink.notify(Notification::reconnecting(&self.address));
                false
            }
            ReconnectOutcome::GiveUp => {
                tracing::warn!(address = %self.address, "mqtt client gave up");
                (self.on_disconnected)(&self.address);
                self.sink.notify(Notification::connection_failed(&self.address));
                true
            }
        }
    }

    /// Forward a received publish to the router.
    pub async fn forward(&self, topic: &str, payload: &[u8]) {
        let Some(message) = Inbound::mqtt(self.address.as_str(), topic, payload) else {
            return;
        };
        if self.inbound.send(message).await.is_err() {
            tracing::debug!(address = %self.address, "inbound router gone, dropping publish");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn hooks(
        evictions: Arc<AtomicUsize>) -> (ClientHooks, NotificationSink, mpsc::Receiver<Inbound>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let sink = NotificationSink::new(16);
        let evict: EvictFn = Arc::new(move |_| {
            evictions.fetch_add(1, Ordering::SeqCst);
        });
        (ClientHooks::new("broker.local", tx, sink.clone(), evict), sink, rx)
    }

    #[tokio::test]
    async fn should_notify_reconnecting_once_then_fail_and_evict() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let (hooks, sink, _rx) = hooks(evictions.clone());
        let mut notifications = sink.subscribe_notifications();

        hooks.connecting();
        let gave_up: Vec<bool> = (0..4).map(|_| hooks.disconnected()).collect();

        assert_eq!(gave_up, vec![false, false, false, true]);
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
        assert_eq!(notifications.recv().await.unwrap().title, "Reconnecting");
        assert_eq!(notifications.recv().await.unwrap().title, "Connection failed");
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_forward_decoded_publish() {
        let (hooks, _sink, mut rx) = hooks(Arc::new(AtomicUsize::new(0)));
        hooks.forward("lamp/state", b"on").await;
        hooks.forward("lamp/state", &[0xc3, 0x28]).await;

        let Inbound::Mqtt { address, payload, .. } = rx.recv().await.unwrap() else {
            panic!("expected mqtt message");
        };
        assert_eq!(address, "broker.local");
        assert_eq!(payload, "on");
        assert!(rx.try_recv().is_err());
    }
}
