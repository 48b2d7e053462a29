//! Gateway: wires every engine together behind one lifecycle.
//!
//! All transports share one inbound channel drained by the [`Router`]. Event
//! firings and timer firings feed the [`AutomationEngine`]. Both loops are
//! spawned on the first [`Gateway::start`] and live until the gateway is dropped.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use homegate_domain::error::{GatewayError, TransportError};
use homegate_domain::id::CommandId;
use homegate_domain::timer::Timer;

use crate::automation_engine::AutomationEngine;
use crate::command_dispatcher::{CommandDispatcher, DispatchOutcome};
use crate::connection_registry::ConnectionRegistry;
use crate::event_resolver::EventResolver;
use crate::inbound::Inbound;
use crate::local_broker::LocalBroker;
use crate::notification_sink::NotificationSink;
use crate::ports::{BrokerBackend, MqttClientFactory, SmsModem, Storage};
use crate::router::Router;
use crate::sms_gateway::SmsGateway;
use crate::sync::lock;
use crate::timer_scheduler::TimerScheduler;

/// Runtime knobs for [`Gateway::new`].
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub inbound_capacity: usize,
    pub notification_capacity: usize,
    pub broker_enabled: bool,
    pub sms_enabled: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            inbound_capacity: 256,
            notification_capacity: 256,
            broker_enabled: true,
            sms_enabled: true,
        }
    }
}

struct Receivers {
    inbound: mpsc::Receiver<Inbound>,
    timers: mpsc::Receiver<Timer>,
}

pub struct Gateway<S, F: MqttClientFactory, B, M> {
    storage: S,
    options: GatewayOptions,
    sink: NotificationSink,
    registry: Arc<ConnectionRegistry<S, F>>,
    broker: Arc<LocalBroker<S, B>>,
    sms: Arc<SmsGateway<S, M>>,
    scheduler: Arc<TimerScheduler<S>>,
    dispatcher: Arc<CommandDispatcher<S, F, B, M>>,
    receivers: Mutex<Option<Receivers>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, F, B, M> Gateway<S, F, B, M>
where
    S: Storage,
    F: MqttClientFactory,
    B: BrokerBackend,
    M: SmsModem,
{
    pub fn new(storage: S, factory: F, backend: B, modem: M, options: GatewayOptions) -> Self {
        let (inbound_tx, inbound) = mpsc::channel(options.inbound_capacity);
        let (timer_tx, timers) = mpsc::channel(options.inbound_capacity);
        let sink = NotificationSink::new(options.notification_capacity);

        let registry = Arc::new(ConnectionRegistry::new(
            storage.clone(),
            factory,
            inbound_tx.clone(),
            sink.clone(),
        ));
        let broker = Arc::new(LocalBroker::new(storage.clone(), backend, inbound_tx.clone()));
        let sms = Arc::new(SmsGateway::new(storage.clone(), modem, sink.clone(), inbound_tx));
        let scheduler = Arc::new(TimerScheduler::new(storage.clone(), timer_tx));
        let dispatcher = Arc::new(CommandDispatcher::new(
            storage.clone(),
            Arc::clone(&registry),
            Arc::clone(&broker),
            Arc::clone(&sms),
            sink.clone(),
        ));

        Self {
            storage,
            options,
            sink,
            registry,
            broker,
            sms,
            scheduler,
            dispatcher,
            receivers: Mutex::new(Some(Receivers { inbound, timers })),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start every enabled component.
    ///
    /// A local broker that cannot bind or an SMS modem without permission is
    /// logged and left stopped; the rest of the gateway still starts.
    ///
    /// # Errors
    ///
    /// Returns a storage error raised while loading connections or timers.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), GatewayError> {
        self.spawn_loops();

        self.registry.start().await?;
        if self.options.broker_enabled {
            match self.broker.start().await {
                Err(GatewayError::Transport(err)) => {
                    tracing::warn!(error = %err, "local broker not started");
                }
                other => other?,
            }
        }
        if self.options.sms_enabled {
            match self.sms.start().await {
                Err(GatewayError::Transport(TransportError::PermissionDenied)) => {
                    tracing::warn!("sms permission denied, sms gateway not started");
                }
                Err(GatewayError::Transport(err)) => {
                    tracing::warn!(error = %err, "sms gateway not started");
                }
                other => other?,
            }
        }
        self.scheduler.start().await?;
        tracing::info!("gateway started");
        Ok(())
    }

    /// Stop every component. The router and automation loops keep running.
    pub async fn stop(&self) {
        self.scheduler.stop();
        self.sms.stop();
        self.broker.stop();
        self.registry.stop().await;
        tracing::info!("gateway stopped");
    }

    /// Whether any component is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.registry.is_running()
            || self.broker.is_running()
            || self.sms.is_running()
            || self.scheduler.is_running()
    }

    /// Re-attempt a command named by a notification's retry request.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn retry(
        &self,
        command_id: CommandId,
        mqtt: bool,
        value: Option<&str>,
    ) -> Result<DispatchOutcome, GatewayError> {
        self.dispatcher.retry(command_id, mqtt, value).await
    }

    #[must_use]
    pub fn sink(&self) -> &NotificationSink {
        &self.sink
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<CommandDispatcher<S, F, B, M>> {
        &self.dispatcher
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry<S, F>> {
        &self.registry
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<LocalBroker<S, B>> {
        &self.broker
    }

    #[must_use]
    pub fn sms(&self) -> &Arc<SmsGateway<S, M>> {
        &self.sms
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<TimerScheduler<S>> {
        &self.scheduler
    }

    fn spawn_loops(&self) {
        let Some(receivers) = lock(&self.receivers).take() else {
            return;
        };
        let router = Router::new(
            EventResolver::new(self.storage.clone(), self.sink.clone()),
            Arc::clone(&self.sms),
        );
        let engine = AutomationEngine::new(self.storage.clone(), Arc::clone(&self.dispatcher));
        let firings = self.sink.subscribe_firings();

        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(async move {
            router.run(receivers.inbound).await;
        }));
        tasks.push(tokio::spawn(async move {
            engine.run(firings, receivers.timers).await;
        }));
    }
}

impl<S, F: MqttClientFactory, B, M> Drop for Gateway<S, F, B, M> {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}
