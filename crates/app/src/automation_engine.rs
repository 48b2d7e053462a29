//! Automation engine: runs scripts when their trigger fires.
//!
//! The engine consumes event firings from the notification sink and timer
//! firings from the scheduler. For each firing it loads the scripts bound to
//! that trigger, checks their guard against the carried value and dispatches
//! the script's command action. Timers carry no value.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use homegate_domain::error::GatewayError;
use homegate_domain::event::EventFiring;
use homegate_domain::id::ScriptId;
use homegate_domain::script::ScriptTrigger;
use homegate_domain::timer::Timer;

use crate::command_dispatcher::CommandDispatcher;
use crate::ports::{BrokerBackend, MqttClientFactory, SmsModem, Storage};

pub struct AutomationEngine<S, F: MqttClientFactory, B, M> {
    storage: S,
    dispatcher: Arc<CommandDispatcher<S, F, B, M>>,
}

impl<S, F, B, M> AutomationEngine<S, F, B, M>
where
    S: Storage,
    F: MqttClientFactory,
    B: BrokerBackend,
    M: SmsModem,
{
    pub fn new(storage: S, dispatcher: Arc<CommandDispatcher<S, F, B, M>>) -> Self {
        Self {
            storage,
            dispatcher,
        }
    }

    /// Run the scripts triggered by an event firing.
    ///
    /// Returns the ids of the scripts whose command was dispatched.
    ///
    /// # Errors
    ///
    /// Returns a storage error if scripts cannot be loaded.
    pub async fn process_firing(
        &self,
        firing: &EventFiring,
    ) -> Result<Vec<ScriptId>, GatewayError> {
        self.run_scripts(ScriptTrigger::Event(firing.event.id), firing.value.as_deref())
            .await
    }

    /// Run the scripts triggered by a timer.
    ///
    /// # Errors
    ///
    /// Returns a storage error if scripts cannot be loaded.
    pub async fn process_timer(&self, timer: &Timer) -> Result<Vec<ScriptId>, GatewayError> {
        self.run_scripts(ScriptTrigger::Timer(timer.id), None).await
    }

    #[tracing::instrument(skip(self))]
    async fn run_scripts(
        &self,
        trigger: ScriptTrigger,
        value: Option<&str>,
    ) -> Result<Vec<ScriptId>, GatewayError> {
        let scripts = self.storage.scripts_for_trigger(trigger).await?;
        let mut ran = Vec::new();
        for script in scripts.iter().filter(|script| script.should_run(value)) {
            let outcome = self
                .dispatcher
                .execute_by_action(script.device_id, &script.command_action, value)
                .await?;
            tracing::info!(script_id = %script.id, name = %script.name, ?outcome, "script ran");
            ran.push(script.id);
        }
        Ok(ran)
    }

    /// Drive both firing streams until either closes.
    pub async fn run(
        &self,
        mut firings: broadcast::Receiver<EventFiring>,
        mut timers: mpsc::Receiver<Timer>,
    ) {
        loop {
            tokio::select! {
                firing = firings.recv() => match firing {
                    Ok(firing) => {
                        if let Err(err) = self.process_firing(&firing).await {
                            tracing::warn!(error = %err, "event scripts failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "automation engine lagging behind firings");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                timer = timers.recv() => match timer {
                    Some(timer) => {
                        if let Err(err) = self.process_timer(&timer).await {
                            tracing::warn!(error = %err, "timer scripts failed");
                        }
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("automation engine stopped");
    }
}
