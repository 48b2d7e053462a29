//! Inbound router: the single task transport observations are handled on.
//!
//! Transport callbacks push [`Inbound`] messages into one channel; the router
//! drains it and calls the resolver or the SMS gateway. An SMS that matches
//! no event is treated as the answer to the pending synchronous command for
//! that number, if there is one.

use std::sync::Arc;

use tokio::sync::mpsc;

use homegate_domain::error::GatewayError;
use homegate_domain::event::EventFiring;

use crate::event_resolver::EventResolver;
use crate::inbound::Inbound;
use crate::ports::{SmsModem, Storage};
use crate::sms_gateway::SmsGateway;

pub struct Router<S, M> {
    resolver: EventResolver<S>,
    sms: Arc<SmsGateway<S, M>>,
}

impl<S, M> Router<S, M>
where
    S: Storage,
    M: SmsModem,
{
    pub fn new(resolver: EventResolver<S>, sms: Arc<SmsGateway<S, M>>) -> Self {
        Self { resolver, sms }
    }

    /// Handle one message and return the firings it raised.
    ///
    /// # Errors
    ///
    /// Returns a storage error from resolution.
    pub async fn handle(&self, message: Inbound) -> Result<Vec<EventFiring>, GatewayError> {
        match message {
            Inbound::Mqtt {
                address,
                topic,
                payload,
            } => self.resolver.resolve_mqtt(&address, &topic, &payload).await,
            Inbound::Sms { number, body } => {
                let firings = self.resolver.resolve_sms(&number, &body).await?;
                if !firings.is_empty() {
                    return Ok(firings);
                }
                match self.sms.take_answer(&number).await {
                    Some(answer) => self.resolver.process_answer(&answer.command, &body).await,
                    None => {
                        tracing::debug!(%number, "sms matched nothing");
                        Ok(Vec::new())
                    }
                }
            }
            Inbound::SmsDelivery {
                command_id,
                success,
            } => {
                self.sms.delivered(command_id, success).await;
                Ok(Vec::new())
            }
        }
    }

    /// Handle messages until every sender is dropped.
    pub async fn run(&self, mut inbound: mpsc::Receiver<Inbound>) {
        while let Some(message) = inbound.recv().await {
            if let Err(err) = self.handle(message).await {
                tracing::warn!(error = %err, "inbound message failed");
            }
        }
        tracing::debug!("inbound router stopped");
    }
}
