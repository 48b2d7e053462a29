//! SMS modem port: the platform send/receive primitive.

use std::future::Future;

use tokio::sync::mpsc;

use homegate_domain::error::TransportError;
use homegate_domain::id::CommandId;

use crate::inbound::Inbound;

/// Sends and receives text messages.
///
/// Received messages and delivery receipts are pushed into the channel given
/// to [`register`](Self::register) as [`Inbound::Sms`] and
/// [`Inbound::SmsDelivery`].
pub trait SmsModem: Send + Sync + 'static {
    /// Whether the host granted send and receive permission.
    fn has_permission(&self) -> bool;

    /// Start pushing received messages and receipts into `inbound`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the receivers cannot be installed.
    fn register(&self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError>;

    fn unregister(&self);

    /// Send `body` to `number`. The delivery receipt carries `receipt`.
    fn send(
        &self,
        number: &str,
        body: &str,
        receipt: CommandId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
