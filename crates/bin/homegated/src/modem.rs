//! Placeholder SMS modem for hosts without a cellular device.

use tokio::sync::mpsc;

use homegate_app::inbound::Inbound;
use homegate_app::ports::SmsModem;
use homegate_domain::error::TransportError;
use homegate_domain::id::CommandId;

/// A modem that never has permission to send or receive.
///
/// The SMS gateway refuses to start with it, and commands routed over SMS
/// fail with [`TransportError::PermissionDenied`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledModem;

impl SmsModem for DisabledModem {
    fn has_permission(&self) -> bool {
        false
    }

    fn register(&self, _inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError> {
        Err(TransportError::PermissionDenied)
    }

    fn unregister(&self) {}

    async fn send(
        &self,
        number: &str,
        _body: &str,
        _receipt: CommandId,
    ) -> Result<(), TransportError> {
        tracing::debug!(%number, "no sms modem available");
        Err(TransportError::PermissionDenied)
    }
}
