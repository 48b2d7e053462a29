//! Messages handed from transport callbacks to the inbound router.

use homegate_domain::id::CommandId;

/// A transport observation waiting to be handled by the router task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A publish received from a remote broker or the local broker.
    Mqtt {
        address: String,
        topic: String,
        payload: String,
    },
    /// A text message received by the modem.
    Sms { number: String, body: String },
    /// A delivery receipt for an SMS sent with `command_id` as receipt token.
    SmsDelivery { command_id: CommandId, success: bool },
}

impl Inbound {
    /// Build an MQTT message from raw payload bytes.
    ///
    /// Payloads that are not UTF-8 are dropped.
    #[must_use]
    pub fn mqtt(
        address: impl Into<String>,
        topic: impl Into<String>,
        payload: &[u8],
    ) -> Option<Self> {
        let topic = topic.into();
        match std::str::from_utf8(payload) {
            Ok(text) => Some(Self::Mqtt {
                address: address.into(),
                topic,
                payload: text.to_string(),
            }),
            Err(error) => {
                tracing::trace!(%topic, %error, "dropping non UTF-8 payload");
                None
            }
        }
    }
}
