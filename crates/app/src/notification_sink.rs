//! In-process notification sink backed by tokio broadcast channels.

use tokio::sync::broadcast;

use homegate_domain::event::EventFiring;
use homegate_domain::notification::Notification;

/// Two broadcast streams: user notifications and resolved event firings.
///
/// Publishing succeeds even when there are no active subscribers
/// (the message is simply dropped).
#[derive(Debug, Clone)]
pub struct NotificationSink {
    notifications: broadcast::Sender<Notification>,
    firings: broadcast::Sender<EventFiring>,
}

impl NotificationSink {
    /// Create a new sink with the given capacity for each channel.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (notifications, _) = broadcast::channel(capacity);
        let (firings, _) = broadcast::channel(capacity);
        Self {
            notifications,
            firings,
        }
    }

    pub fn notify(&self, notification: Notification) {
        tracing::info!(
            title = %notification.title,
            content = %notification.content,
            "notification"
        );
        // send fails only when nobody listens
        let _ = self.notifications.send(notification);
    }

    pub fn fire(&self, firing: EventFiring) {
        tracing::debug!(event_id = %firing.event.id, value = ?firing.value, "event fired");
        let _ = self.firings.send(firing);
    }

    /// Receive notifications published after this call.
    #[must_use]
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Receive firings published after this call.
    #[must_use]
    pub fn subscribe_firings(&self) -> broadcast::Receiver<EventFiring> {
        self.firings.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homegate_domain::event::Event;
    use homegate_domain::id::{ConnectionId, DeviceId};

    #[tokio::test]
    async fn should_deliver_notification_to_every_subscriber() {
        let sink = NotificationSink::new(16);
        let mut rx1 = sink.subscribe_notifications();
        let mut rx2 = sink.subscribe_notifications();

        sink.notify(Notification::new("Lamp", "on"));

        assert_eq!(rx1.recv().await.unwrap().content, "on");
        assert_eq!(rx2.recv().await.unwrap().content, "on");
    }

    #[tokio::test]
    async fn should_keep_firings_separate_from_notifications() {
        let sink = NotificationSink::new(16);
        let mut notifications = sink.subscribe_notifications();
        let mut firings = sink.subscribe_firings();

        let event = Event::synthetic_set(ConnectionId::new(), DeviceId::new(), "t");
        sink.fire(EventFiring::new(event, Some("1".to_string())));

        assert_eq!(firings.recv().await.unwrap().value.as_deref(), Some("1"));
        assert!(notifications.try_recv().is_err());
    }

    #[test]
    fn should_succeed_when_no_subscribers() {
        let sink = NotificationSink::new(16);
        sink.notify(Notification::new("nobody", "listens"));
    }

    #[tokio::test]
    async fn should_not_deliver_messages_published_before_subscription() {
        let sink = NotificationSink::new(16);
        sink.notify(Notification::new("early", "dropped"));
        let mut rx = sink.subscribe_notifications();
        sink.notify(Notification::new("late", "kept"));
        assert_eq!(rx.recv().await.unwrap().title, "late");
    }
}
