//! Per-client set of subscribed topics.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::sync::lock;

/// Topics a client is subscribed to.
///
/// Clients call [`SubscriptionSet::insert`] before issuing a subscribe and
/// skip the call when it returns `false`, so each topic is subscribed once.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    topics: Mutex<HashSet<String>>,
}

impl SubscriptionSet {
    /// Record `topic`. Returns `true` if it was not subscribed yet.
    pub fn insert(&self, topic: &str) -> bool {
        lock(&self.topics).insert(topic.to_string())
    }

    /// Forget `topic`. Returns `true` if it was subscribed.
    pub fn remove(&self, topic: &str) -> bool {
        lock(&self.topics).remove(topic)
    }

    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        lock(&self.topics).contains(topic)
    }

    /// Snapshot of every subscribed topic, used to resubscribe after a reconnect.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        lock(&self.topics).iter().cloned().collect()
    }

    pub fn clear(&self) {
        lock(&self.topics).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_accept_topic_only_once() {
        let set = SubscriptionSet::default();
        assert!(set.insert("lamp/state"));
        assert!(!set.insert("lamp/state"));
        assert_eq!(set.topics(), vec!["lamp/state".to_string()]);
    }

    #[test]
    fn should_accept_topic_again_after_removal() {
        let set = SubscriptionSet::default();
        set.insert("lamp/state");
        assert!(set.remove("lamp/state"));
        assert!(!set.remove("lamp/state"));
        assert!(set.insert("lamp/state"));
    }

    #[test]
    fn should_clear_all_topics() {
        let set = SubscriptionSet::default();
        set.insert("a");
        set.insert("b");
        set.clear();
        assert!(!set.contains("a"));
        assert!(set.topics().is_empty());
    }
}
