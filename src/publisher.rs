//! `OutputPublisher` (§4.9, C9): atomically swaps the published key→value
//! mapping and notifies subscribers. Built on `tokio::sync::watch`, the same
//! "replace the whole value, subscribers see old-or-new never torn" pattern
//! the pack's configuration-sync engine uses (`onwards_config.rs`'s
//! `watch::Sender<Targets>`).

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

pub type PublishedMap = Arc<BTreeMap<String, String>>;

pub struct OutputPublisher {
    sender: watch::Sender<PublishedMap>,
}

impl Default for OutputPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputPublisher {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(Arc::new(BTreeMap::new()));
        Self { sender }
    }

    /// Replace the exposed mapping atomically and signal observers. Only the
    /// apply phase of `refresh`/`initial_load` calls this; `set_dirty`-style
    /// bookkeeping elsewhere never republishes directly.
    pub fn publish(&self, mapping: BTreeMap<String, String>) {
        // `send` is a no-op send-error only when every receiver (including
        // our own retained handle) has been dropped, which cannot happen
        // here since `self.sender` always holds one.
        let _ = self.sender.send(Arc::new(mapping));
    }

    /// Read-only view of the currently published mapping.
    #[must_use]
    pub fn data(&self) -> PublishedMap {
        self.sender.borrow().clone()
    }

    /// Subscribe to post-publish notifications. Each call to `publish`
    /// results in at most one notification to every outstanding receiver.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PublishedMap> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_replaces_the_map_atomically() {
        let publisher = OutputPublisher::new();
        assert!(publisher.data().is_empty());

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), "1".to_string());
        publisher.publish(map);

        assert_eq!(publisher.data().get("a"), Some(&"1".to_string()));
    }

    #[tokio::test]
    async fn subscribers_see_exactly_one_notification_per_publish() {
        let publisher = OutputPublisher::new();
        let mut rx = publisher.subscribe();

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), "1".to_string());
        publisher.publish(map);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().get("a"), Some(&"1".to_string()));
        assert!(!rx.has_changed().unwrap());
    }
}
