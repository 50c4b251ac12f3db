//! `WatcherSet` (§4.4, C4): holds per-key and per-prefix watchers, their poll
//! intervals, and next-due times.

use crate::model::{PrefixWatcher, Watcher};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct WatcherSet {
    watchers: RwLock<Vec<Watcher>>,
    prefix_watchers: RwLock<Vec<PrefixWatcher>>,
}

impl WatcherSet {
    #[must_use]
    pub fn new(watchers: Vec<Watcher>, prefix_watchers: Vec<PrefixWatcher>) -> Self {
        Self {
            watchers: RwLock::new(watchers),
            prefix_watchers: RwLock::new(prefix_watchers),
        }
    }

    /// Single-key watchers due at or before `now`, in registration order.
    pub async fn expired_watchers(&self, now: Instant) -> Vec<Watcher> {
        self.watchers.read().await.iter().filter(|w| w.next_due_at <= now).cloned().collect()
    }

    /// Prefix watchers due at or before `now`, in registration order.
    pub async fn expired_prefix_watchers(&self, now: Instant) -> Vec<PrefixWatcher> {
        self.prefix_watchers.read().await.iter().filter(|w| w.next_due_at <= now).cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.watchers.read().await.is_empty() && self.prefix_watchers.read().await.is_empty()
    }

    /// Every configured single-key watcher, regardless of due time. Used to
    /// populate the watched map on initial load.
    pub async fn all_watchers(&self) -> Vec<Watcher> {
        self.watchers.read().await.clone()
    }

    /// Every configured prefix watcher, regardless of due time.
    pub async fn all_prefix_watchers(&self) -> Vec<PrefixWatcher> {
        self.prefix_watchers.read().await.clone()
    }

    /// Invariant 3: `next_due_at` is monotonically non-decreasing; callers
    /// must only ever move it forward, which these setters enforce.
    pub async fn mark_due(&self, key: &str, label: Option<&str>, at: Instant) {
        let mut watchers = self.watchers.write().await;
        if let Some(w) = watchers.iter_mut().find(|w| w.key == key && w.label.as_deref() == label) {
            w.next_due_at = w.next_due_at.max(at);
        }
    }

    pub async fn mark_prefix_due(&self, key_pattern: &str, label: Option<&str>, at: Instant) {
        let mut watchers = self.prefix_watchers.write().await;
        if let Some(w) = watchers
            .iter_mut()
            .find(|w| w.key_pattern == key_pattern && w.label.as_deref() == label)
        {
            w.next_due_at = w.next_due_at.max(at);
        }
    }

    /// Used by `PushIntake`: mark every watcher due at `at`, regardless of
    /// current `next_due_at` (a push notification always accelerates).
    pub async fn mark_all_due(&self, at: Instant) {
        let mut watchers = self.watchers.write().await;
        for w in watchers.iter_mut() {
            w.next_due_at = at;
        }
        drop(watchers);
        let mut prefix_watchers = self.prefix_watchers.write().await;
        for w in prefix_watchers.iter_mut() {
            w.next_due_at = at;
        }
    }

    /// Called after a successful full refresh: every watcher (single-key and
    /// prefix, per the §9 Open Question resolution) is bumped to
    /// `now + poll_interval`.
    pub async fn bump_all(&self, now: Instant) {
        let mut watchers = self.watchers.write().await;
        for w in watchers.iter_mut() {
            w.next_due_at = w.next_due_at.max(now + w.poll_interval);
        }
        drop(watchers);
        let mut prefix_watchers = self.prefix_watchers.write().await;
        for w in prefix_watchers.iter_mut() {
            w.next_due_at = w.next_due_at.max(now + w.poll_interval);
        }
    }

    /// Bump only the given single-key watchers (the non-`refreshAll` apply path).
    pub async fn bump(&self, keys: &[(String, Option<String>)], now: Instant) {
        let mut watchers = self.watchers.write().await;
        for w in watchers.iter_mut() {
            if keys.iter().any(|(k, l)| k == &w.key && l.as_deref() == w.label.as_deref()) {
                w.next_due_at = w.next_due_at.max(now + w.poll_interval);
            }
        }
    }

    /// Bump only the given prefix watchers (the non-`refreshAll` apply path).
    pub async fn bump_prefix(&self, patterns: &[(String, Option<String>)], now: Instant) {
        let mut watchers = self.prefix_watchers.write().await;
        for w in watchers.iter_mut() {
            if patterns.iter().any(|(p, l)| p == &w.key_pattern && l.as_deref() == w.label.as_deref()) {
                w.next_due_at = w.next_due_at.max(now + w.poll_interval);
            }
        }
    }

    /// The effective poll interval gating refresh attempts: the minimum
    /// across every watcher, or the 30s default when there are none.
    pub async fn effective_poll_interval(&self) -> Duration {
        let watchers = self.watchers.read().await;
        let prefix_watchers = self.prefix_watchers.read().await;
        watchers
            .iter()
            .map(|w| w.poll_interval)
            .chain(prefix_watchers.iter().map(|w| w.poll_interval))
            .min()
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}
