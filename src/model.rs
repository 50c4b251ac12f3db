//! Data model: §3 of the spec.
//!
//! `Setting` and friends are plain value types; the invariants they exist to
//! support (change detection by `(key, label, etag)`, case-insensitive
//! `mapped` lookup, `label = None`/`label = Some("")` identity) live in the
//! components that hold these types (`store`, `watcher_set`), not here.

use std::collections::BTreeMap;
use std::time::Instant;

/// An immutable remote setting. Equality for change detection is by
/// `(key, label, etag)` (`value` is allowed to differ only alongside `etag`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub key: String,
    pub label: Option<String>,
    pub value: String,
    pub etag: String,
}

impl Setting {
    #[must_use]
    pub fn identity(&self) -> KeyLabelId {
        KeyLabelId::new(self.key.clone(), self.label.clone())
    }
}

/// `label = None` and `label = Some("")` normalize to the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyLabelId {
    pub key: String,
    pub label: Option<String>,
}

impl KeyLabelId {
    #[must_use]
    pub fn new(key: String, label: Option<String>) -> Self {
        Self {
            key,
            label: normalize_label(label),
        }
    }
}

#[must_use]
pub fn normalize_label(label: Option<String>) -> Option<String> {
    match label {
        None => None,
        Some(l) if l.is_empty() => None,
        Some(l) => Some(l),
    }
}

/// A single-key watcher. `refresh_all = true` means a detected change on this
/// key forces a full reload instead of an incremental delta.
#[derive(Debug, Clone)]
pub struct Watcher {
    pub key: String,
    pub label: Option<String>,
    pub poll_interval: std::time::Duration,
    pub refresh_all: bool,
    pub next_due_at: Instant,
}

impl Watcher {
    #[must_use]
    pub fn new(key: String, label: Option<String>, poll_interval: std::time::Duration, refresh_all: bool) -> Self {
        Self {
            key,
            label: normalize_label(label),
            poll_interval,
            refresh_all,
            next_due_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> KeyLabelId {
        KeyLabelId::new(self.key.clone(), self.label.clone())
    }
}

/// A multi-key watcher. `key_pattern` is either an exact key or a
/// `prefix*` glob (suffix `*` only, per spec).
#[derive(Debug, Clone)]
pub struct PrefixWatcher {
    pub key_pattern: String,
    pub label: Option<String>,
    pub poll_interval: std::time::Duration,
    pub next_due_at: Instant,
}

impl PrefixWatcher {
    #[must_use]
    pub fn new(key_pattern: String, label: Option<String>, poll_interval: std::time::Duration) -> Self {
        Self {
            key_pattern,
            label: normalize_label(label),
            poll_interval,
            next_due_at: Instant::now(),
        }
    }

    /// Whether `key` is covered by this watcher's pattern. Only a trailing
    /// `*` is a wildcard; anything else in the pattern is matched literally.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        match self.key_pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == self.key_pattern,
        }
    }
}

/// Server-side composition of a named snapshot. Only `KeyPartitioned` is
/// accepted by the engine; anything else is a non-failover configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotComposition {
    KeyPartitioned,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub name: String,
    pub composition: SnapshotComposition,
}

/// A server-side filter describing which settings belong in the materialized view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub key_filter: String,
    pub label_filter: Option<String>,
    pub snapshot_name: Option<String>,
}

/// A replica endpoint and its failover bookkeeping.
#[derive(Debug, Clone)]
pub struct Replica {
    pub endpoint: String,
    pub sync_token: Option<String>,
    pub backoff_until: Instant,
    pub consecutive_failures: u32,
}

impl Replica {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            sync_token: None,
            backoff_until: Instant::now(),
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    None,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub key: String,
    pub label: Option<String>,
    pub current: Option<Setting>,
}

impl ChangeRecord {
    #[must_use]
    pub fn identity(&self) -> KeyLabelId {
        KeyLabelId::new(self.key.clone(), self.label.clone())
    }
}

/// A snapshot of store state, mostly useful for tests asserting round-trip laws.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub watched_etags: BTreeMap<(String, Option<String>), String>,
    pub mapped_keys: BTreeMap<String, String>,
    pub published: BTreeMap<String, String>,
}
