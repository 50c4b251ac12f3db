//! `SettingStore` (§4.5, C5): the last-known mapped settings and the
//! last-known watched settings (by key+label identity), used for change
//! detection. Not thread-safe by itself; it is protected by the refresh
//! single-flight gate in `refresh_engine`, matching the spec's framing that
//! this component has no internal locking of its own.

use crate::model::{KeyLabelId, Setting};
use std::collections::HashMap;

#[derive(Default)]
pub struct SettingStore {
    /// Addressed by `KeyLabelId` (label-normalized).
    watched: HashMap<KeyLabelId, Setting>,
    /// Addressed by key, compared case-insensitively on lookup but preserving
    /// server casing for storage and publish (§9 "case sensitivity").
    mapped: HashMap<String, Setting>,
    loaded: bool,
}

impl SettingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    #[must_use]
    pub fn watched_get(&self, id: &KeyLabelId) -> Option<&Setting> {
        self.watched.get(id)
    }

    pub fn watched_put(&mut self, setting: Setting) {
        self.watched.insert(setting.identity(), setting);
    }

    pub fn watched_remove(&mut self, id: &KeyLabelId) {
        self.watched.remove(id);
    }

    #[must_use]
    pub fn watched_matching_prefix(&self, matches: impl Fn(&str) -> bool, label: Option<&str>) -> Vec<Setting> {
        self.watched
            .values()
            .filter(|s| matches(&s.key) && s.label.as_deref() == label)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn mapped_get(&self, key: &str) -> Option<&Setting> {
        let key_lower = key.to_ascii_lowercase();
        self.mapped.iter().find(|(k, _)| k.to_ascii_lowercase() == key_lower).map(|(_, v)| v)
    }

    pub fn mapped_put(&mut self, setting: Setting) {
        // Preserve server casing: if a case-insensitively-equal key already
        // exists under different casing, replace that entry rather than
        // inserting a duplicate.
        let key_lower = setting.key.to_ascii_lowercase();
        if let Some(existing_key) = self.mapped.keys().find(|k| k.to_ascii_lowercase() == key_lower).cloned() {
            if existing_key != setting.key {
                self.mapped.remove(&existing_key);
            }
        }
        self.mapped.insert(setting.key.clone(), setting);
    }

    pub fn mapped_remove(&mut self, key: &str) {
        let key_lower = key.to_ascii_lowercase();
        if let Some(existing_key) = self.mapped.keys().find(|k| k.to_ascii_lowercase() == key_lower).cloned() {
            self.mapped.remove(&existing_key);
        }
    }

    pub fn mapped_clear(&mut self) {
        self.mapped.clear();
    }

    pub fn mapped_replace(&mut self, settings: impl IntoIterator<Item = Setting>) {
        self.mapped.clear();
        for s in settings {
            self.mapped_put(s);
        }
    }

    pub fn watched_replace(&mut self, settings: impl IntoIterator<Item = Setting>) {
        self.watched.clear();
        for s in settings {
            self.watched_put(s);
        }
    }

    #[must_use]
    pub fn mapped_values(&self) -> Vec<Setting> {
        self.mapped.values().cloned().collect()
    }

    #[must_use]
    pub fn watched_snapshot_etags(&self) -> std::collections::BTreeMap<(String, Option<String>), String> {
        self.watched
            .values()
            .map(|s| ((s.key.clone(), s.label.clone()), s.etag.clone()))
            .collect()
    }
}
