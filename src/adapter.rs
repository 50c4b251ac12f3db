//! `AdapterChain` (§4.6, C6): ordered transforms applied to each setting
//! before publication (secret references, feature flags, ...). Expressed as
//! a capability trait rather than an inheritance hierarchy, per Design Note
//! "adapter polymorphism".

use crate::model::Setting;
use async_trait::async_trait;

#[async_trait]
pub trait Adapter: Send + Sync {
    fn can_process(&self, setting: &Setting) -> bool;

    /// May fan a single setting out to multiple published entries.
    async fn process(&self, setting: &Setting) -> crate::error::Result<Vec<(String, String)>>;

    /// Per-entry invalidation when `setting` is `Some`, global invalidation
    /// (e.g. an expiring secret cache) when `None`.
    async fn invalidate(&self, setting: Option<&Setting>);

    /// Whether this adapter has pending state that warrants another refresh
    /// even absent a new etag (e.g. a secret whose TTL just expired).
    async fn needs_refresh(&self) -> bool {
        false
    }
}

/// Fixed-order chain of adapters, constructed once at provider startup.
pub struct AdapterChain {
    adapters: Vec<Box<dyn Adapter>>,
}

impl AdapterChain {
    #[must_use]
    pub fn new(adapters: Vec<Box<dyn Adapter>>) -> Self {
        Self { adapters }
    }

    /// The default expansion (singleton `[(key, value)]`) when no adapter
    /// claims the setting.
    pub async fn process(&self, setting: &Setting) -> crate::error::Result<Vec<(String, String)>> {
        for adapter in &self.adapters {
            if adapter.can_process(setting) {
                return adapter.process(setting).await;
            }
        }
        Ok(vec![(setting.key.clone(), setting.value.clone())])
    }

    pub async fn invalidate(&self, setting: Option<&Setting>) {
        for adapter in &self.adapters {
            adapter.invalidate(setting).await;
        }
    }

    pub async fn needs_refresh(&self) -> bool {
        for adapter in &self.adapters {
            if adapter.needs_refresh().await {
                return true;
            }
        }
        false
    }
}
