//! `Provider` (§6): the public facade. Wraps a `RefreshEngine` with the
//! pieces a caller actually constructs one from (a `RemoteClient` factory
//! and a `ProviderOptions`), and exposes only the operations an embedding
//! application needs.

use crate::adapter::AdapterChain;
use crate::client_factory::ClientFactory;
use crate::config::ProviderOptions;
use crate::error::Result;
use crate::publisher::PublishedMap;
use crate::push::{PushIntake, PushNotification};
use crate::refresh_engine::RefreshEngine;
use crate::replica_registry::ReplicaRegistry;
use crate::watcher_set::WatcherSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub struct Provider {
    engine: RefreshEngine,
    registry: Arc<ReplicaRegistry>,
    watchers: Arc<WatcherSet>,
    cancel: CancellationToken,
}

impl Provider {
    #[must_use]
    pub fn new(clients: Arc<dyn ClientFactory>, options: ProviderOptions) -> Self {
        let registry = Arc::new(ReplicaRegistry::new(options.endpoints, options.backoff.clone()));
        let watchers = Arc::new(WatcherSet::new(options.change_watchers, options.prefix_watchers));
        let engine = RefreshEngine::new(
            clients,
            registry.clone(),
            watchers.clone(),
            AdapterChain::new(options.adapters),
            options.selectors,
            options.mappers,
            options.key_prefixes,
            options.backoff,
            Box::new(rand::thread_rng()),
            options.request_tracing_enabled,
        );
        Self { engine, registry, watchers, cancel: CancellationToken::new() }
    }

    /// Populates the store for the first time. Call once at startup before
    /// reading `data()`.
    pub async fn load(&self, optional: bool, timeout: std::time::Duration) -> Result<()> {
        self.engine.initial_load(optional, timeout, &self.cancel).await
    }

    /// Drives one refresh cycle. Safe to call from a timer loop; concurrent
    /// calls collapse into the in-flight one.
    pub async fn refresh(&self) -> Result<()> {
        self.engine.refresh(&self.cancel).await
    }

    /// As `refresh`, but swallows the error classes a polling loop should
    /// just retry on the next tick instead of propagating.
    pub async fn try_refresh(&self) -> Result<bool> {
        self.engine.try_refresh(&self.cancel).await
    }

    /// Feeds a push notification (e.g. from an Event Grid webhook) into the
    /// watcher set, accelerating the next scheduled refresh.
    pub async fn process_push_notification(&self, notification: &PushNotification) -> Result<()> {
        let mut rng = rand::thread_rng();
        PushIntake::new(&self.registry, &self.watchers).process(notification, &mut rng).await
    }

    /// The currently published key -> value mapping.
    #[must_use]
    pub fn data(&self) -> PublishedMap {
        self.engine.publisher().data()
    }

    /// Subscribe to be notified after every successful publish.
    #[must_use]
    pub fn on_reload(&self) -> watch::Receiver<PublishedMap> {
        self.engine.publisher().subscribe()
    }

    /// Cancels any in-flight `load`/`refresh` and causes future calls to
    /// return `Error::Cancelled` promptly at their next suspension point.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RemoteClient;
    use crate::client_factory::SingleClientFactory;
    use crate::config::ProviderOptionsBuilder;
    use crate::error::Result as EngineResult;
    use crate::model::{ChangeRecord, Selector, Setting, Snapshot};
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};

    struct OneSettingClient;

    #[async_trait]
    impl RemoteClient for OneSettingClient {
        async fn list<'a>(&'a self, _selector: &'a Selector) -> EngineResult<BoxStream<'a, EngineResult<Setting>>> {
            let setting = Setting { key: "app/name".into(), label: None, value: "demo".into(), etag: "e1".into() };
            Ok(stream::iter(vec![Ok(setting)]).boxed())
        }

        async fn list_snapshot<'a>(&'a self, _name: &'a str) -> EngineResult<BoxStream<'a, EngineResult<Setting>>> {
            Ok(stream::iter(Vec::new()).boxed())
        }

        async fn get_snapshot(&self, name: &str) -> EngineResult<Snapshot> {
            Ok(Snapshot { name: name.to_string(), composition: crate::model::SnapshotComposition::KeyPartitioned })
        }

        async fn get(&self, _key: &str, _label: Option<&str>) -> EngineResult<Option<Setting>> {
            Ok(None)
        }

        async fn get_change(&self, known: &Setting) -> EngineResult<ChangeRecord> {
            Ok(ChangeRecord { kind: crate::model::ChangeKind::None, key: known.key.clone(), label: known.label.clone(), current: None })
        }
    }

    #[tokio::test]
    async fn load_then_data_reflects_the_published_mapping() {
        let clients = Arc::new(SingleClientFactory(Arc::new(OneSettingClient)));
        let options = ProviderOptionsBuilder::new()
            .endpoint("https://cfg.example.com")
            .select(Selector { key_filter: "app/*".into(), label_filter: None, snapshot_name: None })
            .startup_timeout(std::time::Duration::from_secs(5))
            .build();
        let provider = Provider::new(clients, options);

        provider.load(false, std::time::Duration::from_secs(5)).await.unwrap();

        assert_eq!(provider.data().get("app/name"), Some(&"demo".to_string()));
    }
}
