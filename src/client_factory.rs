//! Binds the `RemoteClient` capability to a specific replica endpoint.
//!
//! The engine's `FailoverExecutor` hands a `Replica` to each attempt; a
//! `ClientFactory` is how it turns that into a client instance that actually
//! talks to the replica's endpoint. `CachingClientFactory` lazily builds and
//! caches one client per endpoint, the same lifecycle pattern the teacher's
//! `k8s::client_manager::K8sClientManager` uses for its singleton Kubernetes
//! client (get-or-create under a read lock, upgrade to a write lock only on
//! miss).

use crate::client::RemoteClient;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn client_for(&self, endpoint: &str) -> Result<Arc<dyn RemoteClient>>;
}

/// Wraps a single constructor function and caches its results per endpoint.
pub struct CachingClientFactory<F> {
    build: F,
    cache: RwLock<HashMap<String, Arc<dyn RemoteClient>>>,
}

impl<F> CachingClientFactory<F>
where
    F: Fn(&str) -> Result<Arc<dyn RemoteClient>> + Send + Sync,
{
    #[must_use]
    pub fn new(build: F) -> Self {
        Self { build, cache: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl<F> ClientFactory for CachingClientFactory<F>
where
    F: Fn(&str) -> Result<Arc<dyn RemoteClient>> + Send + Sync,
{
    async fn client_for(&self, endpoint: &str) -> Result<Arc<dyn RemoteClient>> {
        {
            let cache = self.cache.read().await;
            if let Some(client) = cache.get(endpoint) {
                return Ok(client.clone());
            }
        }
        debug!(endpoint, "constructing client for new replica endpoint");
        let client = (self.build)(endpoint)?;
        self.cache.write().await.insert(endpoint.to_string(), client.clone());
        Ok(client)
    }
}

/// A factory that always hands back the same client regardless of endpoint.
/// The common case in tests, where a single simulator stands in for every
/// replica.
pub struct SingleClientFactory(pub Arc<dyn RemoteClient>);

#[async_trait]
impl ClientFactory for SingleClientFactory {
    async fn client_for(&self, _endpoint: &str) -> Result<Arc<dyn RemoteClient>> {
        Ok(self.0.clone())
    }
}
