//! The `RemoteClient` capability (§6): the only thing the engine needs from
//! the underlying remote-service client library. Expressed as an
//! `#[async_trait]` capability record, same idiom the corpus uses for
//! `DataFetcher` in `k8s/cache/fetcher.rs`.

use crate::error::Result;
use crate::model::{ChangeRecord, Selector, Setting, Snapshot};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Consumed, not implemented, by the refresh engine. Production code plugs in
/// whatever wire protocol the remote configuration service speaks; the demo
/// binary's `reqwest`-based implementation lives outside the engine's module
/// tree entirely (see `bin/confd/http_client.rs`).
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Paged listing matching `selector`.
    async fn list<'a>(&'a self, selector: &'a Selector) -> Result<BoxStream<'a, Result<Setting>>>;

    /// Listing by server-side snapshot name.
    async fn list_snapshot<'a>(&'a self, name: &'a str) -> Result<BoxStream<'a, Result<Setting>>>;

    /// Fetch a named snapshot's metadata, including its composition.
    async fn get_snapshot(&self, name: &str) -> Result<Snapshot>;

    /// Fetch a single setting, or `None` on a clean 404.
    async fn get(&self, key: &str, label: Option<&str>) -> Result<Option<Setting>>;

    /// Conditional fetch on `known`'s etag: `None` unchanged, `Modified` with
    /// the fresh value when the etag differs, `Deleted` on a 404.
    async fn get_change(&self, known: &Setting) -> Result<ChangeRecord>;
}
