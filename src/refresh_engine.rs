//! `RefreshEngine` (§4.7, C7): the orchestrator. Owns the setting store behind
//! a single lock, drives `initial_load`/`refresh` through the failover
//! executor, applies mapper/adapter transforms, and republishes the result.
//!
//! Grounded on the corpus's `k8s::cache::background_fetcher::BackgroundFetcher`
//! (a loop that polls, detects changes against a held snapshot, and feeds a
//! publish-side cache), generalized from "poll one Kubernetes resource kind"
//! to "poll N watchers and M prefix watchers across a failover replica set".

use crate::adapter::AdapterChain;
use crate::backoff::{BackoffSchedule, StartupDelay};
use crate::client_factory::ClientFactory;
use crate::error::{Error, Result};
use crate::failover::FailoverExecutor;
use crate::model::{ChangeKind, ChangeRecord, PrefixWatcher, Selector, Setting, SnapshotComposition, Watcher};
use crate::publisher::OutputPublisher;
use crate::replica_registry::ReplicaRegistry;
use crate::store::SettingStore;
use crate::watcher_set::WatcherSet;
use futures::StreamExt;
use rand::RngCore;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A `Setting -> Option<Setting>` transform; `None` drops the setting from
/// the mapped view entirely. Applied in registration order.
pub type Mapper = Box<dyn Fn(Setting) -> Option<Setting> + Send + Sync>;

/// Default floor under which an unhandled `initial_load` failure is dampened
/// before propagating, to avoid crash-loop amplification in a supervised
/// process (§9 "crash-loop dampening").
const MIN_DAMPENING: Duration = Duration::from_secs(5);

struct LoadResult {
    mapped: Vec<Setting>,
    watched: Vec<Setting>,
}

enum DetectOutcome {
    Changes(Vec<ChangeRecord>),
    FullReload(LoadResult),
}

pub struct RefreshEngine {
    clients: Arc<dyn ClientFactory>,
    registry: Arc<ReplicaRegistry>,
    watchers: Arc<WatcherSet>,
    store: Mutex<SettingStore>,
    adapters: AdapterChain,
    publisher: OutputPublisher,
    selectors: Vec<Selector>,
    mappers: Vec<Mapper>,
    key_prefixes: Vec<String>,
    backoff: BackoffSchedule,
    refreshing: AtomicBool,
    rng: std::sync::Mutex<Box<dyn RngCore + Send>>,
    initialization_cache_expires: Mutex<Instant>,
    min_dampening: Duration,
    request_tracing_enabled: bool,
}

impl RefreshEngine {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clients: Arc<dyn ClientFactory>,
        registry: Arc<ReplicaRegistry>,
        watchers: Arc<WatcherSet>,
        adapters: AdapterChain,
        selectors: Vec<Selector>,
        mappers: Vec<Mapper>,
        key_prefixes: Vec<String>,
        backoff: BackoffSchedule,
        rng: Box<dyn RngCore + Send>,
        request_tracing_enabled: bool,
    ) -> Self {
        Self {
            clients,
            registry,
            watchers,
            store: Mutex::new(SettingStore::new()),
            adapters,
            publisher: OutputPublisher::new(),
            selectors,
            mappers,
            key_prefixes,
            backoff,
            refreshing: AtomicBool::new(false),
            rng: std::sync::Mutex::new(rng),
            initialization_cache_expires: Mutex::new(Instant::now()),
            min_dampening: MIN_DAMPENING,
            request_tracing_enabled,
        }
    }

    #[must_use]
    pub fn publisher(&self) -> &OutputPublisher {
        &self.publisher
    }

    /// §4.7 step 1: bounded-retry initial population of the store, honoring
    /// `timeout` and the crash-loop dampening floor. When `optional` is true,
    /// every failure category (including deadline exhaustion) is swallowed
    /// and the provider starts with an empty published mapping instead of
    /// propagating.
    pub async fn initial_load(&self, optional: bool, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        let overall_start = Instant::now();
        let deadline = overall_start + timeout;
        let mut attempt: u32 = 0;
        let mut errors = Vec::new();

        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                return self.finish_initial_load(overall_start, cancel, optional, Err(Error::Cancelled)).await;
            }

            match self.try_initialize(cancel).await {
                Ok(()) => return Ok(()),
                Err(err) if !err.is_failoverable() => {
                    return self.finish_initial_load(overall_start, cancel, optional, Err(err)).await;
                }
                Err(err) => errors.push(err),
            }

            let now = Instant::now();
            if now >= deadline {
                let agg = Error::Aggregate(errors);
                return self.finish_initial_load(overall_start, cancel, optional, Err(agg)).await;
            }

            let elapsed = now - overall_start;
            let delay = match self.backoff.startup_delay(elapsed, attempt) {
                StartupDelay::Fixed(d) => d,
                StartupDelay::PostWindow => {
                    let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    self.backoff.exponential_delay(attempt, &mut *rng)
                }
            };
            let remaining = deadline.saturating_duration_since(now);
            let actual_delay = delay.min(remaining);

            tokio::select! {
                () = tokio::time::sleep(actual_delay) => {}
                () = cancel.cancelled() => {
                    return self.finish_initial_load(overall_start, cancel, optional, Err(Error::Cancelled)).await;
                }
            }
        }
    }

    /// Applies the crash-loop dampening floor, then either swallows (when
    /// `optional`) or propagates `outcome`.
    async fn finish_initial_load(
        &self,
        overall_start: Instant,
        cancel: &CancellationToken,
        optional: bool,
        outcome: Result<()>,
    ) -> Result<()> {
        let elapsed = overall_start.elapsed();
        if elapsed < self.min_dampening {
            let remaining = self.min_dampening - elapsed;
            tokio::select! {
                () = tokio::time::sleep(remaining) => {}
                () = cancel.cancelled() => {}
            }
        }
        if optional {
            if let Err(err) = &outcome {
                warn!(error = %err, "optional provider starting with empty mapping after initial load failure");
            }
            return Ok(());
        }
        outcome
    }

    async fn try_initialize(&self, cancel: &CancellationToken) -> Result<()> {
        let replicas = self.registry.available_replicas(Instant::now()).await;
        let executor = FailoverExecutor::new(&self.registry, self.request_tracing_enabled);

        let load_result = executor
            .execute(&replicas, cancel, "initial_load", |replica| async move {
                self.load_all_from_replica(&replica, cancel).await
            })
            .await?;

        self.apply_full_reload(load_result).await;
        Ok(())
    }

    /// §4.7 steps 2-6: non-blocking single-flight refresh. A concurrent call
    /// while one is already in progress is a successful no-op.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<()> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("refresh already in progress, skipping");
            return Ok(());
        }

        let result = self.refresh_locked(cancel).await;
        self.refreshing.store(false, Ordering::Release);

        if matches!(result, Err(Error::Cancelled)) {
            warn!("refresh cancelled");
        }
        result
    }

    /// `tryRefresh` per §6: swallows the error classes a periodic caller
    /// should just retry next cycle, propagates everything else.
    pub async fn try_refresh(&self, cancel: &CancellationToken) -> Result<bool> {
        match self.refresh(cancel).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_try_refresh_expected() => {
                warn!(error = %err, "refresh failed, will retry on next cycle");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn refresh_locked(&self, cancel: &CancellationToken) -> Result<()> {
        let now = Instant::now();
        let expired = self.watchers.expired_watchers(now).await;
        let expired_prefix = self.watchers.expired_prefix_watchers(now).await;
        let loaded = self.store.lock().await.is_loaded();
        let adapters_need_refresh = self.adapters.needs_refresh().await;

        if loaded && expired.is_empty() && expired_prefix.is_empty() && !adapters_need_refresh {
            return Ok(());
        }

        let replicas = self.registry.available_replicas(now).await;
        if replicas.is_empty() {
            warn!("no available replicas, deferring refresh to next cycle");
            return Ok(());
        }

        if !loaded {
            let mut cache_expires = self.initialization_cache_expires.lock().await;
            if *cache_expires > now {
                return Ok(());
            }
            *cache_expires = now + self.watchers.effective_poll_interval().await;
            drop(cache_expires);
            return self.try_initialize(cancel).await;
        }

        let executor = FailoverExecutor::new(&self.registry, self.request_tracing_enabled);
        let outcome = executor
            .execute(&replicas, cancel, "refresh", |replica| {
                self.detect_changes(replica, &expired, &expired_prefix, cancel)
            })
            .await?;

        match outcome {
            DetectOutcome::Changes(changes) => self.apply_changes(&expired, &expired_prefix, changes, now).await,
            DetectOutcome::FullReload(load_result) => self.apply_full_reload_bumping(load_result, now).await,
        }
    }

    async fn detect_changes(
        &self,
        replica: crate::model::Replica,
        expired: &[Watcher],
        expired_prefix: &[PrefixWatcher],
        cancel: &CancellationToken,
    ) -> Result<DetectOutcome> {
        let client = self.clients.client_for(&replica.endpoint).await?;
        let mut changes = Vec::new();

        for w in expired {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let id = w.identity();
            let known = self.store.lock().await.watched_get(&id).cloned();
            let change = if let Some(known) = known {
                client.get_change(&known).await?
            } else {
                match client.get(&w.key, w.label.as_deref()).await? {
                    Some(setting) => ChangeRecord { kind: ChangeKind::Modified, key: w.key.clone(), label: w.label.clone(), current: Some(setting) },
                    None => ChangeRecord { kind: ChangeKind::None, key: w.key.clone(), label: w.label.clone(), current: None },
                }
            };

            if change.kind != ChangeKind::None && w.refresh_all {
                info!(key = w.key, "watched key changed with refresh_all set, reloading everything");
                let load_result = self.load_all_from_replica(&replica, cancel).await?;
                return Ok(DetectOutcome::FullReload(load_result));
            }
            if change.kind != ChangeKind::None {
                changes.push(change);
            }
        }

        for w in expired_prefix {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            changes.extend(self.detect_prefix_changes(client.as_ref(), w, cancel).await?);
        }

        Ok(DetectOutcome::Changes(changes))
    }

    /// Change-collection algorithm for one prefix watcher: list the server's
    /// current membership for the pattern, diff against the previously-known
    /// subset by etag, and emit `Modified`/`Deleted` records. Equal etags mean
    /// no change.
    async fn detect_prefix_changes(
        &self,
        client: &dyn crate::client::RemoteClient,
        w: &PrefixWatcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChangeRecord>> {
        let known = self.store.lock().await.watched_matching_prefix(|k| w.matches(k), w.label.as_deref());
        let mut known_by_key: HashMap<String, Setting> = known.into_iter().map(|s| (s.key.clone(), s)).collect();

        let selector = Selector { key_filter: w.key_pattern.clone(), label_filter: w.label.clone(), snapshot_name: None };
        let mut stream = client.list(&selector).await?;
        let mut changes = Vec::new();
        let mut seen = HashSet::new();

        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let setting = item?;
            seen.insert(setting.key.clone());
            match known_by_key.get(&setting.key) {
                Some(old) if old.etag == setting.etag => {}
                _ => changes.push(ChangeRecord {
                    kind: ChangeKind::Modified,
                    key: setting.key.clone(),
                    label: setting.label.clone(),
                    current: Some(setting),
                }),
            }
        }

        for (key, old) in known_by_key.drain() {
            if !seen.contains(&key) {
                changes.push(ChangeRecord { kind: ChangeKind::Deleted, key, label: old.label.clone(), current: None });
            }
        }

        Ok(changes)
    }

    /// Loads every selector's matching settings plus the current value of
    /// every configured watcher's key, from one replica. Used by both
    /// `initial_load` and the `refresh_all` full-reload path.
    async fn load_all_from_replica(&self, replica: &crate::model::Replica, cancel: &CancellationToken) -> Result<LoadResult> {
        let client = self.clients.client_for(&replica.endpoint).await?;
        let mut mapped = Vec::new();

        for selector in &self.selectors {
            if let Some(snapshot_name) = &selector.snapshot_name {
                let snapshot = client.get_snapshot(snapshot_name).await?;
                if snapshot.composition != SnapshotComposition::KeyPartitioned {
                    return Err(Error::InvalidConfig(format!(
                        "snapshot '{snapshot_name}' is not key-partitioned, cannot be used for failover"
                    )));
                }
                let mut stream = client.list_snapshot(snapshot_name).await?;
                while let Some(item) = stream.next().await {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    mapped.push(item?);
                }
            } else {
                let mut stream = client.list(selector).await?;
                while let Some(item) = stream.next().await {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    mapped.push(item?);
                }
            }
        }

        let mut watched = Vec::new();
        for w in self.watchers.all_watchers().await {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(setting) = client.get(&w.key, w.label.as_deref()).await? {
                watched.push(setting);
            }
        }
        for w in self.watchers.all_prefix_watchers().await {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let selector = Selector { key_filter: w.key_pattern.clone(), label_filter: w.label.clone(), snapshot_name: None };
            let mut stream = client.list(&selector).await?;
            while let Some(item) = stream.next().await {
                watched.push(item?);
            }
        }

        Ok(LoadResult { mapped, watched })
    }

    fn apply_mappers(&self, mut setting: Setting) -> Option<Setting> {
        for mapper in &self.mappers {
            setting = mapper(setting)?;
        }
        Some(setting)
    }

    async fn apply_full_reload(&self, load_result: LoadResult) {
        let mapped = load_result.mapped.into_iter().filter_map(|s| self.apply_mappers(s));
        {
            let mut store = self.store.lock().await;
            store.mapped_replace(mapped);
            store.watched_replace(load_result.watched);
            store.mark_loaded();
        }
        self.adapters.invalidate(None).await;
        self.watchers.bump_all(Instant::now()).await;
        if let Err(err) = self.republish().await {
            warn!(error = %err, "republish failed after initial load");
        }
    }

    async fn apply_full_reload_bumping(&self, load_result: LoadResult, now: Instant) -> Result<()> {
        let mapped = load_result.mapped.into_iter().filter_map(|s| self.apply_mappers(s));
        {
            let mut store = self.store.lock().await;
            store.mapped_replace(mapped);
            store.watched_replace(load_result.watched);
        }
        self.adapters.invalidate(None).await;
        self.watchers.bump_all(now).await;
        self.republish().await
    }

    async fn apply_changes(
        &self,
        expired: &[Watcher],
        expired_prefix: &[PrefixWatcher],
        changes: Vec<ChangeRecord>,
        now: Instant,
    ) -> Result<()> {
        let keys: Vec<(String, Option<String>)> = expired.iter().map(|w| (w.key.clone(), w.label.clone())).collect();
        let patterns: Vec<(String, Option<String>)> =
            expired_prefix.iter().map(|w| (w.key_pattern.clone(), w.label.clone())).collect();
        self.watchers.bump(&keys, now).await;
        self.watchers.bump_prefix(&patterns, now).await;

        let mut any_applied = false;
        {
            let mut store = self.store.lock().await;
            for change in &changes {
                match change.kind {
                    ChangeKind::Modified => {
                        if let Some(current) = &change.current {
                            store.watched_put(current.clone());
                            match self.apply_mappers(current.clone()) {
                                Some(mapped) => store.mapped_put(mapped),
                                None => store.mapped_remove(&current.key),
                            }
                        }
                        any_applied = true;
                    }
                    ChangeKind::Deleted => {
                        store.watched_remove(&change.identity());
                        store.mapped_remove(&change.key);
                        any_applied = true;
                    }
                    ChangeKind::None => {}
                }
            }
        }

        for change in &changes {
            if change.kind != ChangeKind::None {
                self.adapters.invalidate(change.current.as_ref()).await;
            }
        }

        if any_applied || self.adapters.needs_refresh().await {
            self.republish().await?;
        }
        Ok(())
    }

    async fn republish(&self) -> Result<()> {
        let values = self.store.lock().await.mapped_values();
        let mut published = BTreeMap::new();
        for setting in &values {
            let pairs = self
                .adapters
                .process(setting)
                .await
                .map_err(|e| Error::AdapterFailure(e.to_string()))?;
            for (key, value) in pairs {
                published.insert(self.strip_prefix(&key), value);
            }
        }
        self.publisher.publish(published);
        Ok(())
    }

    /// First matching configured prefix wins, case-insensitively; unmatched
    /// keys pass through unchanged. `key.get(..prefix.len())` returns `None`
    /// both when `key` is too short and when `prefix.len()` falls inside a
    /// multibyte char, so this never slices off a char boundary.
    fn strip_prefix(&self, key: &str) -> String {
        for prefix in &self.key_prefixes {
            if let Some(head) = key.get(..prefix.len()) {
                if head.eq_ignore_ascii_case(prefix) {
                    return key[prefix.len()..].to_string();
                }
            }
        }
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterChain;
    use crate::client::RemoteClient;
    use crate::client_factory::SingleClientFactory;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use rand::rngs::mock::StepRng;
    use std::sync::Mutex as StdMutex;

    struct FakeClient {
        settings: StdMutex<Vec<Setting>>,
    }

    #[async_trait]
    impl RemoteClient for FakeClient {
        async fn list<'a>(&'a self, selector: &'a Selector) -> Result<BoxStream<'a, Result<Setting>>> {
            let prefix = selector.key_filter.trim_end_matches('*').to_string();
            let items: Vec<Result<Setting>> = self
                .settings
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.key.starts_with(&prefix))
                .cloned()
                .map(Ok)
                .collect();
            Ok(stream::iter(items).boxed())
        }

        async fn list_snapshot<'a>(&'a self, _name: &'a str) -> Result<BoxStream<'a, Result<Setting>>> {
            Ok(stream::iter(Vec::<Result<Setting>>::new()).boxed())
        }

        async fn get_snapshot(&self, name: &str) -> Result<crate::model::Snapshot> {
            Ok(crate::model::Snapshot { name: name.to_string(), composition: SnapshotComposition::KeyPartitioned })
        }

        async fn get(&self, key: &str, label: Option<&str>) -> Result<Option<Setting>> {
            Ok(self.settings.lock().unwrap().iter().find(|s| s.key == key && s.label.as_deref() == label).cloned())
        }

        async fn get_change(&self, known: &Setting) -> Result<ChangeRecord> {
            let current = self.settings.lock().unwrap().iter().find(|s| s.key == known.key && s.label == known.label).cloned();
            match current {
                None => Ok(ChangeRecord { kind: ChangeKind::Deleted, key: known.key.clone(), label: known.label.clone(), current: None }),
                Some(s) if s.etag == known.etag => Ok(ChangeRecord { kind: ChangeKind::None, key: known.key.clone(), label: known.label.clone(), current: None }),
                Some(s) => Ok(ChangeRecord { kind: ChangeKind::Modified, key: s.key.clone(), label: s.label.clone(), current: Some(s) }),
            }
        }
    }

    fn setting(key: &str, value: &str, etag: &str) -> Setting {
        Setting { key: key.into(), label: None, value: value.into(), etag: etag.into() }
    }

    fn engine(client: Arc<FakeClient>, watchers: Arc<WatcherSet>) -> RefreshEngine {
        let registry = Arc::new(ReplicaRegistry::with_rng(vec!["r1".into()], BackoffSchedule::default(), Box::new(StepRng::new(0, 1))));
        RefreshEngine::new(
            Arc::new(SingleClientFactory(client)),
            registry,
            watchers,
            AdapterChain::new(vec![]),
            vec![Selector { key_filter: "app/*".into(), label_filter: None, snapshot_name: None }],
            vec![],
            vec![],
            BackoffSchedule::default(),
            Box::new(StepRng::new(0, 1)),
            false,
        )
    }

    #[test]
    fn strip_prefix_does_not_panic_on_a_multibyte_boundary() {
        let registry = Arc::new(ReplicaRegistry::with_rng(
            vec!["r1".into()],
            BackoffSchedule::default(),
            Box::new(StepRng::new(0, 1)),
        ));
        let client: Arc<FakeClient> = Arc::new(FakeClient { settings: StdMutex::new(vec![]) });
        let eng = RefreshEngine::new(
            Arc::new(SingleClientFactory(client)),
            registry,
            Arc::new(WatcherSet::new(vec![], vec![])),
            AdapterChain::new(vec![]),
            vec![],
            vec![],
            vec!["abc".into()],
            BackoffSchedule::default(),
            Box::new(StepRng::new(0, 1)),
            false,
        );

        // "ab\u{e9}" has a 2-byte char at byte offset 2, so a prefix of byte
        // length 3 would slice mid-character if compared with raw indexing.
        assert_eq!(eng.strip_prefix("ab\u{e9}"), "ab\u{e9}");
        assert_eq!(eng.strip_prefix("abcdef"), "def");
    }

    #[tokio::test]
    async fn request_tracing_enabled_does_not_change_the_outcome() {
        let client = Arc::new(FakeClient { settings: StdMutex::new(vec![setting("app/a", "1", "e1")]) });
        let watchers = Arc::new(WatcherSet::new(vec![], vec![]));
        let registry = Arc::new(ReplicaRegistry::with_rng(
            vec!["r1".into()],
            BackoffSchedule::default(),
            Box::new(StepRng::new(0, 1)),
        ));
        let eng = RefreshEngine::new(
            Arc::new(SingleClientFactory(client)),
            registry,
            watchers,
            AdapterChain::new(vec![]),
            vec![Selector { key_filter: "app/*".into(), label_filter: None, snapshot_name: None }],
            vec![],
            vec![],
            BackoffSchedule::default(),
            Box::new(StepRng::new(0, 1)),
            true,
        );
        let cancel = CancellationToken::new();

        eng.initial_load(false, Duration::from_secs(5), &cancel).await.unwrap();

        assert_eq!(eng.publisher().data().get("app/a"), Some(&"1".to_string()));
    }

    #[tokio::test]
    async fn initial_load_populates_and_publishes() {
        let client = Arc::new(FakeClient { settings: StdMutex::new(vec![setting("app/a", "1", "e1")]) });
        let watchers = Arc::new(WatcherSet::new(vec![], vec![]));
        let eng = engine(client, watchers);
        let cancel = CancellationToken::new();

        eng.initial_load(false, Duration::from_secs(5), &cancel).await.unwrap();

        let data = eng.publisher().data();
        assert_eq!(data.get("app/a"), Some(&"1".to_string()));
    }

    #[tokio::test]
    async fn refresh_is_a_no_op_until_a_watcher_is_due() {
        let client = Arc::new(FakeClient { settings: StdMutex::new(vec![setting("app/a", "1", "e1")]) });
        let watcher = Watcher::new("app/a".into(), None, Duration::from_secs(9999), false);
        let watchers = Arc::new(WatcherSet::new(vec![watcher], vec![]));
        let eng = engine(client.clone(), watchers);
        let cancel = CancellationToken::new();
        eng.initial_load(false, Duration::from_secs(5), &cancel).await.unwrap();

        client.settings.lock().unwrap()[0] = setting("app/a", "2", "e2");
        eng.refresh(&cancel).await.unwrap();

        assert_eq!(eng.publisher().data().get("app/a"), Some(&"1".to_string()));
    }

    #[tokio::test]
    async fn refresh_all_on_a_changed_watcher_triggers_full_reload() {
        let client = Arc::new(FakeClient { settings: StdMutex::new(vec![setting("app/a", "1", "e1")]) });
        let mut watcher = Watcher::new("app/a".into(), None, Duration::from_secs(30), true);
        watcher.next_due_at = Instant::now();
        let watchers = Arc::new(WatcherSet::new(vec![watcher], vec![]));
        let eng = engine(client.clone(), watchers);
        let cancel = CancellationToken::new();
        eng.initial_load(false, Duration::from_secs(5), &cancel).await.unwrap();

        client.settings.lock().unwrap().push(setting("app/b", "2", "e1"));
        client.settings.lock().unwrap()[0] = setting("app/a", "1-new", "e2");
        eng.watchers_for_test().mark_due("app/a", None, Instant::now()).await;
        eng.refresh(&cancel).await.unwrap();

        let data = eng.publisher().data();
        assert_eq!(data.get("app/a"), Some(&"1-new".to_string()));
        assert_eq!(data.get("app/b"), Some(&"2".to_string()));
    }

    #[tokio::test]
    async fn concurrent_refresh_calls_are_single_flight() {
        let client = Arc::new(FakeClient { settings: StdMutex::new(vec![setting("app/a", "1", "e1")]) });
        let watchers = Arc::new(WatcherSet::new(vec![], vec![]));
        let eng = Arc::new(engine(client, watchers));
        let cancel = CancellationToken::new();
        eng.initial_load(false, Duration::from_secs(5), &cancel).await.unwrap();

        eng.refreshing.store(true, Ordering::SeqCst);
        let result = eng.refresh(&cancel).await;
        eng.refreshing.store(false, Ordering::SeqCst);

        assert!(result.is_ok());
    }

    impl RefreshEngine {
        fn watchers_for_test(&self) -> &WatcherSet {
            &self.watchers
        }
    }
}
