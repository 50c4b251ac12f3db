//! `ProviderOptions` (§6): everything the engine needs to be constructed,
//! gathered by the caller (no implicit environment reads). Built the way the
//! corpus's CLI config types are: a plain struct assembled by a builder, not
//! a `config`-crate layered merge (this engine has no file/env sources to
//! merge; see Non-goals).

use crate::adapter::Adapter;
use crate::backoff::BackoffSchedule;
use crate::model::{PrefixWatcher, Selector, Watcher};
use crate::refresh_engine::Mapper;
use std::time::Duration;

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(100);

/// Minimal `Endpoint=...;Id=...;Secret=...` connection-string extraction.
/// Full credential parsing (HMAC secret, id) is out of scope; only the
/// endpoint is needed to seed the replica registry.
#[must_use]
pub fn endpoint_from_connection_string(connection_string: &str) -> Option<String> {
    connection_string.split(';').find_map(|part| part.strip_prefix("Endpoint=")).map(str::to_string)
}

pub struct ProviderOptions {
    pub endpoints: Vec<String>,
    pub selectors: Vec<Selector>,
    pub change_watchers: Vec<Watcher>,
    pub prefix_watchers: Vec<PrefixWatcher>,
    pub mappers: Vec<Mapper>,
    pub key_prefixes: Vec<String>,
    pub adapters: Vec<Box<dyn Adapter>>,
    pub startup_timeout: Duration,
    pub optional: bool,
    /// Wraps each replica attempt in a `tracing::Span` naming the endpoint
    /// and operation, consumed by `FailoverExecutor::execute`.
    pub request_tracing_enabled: bool,
    pub backoff: BackoffSchedule,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            selectors: vec![Selector::default()],
            change_watchers: Vec::new(),
            prefix_watchers: Vec::new(),
            mappers: Vec::new(),
            key_prefixes: Vec::new(),
            adapters: Vec::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            optional: false,
            request_tracing_enabled: false,
            backoff: BackoffSchedule::default(),
        }
    }
}

/// Fluent builder matching the shape of the corpus's `K8sClientConfig`
/// builder (`k8s/cache/config.rs`): small with-methods over a plain struct,
/// no derive-builder machinery.
pub struct ProviderOptionsBuilder {
    options: ProviderOptions,
}

impl ProviderOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { options: ProviderOptions::default() }
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.options.endpoints.push(endpoint.into());
        self
    }

    #[must_use]
    pub fn connection_string(mut self, connection_string: &str) -> Self {
        if let Some(endpoint) = endpoint_from_connection_string(connection_string) {
            self.options.endpoints.push(endpoint);
        }
        self
    }

    #[must_use]
    pub fn select(mut self, selector: Selector) -> Self {
        if self.options.selectors.len() == 1 && self.options.selectors[0] == Selector::default() {
            self.options.selectors.clear();
        }
        self.options.selectors.push(selector);
        self
    }

    #[must_use]
    pub fn watch(mut self, watcher: Watcher) -> Self {
        self.options.change_watchers.push(watcher);
        self
    }

    #[must_use]
    pub fn watch_prefix(mut self, watcher: PrefixWatcher) -> Self {
        self.options.prefix_watchers.push(watcher);
        self
    }

    #[must_use]
    pub fn map(mut self, mapper: Mapper) -> Self {
        self.options.mappers.push(mapper);
        self
    }

    #[must_use]
    pub fn trim_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.key_prefixes.push(prefix.into());
        self
    }

    #[must_use]
    pub fn adapter(mut self, adapter: Box<dyn Adapter>) -> Self {
        self.options.adapters.push(adapter);
        self
    }

    #[must_use]
    pub const fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.options.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn optional(mut self, optional: bool) -> Self {
        self.options.optional = optional;
        self
    }

    #[must_use]
    pub const fn request_tracing_enabled(mut self, enabled: bool) -> Self {
        self.options.request_tracing_enabled = enabled;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.options.backoff = backoff;
        self
    }

    #[must_use]
    pub fn build(self) -> ProviderOptions {
        self.options
    }
}

impl Default for ProviderOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_extracts_endpoint() {
        let cs = "Endpoint=https://cfg.example.com;Id=abc;Secret=xyz";
        assert_eq!(endpoint_from_connection_string(cs), Some("https://cfg.example.com".to_string()));
    }

    #[test]
    fn builder_accumulates_endpoints_and_selectors() {
        let opts = ProviderOptionsBuilder::new()
            .endpoint("https://a.example.com")
            .endpoint("https://b.example.com")
            .select(Selector { key_filter: "app/*".into(), label_filter: None, snapshot_name: None })
            .startup_timeout(Duration::from_secs(10))
            .build();

        assert_eq!(opts.endpoints.len(), 2);
        assert_eq!(opts.selectors.len(), 1);
        assert_eq!(opts.startup_timeout, Duration::from_secs(10));
    }

    #[test]
    fn request_tracing_enabled_defaults_off_and_is_settable() {
        assert!(!ProviderOptions::default().request_tracing_enabled);
        let opts = ProviderOptionsBuilder::new().request_tracing_enabled(true).build();
        assert!(opts.request_tracing_enabled);
    }
}
