//! A `reqwest`-based `RemoteClient`. Lives outside `confd_provider`'s module
//! tree on purpose: the engine depends only on the `RemoteClient` trait, not
//! on any particular wire protocol. This implementation speaks a small JSON
//! listing protocol: `GET {endpoint}/kv?key=<filter>&label=<filter>` returns
//! a JSON array of settings; `GET {endpoint}/kv/<key>?label=<label>` returns
//! one, or 404.

use async_trait::async_trait;
use confd_provider::client::RemoteClient;
use confd_provider::error::{Error, Result};
use confd_provider::model::{ChangeKind, ChangeRecord, Selector, Setting, Snapshot, SnapshotComposition};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use std::time::Duration;

/// Returns `Err` classified per §7 (`Auth` for 401/403, `Transient`
/// otherwise) if `response` did not succeed; otherwise passes it through.
/// Call this in place of `reqwest::Response::error_for_status`, which would
/// otherwise route 401/403 into the generically fail-overable `Http` variant
/// via `?`.
fn require_success(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(Error::from_status(response.status(), context))
    }
}

#[derive(Debug, Deserialize)]
struct WireSetting {
    key: String,
    label: Option<String>,
    value: String,
    etag: String,
}

impl From<WireSetting> for Setting {
    fn from(w: WireSetting) -> Self {
        Self { key: w.key, label: w.label, value: w.value, etag: w.etag }
    }
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    name: String,
    composition: String,
}

pub struct HttpRemoteClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, base_url: base_url.into() })
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn list<'a>(&'a self, selector: &'a Selector) -> Result<BoxStream<'a, Result<Setting>>> {
        let mut request = self.http.get(format!("{}/kv", self.base_url)).query(&[("key", &selector.key_filter)]);
        if let Some(label) = &selector.label_filter {
            request = request.query(&[("label", label)]);
        }
        let response = require_success(request.send().await?, "list")?;
        let settings: Vec<WireSetting> = response.json().await?;
        Ok(stream::iter(settings.into_iter().map(|w| Ok(w.into()))).boxed())
    }

    async fn list_snapshot<'a>(&'a self, name: &'a str) -> Result<BoxStream<'a, Result<Setting>>> {
        let response = self.http.get(format!("{}/snapshots/{name}/kv", self.base_url)).send().await?;
        let settings: Vec<WireSetting> = require_success(response, "list_snapshot")?.json().await?;
        Ok(stream::iter(settings.into_iter().map(|w| Ok(w.into()))).boxed())
    }

    async fn get_snapshot(&self, name: &str) -> Result<Snapshot> {
        let response = self.http.get(format!("{}/snapshots/{name}", self.base_url)).send().await?;
        let wire: WireSnapshot = require_success(response, "get_snapshot")?.json().await?;
        let composition = if wire.composition.eq_ignore_ascii_case("key") {
            SnapshotComposition::KeyPartitioned
        } else {
            SnapshotComposition::Other(wire.composition)
        };
        Ok(Snapshot { name: wire.name, composition })
    }

    async fn get(&self, key: &str, label: Option<&str>) -> Result<Option<Setting>> {
        let mut request = self.http.get(format!("{}/kv/{key}", self.base_url));
        if let Some(label) = label {
            request = request.query(&[("label", label)]);
        }
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let wire: WireSetting = require_success(response, "get")?.json().await?;
        Ok(Some(wire.into()))
    }

    async fn get_change(&self, known: &Setting) -> Result<ChangeRecord> {
        let mut request = self.http.get(format!("{}/kv/{}", self.base_url, known.key)).header("If-None-Match", &known.etag);
        if let Some(label) = &known.label {
            request = request.query(&[("label", label)]);
        }
        let response = request.send().await?;
        match response.status() {
            reqwest::StatusCode::NOT_MODIFIED => {
                Ok(ChangeRecord { kind: ChangeKind::None, key: known.key.clone(), label: known.label.clone(), current: None })
            }
            reqwest::StatusCode::NOT_FOUND => {
                Ok(ChangeRecord { kind: ChangeKind::Deleted, key: known.key.clone(), label: known.label.clone(), current: None })
            }
            _ => {
                let wire: WireSetting = require_success(response, "get_change")?.json().await?;
                let setting: Setting = wire.into();
                Ok(ChangeRecord { kind: ChangeKind::Modified, key: setting.key.clone(), label: setting.label.clone(), current: Some(setting) })
            }
        }
    }
}
