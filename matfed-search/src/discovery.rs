//! Two-hop provider discovery.
//!
//! The root index lists providers. A provider with a `base_url` is itself an
//! index meta-database: its `/v1/links` endpoint lists the child databases
//! that actually serve structures. Discovery flattens that tree into leaf
//! [`ProviderEndpoint`]s with default capabilities; the corrections layer
//! adds what discovery cannot know.
//!
//! Snapshots are cached as `{fetched_at, endpoints}` JSON and reused while
//! younger than the freshness window. When the network fails, a stale
//! snapshot is better than nothing and is used with a warning.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;

use crate::clients::lenient;
use crate::config::DiscoveryConfig;
use crate::error::{Result, SearchError};
use crate::persist::write_atomic;
use crate::provider::{trim_base_url, ProviderEndpoint};

/// A cached discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySnapshot {
    pub fetched_at: DateTime<Utc>,
    pub endpoints: Vec<ProviderEndpoint>,
}

#[derive(Debug, Deserialize)]
struct LinksResponse {
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct LinkEntry {
    id: String,
    #[serde(default, deserialize_with = "lenient")]
    attributes: Option<LinkAttributes>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkAttributes {
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    base_url: Option<BaseUrl>,
    #[serde(default, deserialize_with = "lenient")]
    link_type: Option<String>,
}

/// `base_url` is either a plain string or a link object with `href`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BaseUrl {
    Href(String),
    Link { href: String },
}

impl BaseUrl {
    fn href(&self) -> Option<String> {
        let raw = match self {
            Self::Href(s) | Self::Link { href: s } => s,
        };
        let trimmed = trim_base_url(raw);
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// An entry from either hop, reduced to what discovery needs.
#[derive(Debug, Clone, PartialEq)]
struct Link {
    id: String,
    name: Option<String>,
    base_url: Option<String>,
    link_type: Option<String>,
}

fn parse_links(body: LinksResponse) -> Vec<Link> {
    body.data
        .into_iter()
        .filter_map(|raw| serde_json::from_value::<LinkEntry>(raw).ok())
        .filter(|entry| !entry.id.trim().is_empty())
        .map(|entry| {
            let attrs = entry.attributes.unwrap_or_default();
            Link {
                id: entry.id.trim().to_owned(),
                name: attrs.name,
                base_url: attrs.base_url.as_ref().and_then(BaseUrl::href),
                link_type: attrs.link_type,
            }
        })
        .collect()
}

/// Flatten one provider's child links into leaf endpoints.
///
/// A single child takes the provider's id; several children are named
/// `{provider}.{child}`.
fn leaf_endpoints(provider: &Link, children: &[Link]) -> Vec<ProviderEndpoint> {
    let leaves: Vec<&Link> = children
        .iter()
        .filter(|c| c.link_type.as_deref() == Some("child") && c.base_url.is_some())
        .collect();
    let single = leaves.len() == 1;

    leaves
        .into_iter()
        .filter_map(|child| {
            let url = child.base_url.as_deref()?;
            let id = if single {
                provider.id.clone()
            } else {
                format!("{}.{}", provider.id, child.id)
            };
            let mut endpoint = ProviderEndpoint::new(id, url);
            endpoint.name = match (&provider.name, &child.name) {
                (Some(p), Some(c)) if !single && p != c => format!("{p}: {c}"),
                (Some(p), _) => p.clone(),
                (None, Some(c)) => c.clone(),
                (None, None) => endpoint.id.clone(),
            };
            Some(endpoint)
        })
        .collect()
}

/// Fetches and caches the provider list.
#[derive(Debug, Clone)]
pub struct Discovery {
    http: reqwest::Client,
    config: DiscoveryConfig,
    cache_path: Option<PathBuf>,
}

impl Discovery {
    pub fn new(http: reqwest::Client, config: DiscoveryConfig) -> Self {
        Self {
            http,
            config,
            cache_path: None,
        }
    }

    /// Cache snapshots at `path` (usually `discovery.json` in the cache dir).
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn cache_path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    /// Resolve the discovered endpoint list.
    ///
    /// Uses a fresh cached snapshot unless `force_refresh` is set. Offline
    /// mode never touches the network and accepts a snapshot of any age.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Discovery`] only when the network fetch failed
    /// and no cached snapshot exists.
    pub async fn discover(&self, force_refresh: bool) -> Result<Vec<ProviderEndpoint>> {
        let cached = self.load_snapshot();

        if self.config.offline {
            tracing::debug!("discovery offline; using cached snapshot only");
            return Ok(cached.map(|s| s.endpoints).unwrap_or_default());
        }

        if !force_refresh {
            if let Some(snapshot) = &cached {
                if self.is_fresh(snapshot, Utc::now()) {
                    tracing::debug!(endpoints = snapshot.endpoints.len(), "using cached discovery");
                    return Ok(snapshot.endpoints.clone());
                }
            }
        }

        match self.fetch().await {
            Ok(endpoints) => {
                let snapshot = DiscoverySnapshot {
                    fetched_at: Utc::now(),
                    endpoints,
                };
                if let Err(e) = self.save_snapshot(&snapshot) {
                    tracing::warn!(error = %e, "failed to cache discovery snapshot");
                }
                tracing::info!(endpoints = snapshot.endpoints.len(), "provider discovery complete");
                Ok(snapshot.endpoints)
            }
            Err(e) => match cached {
                Some(snapshot) => {
                    tracing::warn!(
                        error = %e,
                        fetched_at = %snapshot.fetched_at,
                        "discovery failed; using stale snapshot"
                    );
                    Ok(snapshot.endpoints)
                }
                None => Err(e),
            },
        }
    }

    /// Walk both hops over the network, ignoring any cache.
    pub async fn fetch(&self) -> Result<Vec<ProviderEndpoint>> {
        tracing::debug!(url = %self.config.index_url, "fetching provider index");
        let providers = get_links(&self.http, &self.config.index_url)
            .await
            .map_err(|e| SearchError::Discovery(format!("provider index: {e}")))?;

        let mut tasks = JoinSet::new();
        for provider in providers {
            let Some(base_url) = provider.base_url.clone() else {
                tracing::trace!(provider = %provider.id, "provider has no index; skipped");
                continue;
            };
            let http = self.http.clone();
            tasks.spawn(async move {
                let url = format!("{base_url}/v1/links");
                let children = get_links(&http, &url).await;
                (provider, children)
            });
        }

        let mut endpoints = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((provider, Ok(children))) => {
                    endpoints.extend(leaf_endpoints(&provider, &children));
                }
                Ok((provider, Err(e))) => {
                    tracing::warn!(provider = %provider.id, error = %e, "provider index unreachable; skipped");
                }
                Err(e) => tracing::warn!(error = %e, "discovery task failed"),
            }
        }
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints.dedup_by(|a, b| a.id == b.id);
        Ok(endpoints)
    }

    fn is_fresh(&self, snapshot: &DiscoverySnapshot, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(snapshot.fetched_at) < self.config.freshness()
    }

    fn load_snapshot(&self) -> Option<DiscoverySnapshot> {
        let path = self.cache_path.as_ref()?;
        let bytes = std::fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt discovery cache ignored");
                None
            }
        }
    }

    fn save_snapshot(&self, snapshot: &DiscoverySnapshot) -> Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| SearchError::Parse(format!("cannot serialize discovery: {e}")))?;
        write_atomic(path, &json)
    }
}

async fn get_links(http: &reqwest::Client, url: &str) -> std::result::Result<Vec<Link>, String> {
    let response = http.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {status}"));
    }
    let body = response.text().await.map_err(|e| e.to_string())?;
    let parsed: LinksResponse = serde_json::from_str(&body).map_err(|e| e.to_string())?;
    Ok(parse_links(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link(id: &str, url: Option<&str>, link_type: Option<&str>) -> Link {
        Link {
            id: id.into(),
            name: Some(format!("{id} db")),
            base_url: url.map(str::to_owned),
            link_type: link_type.map(str::to_owned),
        }
    }

    #[test]
    fn parses_string_and_object_base_urls() {
        let body: LinksResponse = serde_json::from_value(json!({
            "data": [
                {"id": "mp", "type": "links", "attributes": {"name": "Materials Project", "base_url": "https://index.example/mp/"}},
                {"id": "odbx", "attributes": {"base_url": {"href": "https://index.example/odbx", "meta": {}}}},
                {"id": "exmpl", "attributes": {"base_url": null}},
                {"attributes": {"base_url": "https://orphan.example"}},
                42
            ]
        }))
        .unwrap();
        let links = parse_links(body);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].base_url.as_deref(), Some("https://index.example/mp"));
        assert_eq!(links[1].base_url.as_deref(), Some("https://index.example/odbx"));
        assert_eq!(links[2].base_url, None);
    }

    #[test]
    fn single_child_takes_provider_id() {
        let provider = link("mp", Some("https://index.example/mp"), None);
        let children = vec![
            link("index", Some("https://index.example/mp"), Some("root")),
            link("main", Some("https://optimade.materialsproject.org"), Some("child")),
        ];
        let leaves = leaf_endpoints(&provider, &children);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].id, "mp");
        assert_eq!(leaves[0].base_url, "https://optimade.materialsproject.org");
        assert_eq!(leaves[0].name, "mp db");
    }

    #[test]
    fn multiple_children_are_namespaced() {
        let provider = link("mcloud", Some("https://index.example/mcloud"), None);
        let children = vec![
            link("2dstructures", Some("https://a.example"), Some("child")),
            link("3dcd", Some("https://b.example"), Some("child")),
            link("broken", None, Some("child")),
            link("docs", Some("https://docs.example"), Some("external")),
        ];
        let ids: Vec<_> = leaf_endpoints(&provider, &children)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["mcloud.2dstructures", "mcloud.3dcd"]);
    }

    #[tokio::test]
    async fn fresh_snapshot_is_reused_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.json");
        let snapshot = DiscoverySnapshot {
            fetched_at: Utc::now(),
            endpoints: vec![ProviderEndpoint::new("cod", "https://www.crystallography.net/cod/optimade")],
        };
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        // An unroutable index URL proves the network is never touched.
        let config = DiscoveryConfig {
            index_url: "http://127.0.0.1:9/providers.json".into(),
            ..Default::default()
        };
        let discovery = Discovery::new(reqwest::Client::new(), config).with_cache_path(&path);
        let endpoints = discovery.discover(false).await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].id, "cod");
    }

    #[tokio::test]
    async fn stale_snapshot_used_when_network_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discovery.json");
        let snapshot = DiscoverySnapshot {
            fetched_at: Utc::now() - chrono::Duration::days(30),
            endpoints: vec![ProviderEndpoint::new("oqmd", "https://oqmd.org/optimade")],
        };
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        let config = DiscoveryConfig {
            index_url: "http://127.0.0.1:9/providers.json".into(),
            timeout_seconds: 1,
            ..Default::default()
        };
        let discovery = Discovery::new(reqwest::Client::new(), config).with_cache_path(&path);
        let endpoints = discovery.discover(true).await.unwrap();
        assert_eq!(endpoints[0].id, "oqmd");
    }

    #[tokio::test]
    async fn network_failure_without_cache_is_error() {
        let config = DiscoveryConfig {
            index_url: "http://127.0.0.1:9/providers.json".into(),
            ..Default::default()
        };
        let discovery = Discovery::new(reqwest::Client::new(), config);
        let err = discovery.discover(false).await.unwrap_err();
        assert!(matches!(err, SearchError::Discovery(_)));
    }

    #[tokio::test]
    async fn offline_mode_returns_cache_or_empty() {
        let config = DiscoveryConfig {
            offline: true,
            ..Default::default()
        };
        let discovery = Discovery::new(reqwest::Client::new(), config);
        assert!(discovery.discover(true).await.unwrap().is_empty());
    }
}
