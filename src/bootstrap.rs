//! Engine bootstrap: assemble a [`FederatedSearch`] from config and disk.
//!
//! The registry is discovery + bundled corrections + user overrides, merged
//! in that order. Provider health and cached results are loaded from the
//! cache directory so circuit state and cache survive restarts.

use std::path::PathBuf;
use std::time::Duration;

use matfed_search::http::{build_client, build_client_with_timeout};
use matfed_search::registry::{bundled_corrections, load_overrides, merge_layers};
use matfed_search::{Discovery, FederatedSearch, HealthManager, ProviderRegistry, SearchCache};

use crate::config::AppConfig;
use crate::error::Result;
use crate::matfed_dirs;

/// Every file the engine reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePaths {
    pub overrides: PathBuf,
    pub query_cache: PathBuf,
    pub discovery: PathBuf,
    pub health: PathBuf,
}

impl EnginePaths {
    /// Platform locations, honouring `MATFED_*_DIR` overrides.
    pub fn platform() -> Self {
        Self {
            overrides: matfed_dirs::provider_overrides_file(),
            query_cache: matfed_dirs::query_cache_dir(),
            discovery: matfed_dirs::discovery_file(),
            health: matfed_dirs::health_file(),
        }
    }

    /// Config and cache files rooted at two explicit directories.
    pub fn under(config_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let cache_dir = cache_dir.into();
        Self {
            overrides: config_dir.join("providers.toml"),
            query_cache: cache_dir.join("queries"),
            discovery: cache_dir.join("discovery.json"),
            health: cache_dir.join("health.json"),
        }
    }
}

/// Resolve the provider registry.
///
/// Discovery failure is not fatal: the bundled corrections carry base URLs
/// for the core providers, so the registry is still usable without the
/// network.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built or the corrections
/// or override files are invalid.
pub async fn build_registry(
    config: &AppConfig,
    paths: &EnginePaths,
    refresh_discovery: bool,
) -> Result<ProviderRegistry> {
    let discovery_http = build_client_with_timeout(
        &config.search,
        Duration::from_secs(config.discovery.timeout_seconds),
    )?;
    let discovery = Discovery::new(discovery_http, config.discovery.clone())
        .with_cache_path(&paths.discovery);
    let discovered = match discovery.discover(refresh_discovery).await {
        Ok(endpoints) => endpoints,
        Err(e) => {
            tracing::warn!(error = %e, "provider discovery unavailable; using bundled providers");
            Vec::new()
        }
    };

    let corrections = bundled_corrections()?;
    let overrides = load_overrides(&paths.overrides)?;
    if !overrides.is_empty() {
        tracing::debug!(
            path = %paths.overrides.display(),
            providers = overrides.len(),
            "applying provider overrides"
        );
    }
    let endpoints = merge_layers(discovered, &[&corrections, &overrides]);

    let http = build_client(&config.search)?;
    let registry = ProviderRegistry::build(endpoints, http, config.search.timeout());
    tracing::info!(
        providers = registry.len(),
        enabled = registry.providers().iter().filter(|p| p.endpoint.enabled).count(),
        "provider registry ready"
    );
    Ok(registry)
}

/// Build the engine with persisted health and cache.
///
/// # Errors
///
/// Same as [`build_registry`], plus invalid engine settings.
pub async fn build_engine(
    config: &AppConfig,
    paths: &EnginePaths,
    refresh_discovery: bool,
) -> Result<FederatedSearch> {
    let registry = build_registry(config, paths, refresh_discovery).await?;
    let health = HealthManager::load(config.search.circuit_breaker.clone(), &paths.health);
    let cache = SearchCache::open(&paths.query_cache, config.search.cache_ttl_seconds);
    Ok(FederatedSearch::new(
        registry,
        health,
        cache,
        config.search.clone(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matfed_search::{ApiType, Tier};

    fn offline() -> AppConfig {
        let mut config = AppConfig::default();
        config.discovery.offline = true;
        config
    }

    #[tokio::test]
    async fn offline_registry_uses_bundled_providers() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnginePaths::under(dir.path().join("config"), dir.path().join("cache"));

        let registry = build_registry(&offline(), &paths, false).await.unwrap();

        let mp = registry.get("mp").unwrap();
        assert_eq!(mp.endpoint.tier, Tier::Core);
        assert!(mp.endpoint.enabled);
        assert!(registry.get("mpds").is_none());
        let native = registry.get("materials_project").unwrap();
        assert_eq!(native.endpoint.api_type, ApiType::MaterialsProject);
        assert!(!native.endpoint.enabled);
        // Core providers come first.
        assert_eq!(registry.providers()[0].endpoint.tier, Tier::Core);
    }

    #[tokio::test]
    async fn overrides_enable_and_add_providers() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnginePaths::under(dir.path().join("config"), dir.path().join("cache"));
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(
            &paths.overrides,
            r#"
[materials_project]
enabled = true

[cod]
enabled = false

[local]
name = "Local test database"
base_url = "http://localhost:5000/"
tier = "experimental"
"#,
        )
        .unwrap();

        let registry = build_registry(&offline(), &paths, false).await.unwrap();

        assert!(registry.get("materials_project").unwrap().endpoint.enabled);
        assert!(!registry.get("cod").unwrap().endpoint.enabled);
        let local = registry.get("local").unwrap();
        assert_eq!(local.endpoint.base_url, "http://localhost:5000");
        assert_eq!(registry.providers().last().unwrap().endpoint.id, "local");
    }

    #[tokio::test]
    async fn invalid_overrides_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnginePaths::under(dir.path(), dir.path().join("cache"));
        std::fs::write(&paths.overrides, "[mp\n").unwrap();

        let err = build_registry(&offline(), &paths, false).await.unwrap_err();
        assert!(err.to_string().contains("providers.toml"));
    }

    #[tokio::test]
    async fn engine_starts_with_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnginePaths::under(dir.path().join("config"), dir.path().join("cache"));

        let engine = build_engine(&offline(), &paths, false).await.unwrap();

        assert!(engine.health_report().is_empty());
        assert!(!engine.registry().is_empty());
    }
}
