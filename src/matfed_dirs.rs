//! Centralized application directory paths for matfed.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Directory Layout
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Config | `~/Library/Application Support/matfed/` | `~/.config/matfed/` |
//! | Cache | `~/Library/Caches/matfed/` | `~/.cache/matfed/` |
//!
//! # Environment Overrides
//!
//! - `MATFED_CONFIG_DIR` overrides [`config_dir`]
//! - `MATFED_CACHE_DIR` overrides [`cache_dir`]

use std::path::PathBuf;

/// Application config directory.
///
/// Holds `config.toml` and the user's `providers.toml` overrides.
///
/// Resolves to `dirs::config_dir()/matfed/` by default. Override with
/// the `MATFED_CONFIG_DIR` environment variable.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("MATFED_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("matfed"))
        .unwrap_or_else(|| PathBuf::from("/tmp/matfed-config"))
}

/// Application cache directory.
///
/// Holds cached search results, the discovery snapshot, and provider health.
/// Everything here can be deleted; it is rebuilt on demand.
///
/// Resolves to `dirs::cache_dir()/matfed/` by default. Override with
/// the `MATFED_CACHE_DIR` environment variable.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("MATFED_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("matfed"))
        .unwrap_or_else(|| PathBuf::from("/tmp/matfed-cache"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// User provider overrides (`config_dir()/providers.toml`).
#[must_use]
pub fn provider_overrides_file() -> PathBuf {
    config_dir().join("providers.toml")
}

/// Cached search results, one JSON file per query (`cache_dir()/queries/`).
#[must_use]
pub fn query_cache_dir() -> PathBuf {
    cache_dir().join("queries")
}

/// Discovery snapshot (`cache_dir()/discovery.json`).
#[must_use]
pub fn discovery_file() -> PathBuf {
    cache_dir().join("discovery.json")
}

/// Persisted provider health (`cache_dir()/health.json`).
#[must_use]
pub fn health_file() -> PathBuf {
    cache_dir().join("health.json")
}
