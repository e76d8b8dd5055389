//! Engine configuration with sensible defaults.
//!
//! [`SearchConfig`] controls per-provider timeouts, fan-out width, cache
//! lifetime, and circuit breaker tuning. [`DiscoveryConfig`] controls where
//! the provider index is fetched from and how long a discovery snapshot
//! stays fresh.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::SearchError;

/// Default provider index (the public list of filter-query providers).
pub const DEFAULT_INDEX_URL: &str = "https://providers.optimade.org/providers.json";

/// Configuration for the federated search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Per-provider call budget in seconds.
    pub timeout_seconds: u64,
    /// Maximum number of provider calls in flight at once.
    pub max_concurrency: usize,
    /// How long a cached search result stays valid, in seconds.
    pub cache_ttl_seconds: u64,
    /// Circuit breaker thresholds and EMA weight.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Page size requested from each provider. The query's own limit caps
    /// the final result; this caps each provider's contribution.
    pub per_provider_limit: usize,
    /// Custom User-Agent. `None` uses `matfed/<version>`.
    pub user_agent: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 15,
            max_concurrency: 16,
            cache_ttl_seconds: 24 * 60 * 60,
            circuit_breaker: CircuitBreakerConfig::default(),
            per_provider_limit: 100,
            user_agent: None,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `timeout_seconds` must be greater than 0
    /// - `max_concurrency` must be greater than 0
    /// - `per_provider_limit` must be greater than 0
    /// - `circuit_breaker.failure_threshold` must be greater than 0
    /// - `circuit_breaker.ema_alpha` must lie in (0, 1]
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.timeout_seconds == 0 {
            return Err(SearchError::Config(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(SearchError::Config(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        if self.per_provider_limit == 0 {
            return Err(SearchError::Config(
                "per_provider_limit must be greater than 0".into(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(SearchError::Config(
                "failure_threshold must be greater than 0".into(),
            ));
        }
        let alpha = self.circuit_breaker.ema_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(SearchError::Config(format!(
                "ema_alpha must be in (0, 1], got {alpha}"
            )));
        }
        Ok(())
    }
}

/// Provider discovery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Root provider index URL.
    pub index_url: String,
    /// How long a discovery snapshot is reused before refetching, in hours.
    pub freshness_hours: u64,
    /// Per-request timeout for the index hops, in seconds.
    pub timeout_seconds: u64,
    /// Skip network discovery entirely and rely on corrections + overrides.
    pub offline: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.to_owned(),
            freshness_hours: 24 * 7,
            timeout_seconds: 10,
            offline: false,
        }
    }
}

impl DiscoveryConfig {
    pub fn freshness(&self) -> chrono::Duration {
        seconds(self.freshness_hours.saturating_mul(3600))
    }
}

/// Seconds as a chrono duration, saturating instead of panicking.
pub(crate) fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
