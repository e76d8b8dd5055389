//! The federated search pipeline.
//!
//! # Pipeline
//!
//! 1. Validate the query; an invalid query never reaches the network
//! 2. Return a fresh cached result if there is one
//! 3. Select capable providers and drop those whose circuit is open
//! 4. Fan out one bounded, time-limited call per provider
//! 5. Turn every outcome into a [`ProviderQueryLog`] entry
//! 6. Fuse all successful record batches in provider-priority order
//! 7. Truncate to the query limit, keeping the pre-truncation count
//! 8. Record health for every attempted provider and persist it
//! 9. Cache the result and flush the cache

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::fanout::{fan_out, CallResult};
use crate::cache::SearchCache;
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState, HealthManager, ProviderHealth, Transition};
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::fusion::fuse;
use crate::query::Query;
use crate::registry::{ProviderRegistry, RegisteredProvider};
use crate::types::{Material, ProviderQueryLog, ProviderStatus, RawRecord, SearchResult};

/// Per-call switches for [`FederatedSearch::search_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Skip the cache read. The fresh result is still cached.
    pub force_refresh: bool,
}

impl SearchOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
        }
    }
}

/// The federated search engine.
///
/// Owns the registry, the per-provider health state, and the result cache.
/// Health and cache are mutated only between awaits, never while provider
/// calls are in flight. Their files are written on the blocking pool after
/// the state lock is released; `persist` keeps those writes in snapshot
/// order across concurrent searches.
#[derive(Debug)]
pub struct FederatedSearch {
    registry: ProviderRegistry,
    health: Mutex<HealthManager>,
    cache: Mutex<SearchCache>,
    persist: tokio::sync::Mutex<()>,
    config: SearchConfig,
}

impl FederatedSearch {
    /// Assemble an engine from already-loaded parts.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if `config` is invalid.
    pub fn new(
        registry: ProviderRegistry,
        health: HealthManager,
        cache: SearchCache,
        config: SearchConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            health: Mutex::new(health),
            cache: Mutex::new(cache),
            persist: tokio::sync::Mutex::new(()),
            config,
        })
    }

    /// An engine with no persistence, for tests and one-off use.
    pub fn in_memory(registry: ProviderRegistry, config: SearchConfig) -> Result<Self> {
        let health = HealthManager::new(config.circuit_breaker.clone());
        let cache = SearchCache::new(config.cache_ttl_seconds);
        Self::new(registry, health, cache, config)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn circuit_config(&self) -> CircuitBreakerConfig {
        lock(&self.health).config().clone()
    }

    pub fn provider_status(&self, provider: &str) -> CircuitState {
        lock(&self.health).provider_status(provider)
    }

    pub fn health_report(&self) -> Vec<(String, ProviderHealth)> {
        lock(&self.health).health_report()
    }

    /// A material from any cached result, without contacting providers.
    pub fn lookup_material(&self, id: &str) -> Option<Material> {
        lock(&self.cache).lookup_material(id).cloned()
    }

    /// Drop every cached result, in memory and on disk.
    pub fn clear_cache(&self) -> Result<usize> {
        lock(&self.cache).clear()
    }

    /// Search with default options.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidQuery`] if the query fails validation.
    /// Provider failures never become errors; they appear in the result's
    /// logs and warnings.
    pub async fn search(&self, query: &Query) -> Result<SearchResult> {
        self.search_with(query, SearchOptions::default()).await
    }

    pub async fn search_with(&self, query: &Query, options: SearchOptions) -> Result<SearchResult> {
        self.search_cancellable(query, options, CancellationToken::new())
            .await
    }

    /// Search, aborting all in-flight provider calls when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Cancelled`] if the token fires before every
    /// provider call has settled. Health and cache are left untouched.
    pub async fn search_cancellable(
        &self,
        query: &Query,
        options: SearchOptions,
        cancel: CancellationToken,
    ) -> Result<SearchResult> {
        query.validate()?;
        let started = Instant::now();
        let hash = query.hash();
        tracing::trace!(query = %query.canonical_json(), "search requested");

        if !options.force_refresh {
            if let Some(mut hit) = lock(&self.cache).get(query) {
                hit.cached = true;
                hit.search_time_ms = elapsed_ms(started);
                tracing::info!(%hash, materials = hit.materials.len(), "cache hit");
                return Ok(hit);
            }
        }

        let selection = self.registry.get_capable(query);
        let priority = selection.priority();
        let mut warnings = selection.warnings;
        let mut skipped_logs: Vec<ProviderQueryLog> = selection
            .skipped
            .iter()
            .map(|s| ProviderQueryLog {
                provider: s.provider.clone(),
                status: ProviderStatus::Skipped,
                result_count: 0,
                latency_ms: 0,
                error: Some(s.reason.to_string()),
            })
            .collect();

        let (dispatch, open_logs) = self.partition_by_circuit(selection.capable);
        for log in &open_logs {
            warnings.push(format!("{}: circuit open; skipped", log.provider));
        }

        if dispatch.is_empty() {
            warnings.push("no capable provider available for this query".into());
            tracing::warn!(%hash, "no provider to query");
            let mut result = SearchResult::empty(query.clone());
            result.provider_logs = open_logs;
            result.provider_logs.append(&mut skipped_logs);
            result.warnings = warnings;
            result.search_time_ms = elapsed_ms(started);
            return Ok(result);
        }

        tracing::info!(%hash, providers = dispatch.len(), "dispatching search");
        let calls = fan_out(
            dispatch,
            query,
            self.config.per_provider_limit,
            self.config.timeout(),
            self.config.max_concurrency,
            &cancel,
        )
        .await?;

        self.record_health(&calls).await;

        let mut logs = Vec::with_capacity(calls.len() + open_logs.len() + skipped_logs.len());
        let mut batches: Vec<(String, Vec<RawRecord>)> = Vec::new();
        for call in calls {
            match call.outcome {
                Ok(outcome) => {
                    tracing::debug!(
                        provider = %call.provider,
                        records = outcome.records.len(),
                        latency_ms = call.latency_ms,
                        "provider returned"
                    );
                    warnings.extend(
                        outcome
                            .warnings
                            .iter()
                            .map(|w| format!("{}: {w}", call.provider)),
                    );
                    if outcome.dropped > 0 {
                        warnings.push(format!(
                            "{}: dropped {} malformed entries",
                            call.provider, outcome.dropped
                        ));
                    }
                    logs.push(ProviderQueryLog {
                        provider: call.provider.clone(),
                        status: ProviderStatus::Success,
                        result_count: outcome.records.len(),
                        latency_ms: call.latency_ms,
                        error: None,
                    });
                    batches.push((call.provider, outcome.records));
                }
                Err(e) => {
                    let status = e.status();
                    tracing::warn!(provider = %call.provider, %status, error = %e, "provider call failed");
                    warnings.push(format!("{}: {status}: {e}", call.provider));
                    logs.push(ProviderQueryLog {
                        provider: call.provider,
                        status,
                        result_count: 0,
                        latency_ms: call.latency_ms,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        logs.extend(open_logs);
        logs.append(&mut skipped_logs);

        let mut materials = fuse(batches, &priority);
        let total_count = materials.len();
        materials.truncate(query.limit());

        let result = SearchResult {
            materials,
            total_count,
            query: query.clone(),
            provider_logs: logs,
            warnings,
            cached: false,
            search_time_ms: elapsed_ms(started),
        };
        tracing::info!(
            %hash,
            materials = result.materials.len(),
            total = total_count,
            failed = result.failed_providers().count(),
            elapsed_ms = result.search_time_ms,
            "search complete"
        );

        self.store(query, &result).await;
        Ok(result)
    }

    /// Split capable providers into those to call and circuit-open log entries.
    fn partition_by_circuit(
        &self,
        capable: Vec<RegisteredProvider>,
    ) -> (Vec<RegisteredProvider>, Vec<ProviderQueryLog>) {
        let mut health = lock(&self.health);
        let mut dispatch = Vec::with_capacity(capable.len());
        let mut open = Vec::new();
        for provider in capable {
            if health.should_attempt(&provider.endpoint.id) {
                dispatch.push(provider);
            } else {
                tracing::debug!(provider = %provider.endpoint.id, "circuit open; skipping");
                open.push(ProviderQueryLog {
                    provider: provider.endpoint.id.clone(),
                    status: ProviderStatus::CircuitOpen,
                    result_count: 0,
                    latency_ms: 0,
                    error: Some("circuit open".into()),
                });
            }
        }
        (dispatch, open)
    }

    async fn record_health(&self, calls: &[CallResult]) {
        let _persist = self.persist.lock().await;
        let pending = {
            let mut health = lock(&self.health);
            for call in calls {
                let transition = match &call.outcome {
                    Ok(_) => health.record_success(&call.provider, call.latency_ms),
                    Err(_) => health.record_failure(&call.provider),
                };
                match transition {
                    Some(Transition::Opened) => {
                        tracing::info!(provider = %call.provider, "circuit opened");
                    }
                    Some(Transition::Closed) => {
                        tracing::info!(provider = %call.provider, "circuit closed");
                    }
                    None => {}
                }
            }
            health.pending_save()
        };
        let saved = match pending {
            Ok(ops) => ops.apply_blocking().await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            tracing::warn!(error = %e, "failed to persist provider health");
        }
    }

    async fn store(&self, query: &Query, result: &SearchResult) {
        let _persist = self.persist.lock().await;
        let pending = {
            let mut cache = lock(&self.cache);
            cache.put(query, result.clone());
            cache.take_flush_at(Utc::now())
        };
        let flushed = match pending {
            Ok(ops) => ops.apply_blocking().await,
            Err(e) => Err(e),
        };
        if let Err(e) = flushed {
            tracing::warn!(error = %e, "failed to persist search cache");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
