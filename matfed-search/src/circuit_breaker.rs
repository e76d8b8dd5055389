//! Per-provider circuit breaker and health tracking.
//!
//! Tracks success/failure counts and latency per provider and temporarily
//! disables providers that fail repeatedly. After a cooldown period, a
//! tripped provider enters a half-open state where a single probe request
//! determines whether to restore or re-trip the circuit.
//!
//! State survives restarts: [`HealthManager::save`] writes every record as
//! one JSON object keyed by provider id, and [`HealthManager::load`] reads
//! it back, so a provider that tripped in one run stays quiet in the next
//! until its cooldown elapses.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  N failures   ┌────────┐  cooldown   ┌──────────┐
//! │ Closed ├──────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘               └────────┘             └────┬─────┘
//!     │                         ▲                      │
//!     │  success                │  failure              │
//!     └─────────────────────────┴──────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::seconds;
use crate::error::{Result, SearchError};
use crate::persist::DiskWrites;

/// Circuit breaker state for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Provider is healthy. All requests are allowed through.
    #[default]
    Closed,
    /// Provider has failed too many times. Requests are blocked until cooldown expires.
    Open,
    /// Cooldown has elapsed. One probe request is allowed to test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// A state change caused by a recorded outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Closed,
}

/// Health tracking data for a single provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderHealth {
    pub state: CircuitState,
    /// Number of consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Exponential moving average of successful-call latency.
    pub ema_latency_ms: Option<f64>,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// When the circuit last tripped; the cooldown counts from here.
    pub opened_at: Option<DateTime<Utc>>,
}

/// Configuration for circuit breaker behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before tripping the circuit to Open.
    pub failure_threshold: u32,
    /// Seconds to wait in Open state before transitioning to HalfOpen.
    pub cooldown_secs: u64,
    /// Weight of the newest sample in the latency moving average.
    pub ema_alpha: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 60,
            ema_alpha: 0.3,
        }
    }
}

/// Per-provider circuit breakers with optional on-disk persistence.
///
/// Owned by the orchestrator and mutated only after all provider calls of
/// a search have settled.
#[derive(Debug)]
pub struct HealthManager {
    config: CircuitBreakerConfig,
    providers: HashMap<String, ProviderHealth>,
    path: Option<PathBuf>,
}

impl HealthManager {
    /// Create an in-memory manager with no persistence.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            providers: HashMap::new(),
            path: None,
        }
    }

    /// Load persisted state from `path`, which is also where [`save`] writes.
    ///
    /// A missing file yields empty state. A corrupt file is logged and
    /// replaced on the next save rather than failing startup.
    ///
    /// [`save`]: HealthManager::save
    pub fn load(config: CircuitBreakerConfig, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let providers = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, ProviderHealth>>(&bytes) {
                Ok(map) => {
                    tracing::debug!(path = %path.display(), providers = map.len(), "loaded provider health");
                    map
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt health file ignored");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read health file");
                HashMap::new()
            }
        };
        Self {
            config,
            providers,
            path: Some(path),
        }
    }

    /// Persist all records as pretty JSON. A no-op without a path.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialisation error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        self.pending_save()?.apply().map(|_| ())
    }

    /// The file write [`save`](Self::save) would perform, for applying
    /// after the manager is unlocked.
    pub(crate) fn pending_save(&self) -> Result<DiskWrites> {
        let mut ops = DiskWrites::default();
        if let Some(path) = &self.path {
            let ordered: BTreeMap<&String, &ProviderHealth> = self.providers.iter().collect();
            let json = serde_json::to_string_pretty(&ordered)
                .map_err(|e| SearchError::Parse(format!("cannot serialize health: {e}")))?;
            ops.write(path.clone(), json);
        }
        Ok(ops)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Record a successful call and its latency.
    ///
    /// Resets the consecutive failure count and transitions the provider
    /// to [`CircuitState::Closed`] regardless of previous state.
    pub fn record_success(&mut self, provider: &str, latency_ms: u64) -> Option<Transition> {
        self.record_success_at(provider, latency_ms, Utc::now())
    }

    pub fn record_success_at(
        &mut self,
        provider: &str,
        latency_ms: u64,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let alpha = self.config.ema_alpha;
        let health = self.providers.entry(provider.to_owned()).or_default();
        let previous = health.state;

        health.state = CircuitState::Closed;
        health.consecutive_failures = 0;
        health.success_count += 1;
        health.last_success_at = Some(now);
        health.opened_at = None;
        let sample = latency_ms as f64;
        health.ema_latency_ms = Some(match health.ema_latency_ms {
            Some(ema) => alpha * sample + (1.0 - alpha) * ema,
            None => sample,
        });

        (previous != CircuitState::Closed).then_some(Transition::Closed)
    }

    /// Record a failed call.
    ///
    /// Increments the consecutive failure count. Reaching the threshold
    /// while Closed, or failing the probe while HalfOpen, trips the circuit
    /// and restarts the cooldown.
    pub fn record_failure(&mut self, provider: &str) -> Option<Transition> {
        self.record_failure_at(provider, Utc::now())
    }

    pub fn record_failure_at(&mut self, provider: &str, now: DateTime<Utc>) -> Option<Transition> {
        let threshold = self.config.failure_threshold;
        let health = self.providers.entry(provider.to_owned()).or_default();

        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.failure_count += 1;
        health.last_failure_at = Some(now);

        let trip = match health.state {
            CircuitState::Closed => health.consecutive_failures >= threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            health.state = CircuitState::Open;
            health.opened_at = Some(now);
            Some(Transition::Opened)
        } else {
            None
        }
    }

    /// Check whether a request to the given provider should be attempted.
    ///
    /// - [`CircuitState::Closed`]: always returns `true`
    /// - [`CircuitState::Open`]: returns `true` only if the cooldown has elapsed
    ///   (transitions to [`CircuitState::HalfOpen`])
    /// - [`CircuitState::HalfOpen`]: returns `true` (one probe allowed)
    pub fn should_attempt(&mut self, provider: &str) -> bool {
        self.should_attempt_at(provider, Utc::now())
    }

    pub fn should_attempt_at(&mut self, provider: &str, now: DateTime<Utc>) -> bool {
        let cooldown = seconds(self.config.cooldown_secs);
        let Some(health) = self.providers.get_mut(provider) else {
            return true;
        };

        match health.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooldown_elapsed = health
                    .opened_at
                    .or(health.last_failure_at)
                    .map_or(true, |t| now - t >= cooldown);

                if cooldown_elapsed {
                    health.state = CircuitState::HalfOpen;
                    tracing::info!(provider, "circuit half-open, allowing probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Get the current circuit state for a specific provider.
    pub fn provider_status(&self, provider: &str) -> CircuitState {
        self.providers
            .get(provider)
            .map_or(CircuitState::Closed, |h| h.state)
    }

    pub fn health(&self, provider: &str) -> Option<&ProviderHealth> {
        self.providers.get(provider)
    }

    /// Every tracked provider's record, sorted by provider id.
    pub fn health_report(&self) -> Vec<(String, ProviderHealth)> {
        let mut report: Vec<_> = self
            .providers
            .iter()
            .map(|(id, health)| (id.clone(), health.clone()))
            .collect();
        report.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    /// Reset all provider states to healthy (Closed with zero failures).
    pub fn reset(&mut self) {
        self.providers.clear();
    }
}
