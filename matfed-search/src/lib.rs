//! # matfed-search
//!
//! Federated search over materials-science databases.
//!
//! One structured [`Query`] is translated into each provider's own filter
//! dialect, sent to every capable provider concurrently, and the answers are
//! fused into canonical [`Material`]s that remember which provider said what.
//!
//! ## Design
//!
//! - Providers come from OPTIMADE discovery plus bundled corrections and
//!   user overrides, layered in that order
//! - A provider that cannot express a hard filter is skipped, never queried
//!   and post-filtered
//! - Every call is bounded by a semaphore and its own timeout
//! - Providers that keep failing are short-circuited until a cooldown passes
//! - Results are cached on disk, keyed by a canonical fingerprint of the query
//! - Provider failures never fail a search; they show up as log entries
//!
//! ## Security
//!
//! - API keys are read from the environment at call time and never logged
//! - Query bodies are logged only at trace level
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> matfed_search::Result<()> {
//! use matfed_search::{FederatedSearch, ProviderRegistry, Query, SearchConfig};
//!
//! let registry = ProviderRegistry::default();
//! let engine = FederatedSearch::in_memory(registry, SearchConfig::default())?;
//! let query = Query::builder().elements(["Fe", "O"]).limit(20).build()?;
//! let result = engine.search(&query).await?;
//! for material in &result.materials {
//!     println!("{} {:?}", material.formula, material.sources);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod capability;
pub mod circuit_breaker;
pub mod clients;
pub mod composition;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fusion;
pub mod http;
pub mod orchestrator;
mod persist;
pub mod provider;
pub mod query;
pub mod registry;
pub mod translator;
pub mod types;

pub use cache::SearchCache;
pub use capability::{FilterField, ProviderCapabilities};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitState, HealthManager, ProviderHealth};
pub use clients::{FetchOutcome, ProviderClient};
pub use config::{DiscoveryConfig, SearchConfig};
pub use discovery::Discovery;
pub use error::{ProviderError, Result, SearchError};
pub use orchestrator::{FederatedSearch, SearchOptions};
pub use provider::{ApiType, ProviderEndpoint, ProviderPatch, Tier};
pub use query::{CrystalSystem, Property, PropertyRange, Query, SpaceGroup};
pub use registry::ProviderRegistry;
pub use types::{Material, ProviderQueryLog, ProviderStatus, RawProperty, RawRecord, SearchResult};
