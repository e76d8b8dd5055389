//! Error types for the matfed-search crate.
//!
//! Only [`SearchError`] can escape a search call, and only for an invalid
//! query, bad configuration, or caller cancellation. Individual provider
//! failures are carried as [`ProviderError`] and end up as log entries in
//! the returned result. No API keys appear in any message.

use crate::types::ProviderStatus;

/// Errors that can occur in the federated search engine.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The query failed validation; no provider was contacted.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid engine or registry configuration.
    #[error("config error: {0}")]
    Config(String),

    /// An HTTP request outside the per-provider fan-out failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An operation outside the per-provider fan-out timed out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A persisted or fetched document did not match its schema.
    #[error("parse error: {0}")]
    Parse(String),

    /// Provider discovery failed and no cached discovery was usable.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Filesystem error while loading or persisting state.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller cancelled the search.
    #[error("search cancelled")]
    Cancelled,
}

/// Convenience type alias for matfed-search results.
pub type Result<T> = std::result::Result<T, SearchError>;

/// A single provider call failure. Never fatal to a search.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider exceeded its call budget.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Transport failure or non-2xx response.
    #[error("HTTP {}: {message}", status_label(.status))]
    Http {
        /// Response status, if a response arrived at all.
        status: Option<u16>,
        /// Human-readable detail.
        message: String,
    },

    /// The body did not match the expected response schema.
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Map this failure onto the query-log status taxonomy.
    pub fn status(&self) -> ProviderStatus {
        match self {
            Self::Timeout(_) => ProviderStatus::Timeout,
            Self::Http { .. } => ProviderStatus::HttpError,
            Self::Parse(_) => ProviderStatus::ParseError,
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            return Self::Timeout(timeout_ms);
        }
        if err.is_decode() {
            return Self::Parse(err.to_string());
        }
        Self::Http {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "error".to_owned(), |s| s.to_string())
}
