//! Shared HTTP client for provider and discovery requests.
//!
//! Provides a configured [`reqwest::Client`] with an identifying
//! User-Agent, JSON accept header, compression, and a bounded redirect
//! policy. Per-call deadlines are enforced by the orchestrator; the client
//! timeout here is a backstop.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use crate::config::SearchConfig;
use crate::error::SearchError;

/// Default User-Agent: `matfed/<crate version>`.
pub fn default_user_agent() -> String {
    format!("matfed/{}", env!("CARGO_PKG_VERSION"))
}

/// Build a [`reqwest::Client`] for provider APIs.
///
/// The client has:
/// - Timeout from config
/// - `matfed/<version>` User-Agent (or custom if configured)
/// - `Accept: application/json`
/// - Brotli and gzip decompression
///
/// # Errors
///
/// Returns [`SearchError::Http`] if the client cannot be constructed.
pub fn build_client(config: &SearchConfig) -> Result<reqwest::Client, SearchError> {
    build_client_with_timeout(config, Duration::from_secs(config.timeout_seconds))
}

/// Same as [`build_client`] with an explicit timeout, used by discovery.
pub fn build_client_with_timeout(
    config: &SearchConfig,
    timeout: Duration,
) -> Result<reqwest::Client, SearchError> {
    let ua = match config.user_agent {
        Some(ref custom) => custom.clone(),
        None => default_user_agent(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(ua)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| SearchError::Http(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_user_agent_names_the_crate() {
        let ua = default_user_agent();
        assert!(ua.starts_with("matfed/"));
        assert!(ua.len() > "matfed/".len());
    }

    #[test]
    fn build_client_with_default_config() {
        let config = SearchConfig::default();
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn build_client_with_custom_ua() {
        let config = SearchConfig {
            user_agent: Some("LabBot/1.0".into()),
            ..Default::default()
        };
        assert!(build_client(&config).is_ok());
    }
}
