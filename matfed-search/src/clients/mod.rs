//! Provider API clients.
//!
//! One [`ProviderClient`] implementation per [`ApiType`]. The registry picks
//! the client once, when it builds the endpoint list, and the orchestrator
//! only ever calls through the trait object.
//!
//! Each `fetch` issues exactly one HTTP request, translates the query into
//! the client's dialect, and parses the response with an explicit schema.
//! A malformed entry is dropped and counted; only a malformed envelope
//! fails the call.

pub mod materials_project;
pub mod optimade;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::provider::{ApiType, ProviderEndpoint};
use crate::query::Query;
use crate::types::RawRecord;

pub use materials_project::MaterialsProjectClient;
pub use optimade::OptimadeClient;

/// What one successful provider call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub records: Vec<RawRecord>,
    /// Entries present in the response but unusable.
    pub dropped: usize,
    /// Clauses the translator had to drop for this provider.
    pub warnings: Vec<String>,
}

/// A provider backend.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// endpoint of the same API type.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Query `endpoint` once, asking for at most `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport failure, non-2xx status, or a
    /// response envelope that does not match the expected schema.
    async fn fetch(
        &self,
        endpoint: &ProviderEndpoint,
        query: &Query,
        limit: usize,
    ) -> Result<FetchOutcome, ProviderError>;

    fn api_type(&self) -> ApiType;
}

/// Pick the client for an API type. `timeout` is the per-call budget the
/// shared `http` client was built with; it only labels timeout errors.
pub fn client_for(
    api_type: ApiType,
    http: reqwest::Client,
    timeout: Duration,
) -> Arc<dyn ProviderClient> {
    match api_type {
        ApiType::Optimade => Arc::new(OptimadeClient::new(http, timeout)),
        ApiType::MaterialsProject => Arc::new(MaterialsProjectClient::new(http, timeout)),
    }
}

/// Send `request`, require a 2xx status, and parse the body as `T`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout_ms: u64,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_reqwest(&e, timeout_ms))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            status: Some(status.as_u16()),
            message: error_detail(&body, status),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::from_reqwest(&e, timeout_ms))?;
    serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Pull a short message out of an error body, falling back to the reason phrase.
fn error_detail(body: &str, status: reqwest::StatusCode) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/errors/0/detail")
            .or_else(|| v.pointer("/errors/0/title"))
            .or_else(|| v.get("detail"))
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    });
    from_json.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_owned()
    })
}

/// Deserialize a field, turning a type mismatch into `None` instead of an error.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Follow a dotted path (`symmetry.symbol`) through nested objects.
pub(crate) fn lookup<'a>(fields: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// A finite number, accepting numeric strings.
pub(crate) fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// A non-empty string, accepting numbers.
pub(crate) fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
