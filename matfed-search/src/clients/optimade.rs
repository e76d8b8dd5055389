//! Client for the open filter-query API (`/v1/structures?filter=...`).
//!
//! Responses are JSON:API documents: a `data` array of entries, each with
//! an `id` and an `attributes` object. Standard composition fields are read
//! by name; property and structural fields are read from whatever names the
//! endpoint's capabilities declare (usually `_prefix_` provider extensions).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use super::{get_json, lenient, lookup, number, text, FetchOutcome, ProviderClient};
use crate::error::ProviderError;
use crate::provider::{ApiType, ProviderEndpoint};
use crate::query::Query;
use crate::translator::{translate, Dialect};
use crate::types::{RawProperty, RawRecord};

/// Fields every request asks for, before provider-specific ones.
const BASE_RESPONSE_FIELDS: &[&str] = &[
    "chemical_formula_reduced",
    "chemical_formula_descriptive",
    "elements",
];

pub struct OptimadeClient {
    http: reqwest::Client,
    timeout_ms: u64,
}

impl OptimadeClient {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StructuresResponse {
    data: Vec<Value>,
    #[serde(default, deserialize_with = "lenient")]
    meta: Option<ResponseMeta>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMeta {
    #[serde(default, deserialize_with = "lenient")]
    data_returned: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    more_data_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct StructureEntry {
    id: EntryId,
    #[serde(default, deserialize_with = "lenient")]
    attributes: Option<StructureAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntryId {
    Text(String),
    Number(i64),
}

impl EntryId {
    fn into_string(self) -> Option<String> {
        match self {
            Self::Text(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
            Self::Text(_) => None,
            Self::Number(n) => Some(n.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StructureAttributes {
    #[serde(default, deserialize_with = "lenient")]
    chemical_formula_reduced: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    chemical_formula_descriptive: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    elements: Option<Vec<String>>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[async_trait]
impl ProviderClient for OptimadeClient {
    async fn fetch(
        &self,
        endpoint: &ProviderEndpoint,
        query: &Query,
        limit: usize,
    ) -> Result<FetchOutcome, ProviderError> {
        let translation = translate(query, &endpoint.capabilities, Dialect::Optimade);
        let url = structures_url(endpoint, &translation.filter, limit)?;
        tracing::trace!(provider = %endpoint.id, %url, "querying structures");

        let mut request = self.http.get(url);
        if let Some(key) = endpoint.api_key() {
            request = request.bearer_auth(key);
        }
        let body: StructuresResponse = get_json(request, self.timeout_ms).await?;

        if let Some(meta) = &body.meta {
            if meta.more_data_available == Some(true) {
                tracing::debug!(
                    provider = %endpoint.id,
                    returned = meta.data_returned,
                    "provider has more results than requested"
                );
            }
        }

        let mut outcome = parse_entries(endpoint, body.data);
        outcome.warnings = translation.warnings;
        Ok(outcome)
    }

    fn api_type(&self) -> ApiType {
        ApiType::Optimade
    }
}

fn structures_url(
    endpoint: &ProviderEndpoint,
    filter: &str,
    limit: usize,
) -> Result<Url, ProviderError> {
    let mut url = Url::parse(&format!("{}/v1/structures", endpoint.base_url)).map_err(|e| {
        ProviderError::Http {
            status: None,
            message: format!("invalid base URL: {e}"),
        }
    })?;
    {
        let mut pairs = url.query_pairs_mut();
        if !filter.is_empty() {
            pairs.append_pair("filter", filter);
        }
        pairs.append_pair("page_limit", &limit.to_string());
        pairs.append_pair("response_fields", &response_fields(endpoint));
    }
    Ok(url)
}

fn response_fields(endpoint: &ProviderEndpoint) -> String {
    let caps = &endpoint.capabilities;
    let mut fields: Vec<&str> = BASE_RESPONSE_FIELDS.to_vec();
    let extra = caps
        .properties
        .values()
        .map(String::as_str)
        .chain(caps.space_group_field.as_deref());
    for field in extra {
        // Only top-level names are valid response fields.
        let top = field.split('.').next().unwrap_or(field);
        if !fields.contains(&top) {
            fields.push(top);
        }
    }
    fields.join(",")
}

fn parse_entries(endpoint: &ProviderEndpoint, data: Vec<Value>) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    for raw in data {
        match parse_entry(endpoint, raw) {
            Some(record) => outcome.records.push(record),
            None => outcome.dropped += 1,
        }
    }
    if outcome.dropped > 0 {
        tracing::warn!(
            provider = %endpoint.id,
            dropped = outcome.dropped,
            "dropped malformed entries"
        );
    }
    outcome
}

fn parse_entry(endpoint: &ProviderEndpoint, raw: Value) -> Option<RawRecord> {
    let entry: StructureEntry = serde_json::from_value(raw).ok()?;
    let id = entry.id.into_string()?;
    let attrs = entry.attributes.unwrap_or_default();

    let formula = attrs
        .chemical_formula_reduced
        .or(attrs.chemical_formula_descriptive)
        .filter(|f| !f.trim().is_empty());
    let elements = attrs.elements.unwrap_or_default();
    if formula.is_none() && elements.is_empty() {
        return None;
    }

    let mut record = RawRecord::new(endpoint.id.clone(), id).with_elements(elements);
    record.formula = formula;
    record.space_group = endpoint
        .capabilities
        .space_group_field
        .as_deref()
        .and_then(|field| lookup(&attrs.fields, field))
        .and_then(text);

    for (property, field) in &endpoint.capabilities.properties {
        if let Some(value) = lookup(&attrs.fields, field).and_then(number) {
            record.properties.insert(
                property.name().to_owned(),
                RawProperty::new(value).with_unit(property.unit()),
            );
        }
    }
    Some(record)
}
