//! Client for the Materials Project native summary API.
//!
//! `GET {base_url}/materials/summary/?{params}&_limit=N&_fields=...` with an
//! `X-API-KEY` header. Property fields are read by the names the endpoint's
//! capabilities declare; nested fields use dotted paths.

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

const API_KEY_HEADER: &str = "X-API-KEY";
const SPACE_GROUP_PATH: &str = "symmetry.symbol";

pub struct MaterialsProjectClient {
    http: reqwest::Client,
    timeout_ms: u64,
}

impl MaterialsProjectClient {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SummaryDoc {
    material_id: String,
    #[serde(default, deserialize_with = "lenient")]
    formula_pretty: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    elements: Option<Vec<String>>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[async_trait]
impl ProviderClient for MaterialsProjectClient {
    async fn fetch(
        &self,
        endpoint: &ProviderEndpoint,
        query: &Query,
        limit: usize,
    ) -> Result<FetchOutcome, ProviderError> {
        let translation = translate(query, &endpoint.capabilities, Dialect::MaterialsProject);
        let url = summary_url(endpoint, &translation.filter, limit)?;
        tracing::trace!(provider = %endpoint.id, %url, "querying summary");

        let mut request = self.http.get(url);
        if let Some(key) = endpoint.api_key() {
            request = request.header(API_KEY_HEADER, key);
        }
        let body: SummaryResponse = get_json(request, self.timeout_ms).await?;

        let mut outcome = FetchOutcome::default();
        for raw in body.data {
            match parse_doc(endpoint, raw) {
                Some(record) => outcome.records.push(record),
                None => outcome.dropped += 1,
            }
        }
        if outcome.dropped > 0 {
            tracing::warn!(provider = %endpoint.id, dropped = outcome.dropped, "dropped malformed documents");
        }
        outcome.warnings = translation.warnings;
        Ok(outcome)
    }

    fn api_type(&self) -> ApiType {
        ApiType::MaterialsProject
    }
}

fn summary_url(endpoint: &ProviderEndpoint, params: &str, limit: usize) -> Result<Url, ProviderError> {
    let mut url = Url::parse(&format!("{}/materials/summary/", endpoint.base_url)).map_err(|e| {
        ProviderError::Http {
            status: None,
            message: format!("invalid base URL: {e}"),
        }
    })?;
    url.set_query((!params.is_empty()).then_some(params));
    url.query_pairs_mut()
        .append_pair("_limit", &limit.to_string())
        .append_pair("_fields", &requested_fields(endpoint));
    Ok(url)
}

fn requested_fields(endpoint: &ProviderEndpoint) -> String {
    let mut fields = vec!["material_id", "formula_pretty", "elements", "symmetry"];
    for field in endpoint.capabilities.properties.values() {
        let top = field.split('.').next().unwrap_or(field);
        if !fields.contains(&top) {
            fields.push(top);
        }
    }
    fields.join(",")
}

fn parse_doc(endpoint: &ProviderEndpoint, raw: Value) -> Option<RawRecord> {
    let doc: SummaryDoc = serde_json::from_value(raw).ok()?;
    if doc.material_id.trim().is_empty() {
        return None;
    }
    let formula = doc.formula_pretty.filter(|f| !f.trim().is_empty());
    let elements = doc.elements.unwrap_or_default();
    if formula.is_none() && elements.is_empty() {
        return None;
    }

    let mut record = RawRecord::new(endpoint.id.clone(), doc.material_id.trim()).with_elements(elements);
    record.formula = formula;
    record.space_group = lookup(&doc.fields, SPACE_GROUP_PATH).and_then(text);

    for (property, field) in &endpoint.capabilities.properties {
        if let Some(value) = lookup(&doc.fields, field).and_then(number) {
            record.properties.insert(
                property.name().to_owned(),
                RawProperty::new(value)
                    .with_unit(property.unit())
                    .with_method("materials_project"),
            );
        }
    }
    Some(record)
}
