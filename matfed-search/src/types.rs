//! Core record and result types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::Query;

/// One property value as a provider reported it, before fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProperty {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl RawProperty {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            unit: None,
            method: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// A provider-native response item parsed into the common shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Provider that returned the record.
    pub source: String,
    /// The provider's own identifier for the entry.
    pub native_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_group: Option<String>,
    /// Property name → value, sparse.
    #[serde(default)]
    pub properties: BTreeMap<String, RawProperty>,
}

impl RawRecord {
    pub fn new(source: impl Into<String>, native_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            native_id: native_id.into(),
            formula: None,
            elements: Vec::new(),
            space_group: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_elements<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements = elements.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_space_group(mut self, space_group: impl Into<String>) -> Self {
        self.space_group = Some(space_group.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, property: RawProperty) -> Self {
        self.properties.insert(name.into(), property);
        self
    }
}

/// A scalar with its provenance. Provenance always travels with the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub value: f64,
    /// Provider id that produced the value.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A provider's identifier for one of the records fused into a material.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderRef {
    pub source: String,
    pub native_id: String,
}

/// A canonical, fused material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Derived from the composition + structure signature.
    pub id: String,
    /// Reduced formula, or the hyphen-joined chemical system (`Fe-O`) when
    /// no contributing record carried a usable formula.
    pub formula: String,
    /// Sorted distinct element symbols.
    pub elements: Vec<String>,
    pub nelements: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_group: Option<String>,
    /// Providers that supplied at least one property value, sorted.
    pub sources: Vec<String>,
    /// Every contributing record.
    pub identifiers: Vec<ProviderRef>,
    /// Primary value per property.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Other providers' values for the same property.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_properties: BTreeMap<String, Vec<PropertyValue>>,
}

impl Material {
    /// Primary value for `name`, if any provider reported it.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Properties whose providers disagree beyond a relative tolerance.
    pub fn conflicts(&self) -> Vec<&str> {
        self.extra_properties
            .iter()
            .filter(|(name, extras)| {
                self.properties
                    .get(name.as_str())
                    .is_some_and(|primary| extras.iter().any(|v| !approx_eq(v.value, primary.value)))
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= 1e-9 * scale
}

/// Outcome of one provider within a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Success,
    Timeout,
    HttpError,
    ParseError,
    /// Skipped before any network call because the circuit is open.
    CircuitOpen,
    /// Excluded by capability mismatch or allow-list. Not a failure.
    Skipped,
}

impl ProviderStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::HttpError => "http_error",
            Self::ParseError => "parse_error",
            Self::CircuitOpen => "circuit_open",
            Self::Skipped => "skipped",
        }
    }

    /// Statuses that count against a provider's health.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Timeout | Self::HttpError | Self::ParseError)
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-provider log line in a [`SearchResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderQueryLog {
    pub provider: String,
    pub status: ProviderStatus,
    pub result_count: usize,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The answer to one federated search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Fused materials, deterministically ordered and truncated to the limit.
    pub materials: Vec<Material>,
    /// Number of fused materials before truncation.
    pub total_count: usize,
    pub query: Query,
    pub provider_logs: Vec<ProviderQueryLog>,
    pub warnings: Vec<String>,
    pub cached: bool,
    pub search_time_ms: u64,
}

impl SearchResult {
    /// An empty result, used when nothing could be queried.
    pub fn empty(query: Query) -> Self {
        Self {
            materials: Vec::new(),
            total_count: 0,
            query,
            provider_logs: Vec::new(),
            warnings: Vec::new(),
            cached: false,
            search_time_ms: 0,
        }
    }

    /// Log entries whose status is not `success`.
    pub fn failed_providers(&self) -> impl Iterator<Item = &ProviderQueryLog> {
        self.provider_logs
            .iter()
            .filter(|log| log.status != ProviderStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(v: f64, source: &str) -> PropertyValue {
        PropertyValue {
            value: v,
            source: source.into(),
            method: None,
            unit: Some("eV".into()),
        }
    }

    fn material() -> Material {
        Material {
            id: "mat-1".into(),
            formula: "Fe2O3".into(),
            elements: vec!["Fe".into(), "O".into()],
            nelements: 2,
            space_group: None,
            sources: vec!["a".into(), "b".into()],
            identifiers: vec![],
            properties: BTreeMap::new(),
            extra_properties: BTreeMap::new(),
        }
    }

    #[test]
    fn conflicts_ignore_agreeing_values() {
        let mut m = material();
        m.properties.insert("band_gap".into(), value(2.2, "a"));
        m.extra_properties
            .insert("band_gap".into(), vec![value(2.2, "b")]);
        assert!(m.conflicts().is_empty());
    }

    #[test]
    fn conflicts_report_disagreement() {
        let mut m = material();
        m.properties.insert("band_gap".into(), value(2.2, "a"));
        m.extra_properties
            .insert("band_gap".into(), vec![value(2.0, "b")]);
        assert_eq!(m.conflicts(), vec!["band_gap"]);
    }

    #[test]
    fn status_names_match_taxonomy() {
        assert_eq!(ProviderStatus::HttpError.to_string(), "http_error");
        assert_eq!(ProviderStatus::CircuitOpen.to_string(), "circuit_open");
        let json = serde_json::to_string(&ProviderStatus::ParseError).unwrap();
        assert_eq!(json, "\"parse_error\"");
    }

    #[test]
    fn only_call_failures_count_against_health() {
        assert!(ProviderStatus::Timeout.is_failure());
        assert!(ProviderStatus::ParseError.is_failure());
        assert!(!ProviderStatus::Skipped.is_failure());
        assert!(!ProviderStatus::CircuitOpen.is_failure());
        assert!(!ProviderStatus::Success.is_failure());
    }

    #[test]
    fn raw_record_builder() {
        let r = RawRecord::new("mp", "mp-19770")
            .with_formula("Fe2O3")
            .with_property("band_gap", RawProperty::new(2.2).with_unit("eV"));
        assert_eq!(r.properties["band_gap"].value, 2.2);
        assert!(r.elements.is_empty());
    }
}
