//! Provider registry built from layered sources.
//!
//! Three layers are merged field by field, keyed by provider id, with the
//! later layer winning:
//!
//! 1. endpoints found by [`Discovery`](crate::discovery::Discovery)
//! 2. bundled corrections (`data/corrections.toml`), which fix known-bad
//!    URLs and declare tiers and capabilities discovery cannot know
//! 3. operator overrides (`providers.toml`), which can enable or disable
//!    providers, add custom ones, and configure API keys
//!
//! Each endpoint is paired with its [`ProviderClient`] when the registry is
//! built. Endpoints are kept in priority order: tier, then id.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::capability::FilterField;
use crate::clients::{client_for, ProviderClient};
use crate::error::{Result, SearchError};
use crate::provider::{ApiType, ProviderEndpoint, ProviderPatch};
use crate::query::Query;

/// Bundled corrections layer.
const CORRECTIONS_TOML: &str = include_str!("../data/corrections.toml");

/// Provider id → field-level patch. One layer of the merge.
pub type ProviderPatches = BTreeMap<String, ProviderPatch>;

/// Parse a patch layer from TOML, one table per provider id.
///
/// # Errors
///
/// Returns [`SearchError::Config`] if the text is not valid TOML or a
/// table does not match the patch schema.
pub fn parse_patches(text: &str) -> Result<ProviderPatches> {
    toml::from_str(text).map_err(|e| SearchError::Config(format!("invalid provider patches: {e}")))
}

/// The corrections compiled into this crate.
pub fn bundled_corrections() -> Result<ProviderPatches> {
    parse_patches(CORRECTIONS_TOML)
}

/// Load an operator override file. A missing file is an empty layer.
pub fn load_overrides(path: &Path) -> Result<ProviderPatches> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_patches(&text)
            .map_err(|e| SearchError::Config(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProviderPatches::new()),
        Err(e) => Err(e.into()),
    }
}

/// Merge `layers` over the discovered endpoints, last layer wins.
///
/// A patch for an id no earlier layer produced creates a new endpoint if
/// it carries a `base_url`, and is ignored otherwise. The result is sorted
/// by tier, then id.
pub fn merge_layers(
    discovered: Vec<ProviderEndpoint>,
    layers: &[&ProviderPatches],
) -> Vec<ProviderEndpoint> {
    let mut merged: BTreeMap<String, ProviderEndpoint> = discovered
        .into_iter()
        .map(|ep| (ep.id.clone(), ep))
        .collect();

    for layer in layers {
        for (id, patch) in layer.iter() {
            match merged.get_mut(id) {
                Some(endpoint) => patch.apply(endpoint),
                None => match patch.into_endpoint(id) {
                    Some(endpoint) => {
                        merged.insert(id.clone(), endpoint);
                    }
                    None => {
                        tracing::debug!(provider = %id, "patch for unknown provider has no base_url; ignored");
                    }
                },
            }
        }
    }

    let mut endpoints: Vec<ProviderEndpoint> = merged.into_values().collect();
    endpoints.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.id.cmp(&b.id)));
    endpoints
}

/// An endpoint and the client that talks to it.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub endpoint: ProviderEndpoint,
    pub client: Arc<dyn ProviderClient>,
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("endpoint", &self.endpoint.id)
            .field("client", &self.client.api_type())
            .finish()
    }
}

/// Why a provider was left out of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Explicitly requested but disabled.
    Disabled,
    /// The query uses fields the provider cannot filter on.
    MissingCapability(Vec<FilterField>),
    /// The provider needs an API key and the variable is unset.
    MissingApiKey(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("provider is disabled"),
            Self::MissingCapability(fields) => {
                let names: Vec<String> = fields.iter().map(ToString::to_string).collect();
                write!(f, "cannot filter on {}", names.join(", "))
            }
            Self::MissingApiKey(var) => write!(f, "API key not set ({var})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProvider {
    pub provider: String,
    pub reason: SkipReason,
}

/// Providers selected for one query.
#[derive(Debug, Clone, Default)]
pub struct CapableSet {
    /// Capable providers in priority order.
    pub capable: Vec<RegisteredProvider>,
    /// Providers excluded for a reason worth reporting.
    pub skipped: Vec<SkippedProvider>,
    pub warnings: Vec<String>,
}

impl CapableSet {
    /// Capable provider ids in priority order.
    pub fn priority(&self) -> Vec<String> {
        self.capable.iter().map(|p| p.endpoint.id.clone()).collect()
    }
}

/// The addressable provider set.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    /// Pair every endpoint with a client. Endpoints of the same API type
    /// share one client instance.
    pub fn build(endpoints: Vec<ProviderEndpoint>, http: reqwest::Client, timeout: Duration) -> Self {
        let mut clients: HashMap<ApiType, Arc<dyn ProviderClient>> = HashMap::new();
        let parts = endpoints
            .into_iter()
            .map(|endpoint| {
                let client = clients
                    .entry(endpoint.api_type)
                    .or_insert_with(|| client_for(endpoint.api_type, http.clone(), timeout))
                    .clone();
                (endpoint, client)
            })
            .collect();
        Self::from_parts(parts)
    }

    /// Build from explicit endpoint/client pairs, e.g. mock clients in tests.
    pub fn from_parts(parts: Vec<(ProviderEndpoint, Arc<dyn ProviderClient>)>) -> Self {
        let mut providers: Vec<RegisteredProvider> = parts
            .into_iter()
            .map(|(endpoint, client)| RegisteredProvider { endpoint, client })
            .collect();
        providers.sort_by(|a, b| {
            a.endpoint
                .tier
                .cmp(&b.endpoint.tier)
                .then_with(|| a.endpoint.id.cmp(&b.endpoint.id))
        });
        providers.dedup_by(|a, b| a.endpoint.id == b.endpoint.id);
        Self { providers }
    }

    pub fn providers(&self) -> &[RegisteredProvider] {
        &self.providers
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|p| p.endpoint.id == id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Select the providers that can answer `query`.
    ///
    /// With an allow-list, only listed providers are considered, in the
    /// listed order, and listing a disabled provider is reported. Without
    /// one, every enabled provider is considered in registry order.
    pub fn get_capable(&self, query: &Query) -> CapableSet {
        let mut set = CapableSet::default();

        let candidates: Vec<(&RegisteredProvider, bool)> = if query.providers().is_empty() {
            self.providers.iter().map(|p| (p, false)).collect()
        } else {
            let mut listed = Vec::new();
            for id in query.providers() {
                match self.get(id) {
                    Some(p) => listed.push((p, true)),
                    None => set.warnings.push(format!("unknown provider '{id}' ignored")),
                }
            }
            listed
        };

        for (provider, requested) in candidates {
            let endpoint = &provider.endpoint;
            if !endpoint.enabled {
                if requested {
                    set.skipped.push(SkippedProvider {
                        provider: endpoint.id.clone(),
                        reason: SkipReason::Disabled,
                    });
                }
                continue;
            }
            if let Some(var) = &endpoint.api_key_env {
                if endpoint.api_key().is_none() {
                    set.skipped.push(SkippedProvider {
                        provider: endpoint.id.clone(),
                        reason: SkipReason::MissingApiKey(var.clone()),
                    });
                    continue;
                }
            }
            let missing = endpoint.capabilities.missing(query);
            if !missing.is_empty() {
                set.skipped.push(SkippedProvider {
                    provider: endpoint.id.clone(),
                    reason: SkipReason::MissingCapability(missing),
                });
                continue;
            }
            set.capable.push(provider.clone());
        }

        tracing::debug!(
            capable = set.capable.len(),
            skipped = set.skipped.len(),
            "providers selected"
        );
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Tier;
    use crate::query::{Property, PropertyRange};

    fn registry(endpoints: Vec<ProviderEndpoint>) -> ProviderRegistry {
        ProviderRegistry::build(endpoints, reqwest::Client::new(), Duration::from_secs(5))
    }

    fn ids(providers: &[RegisteredProvider]) -> Vec<&str> {
        providers.iter().map(|p| p.endpoint.id.as_str()).collect()
    }

    #[test]
    fn bundled_corrections_parse() {
        let corrections = bundled_corrections().unwrap();
        assert!(corrections.contains_key("mp"));
        assert!(corrections.contains_key("oqmd"));
        let native = &corrections["materials_project"];
        assert_eq!(native.api_type, Some(ApiType::MaterialsProject));
        assert_eq!(native.enabled, Some(false));
    }

    #[test]
    fn later_layers_win_field_by_field() {
        let discovered = vec![
            ProviderEndpoint::new("mp", "http://wrong.example/mp"),
            ProviderEndpoint::new("cod", "https://cod.example/optimade"),
        ];
        let corrections = parse_patches(
            r#"
            [mp]
            base_url = "https://optimade.materialsproject.org"
            tier = "core"
            "#,
        )
        .unwrap();
        let overrides = parse_patches(
            r#"
            [mp]
            enabled = false

            [custom]
            base_url = "https://my.lab/optimade"
            name = "Lab DB"

            [ghost]
            enabled = true
            "#,
        )
        .unwrap();

        let merged = merge_layers(discovered, &[&corrections, &overrides]);
        let ids: Vec<_> = merged.iter().map(|e| e.id.as_str()).collect();
        // core first, then the rest by id
        assert_eq!(ids, vec!["mp", "cod", "custom"]);
        assert_eq!(merged[0].base_url, "https://optimade.materialsproject.org");
        assert_eq!(merged[0].tier, Tier::Core);
        assert!(!merged[0].enabled);
        assert_eq!(merged[2].name, "Lab DB");
    }

    #[test]
    fn overrides_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layer = load_overrides(&dir.path().join("providers.toml")).unwrap();
        assert!(layer.is_empty());
    }

    #[test]
    fn overrides_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.toml");
        std::fs::write(&path, "[mp]\ntier = 7").unwrap();
        let err = load_overrides(&path).unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
        assert!(err.to_string().contains("providers.toml"));
    }

    #[test]
    fn capable_excludes_providers_missing_hard_fields() {
        let reg = registry(vec![
            ProviderEndpoint::new("a", "https://a").with_property(Property::BandGap, "_a_gap"),
            ProviderEndpoint::new("b", "https://b"),
        ]);
        let q = Query::builder()
            .elements(["Fe"])
            .property(Property::BandGap, PropertyRange::at_least(1.0))
            .build()
            .unwrap();
        let set = reg.get_capable(&q);
        assert_eq!(ids(&set.capable), vec!["a"]);
        assert_eq!(set.skipped.len(), 1);
        assert_eq!(set.skipped[0].provider, "b");
        assert_eq!(
            set.skipped[0].reason.to_string(),
            "cannot filter on band_gap"
        );
    }

    #[test]
    fn structural_fields_do_not_exclude() {
        let reg = registry(vec![ProviderEndpoint::new("a", "https://a")]);
        let q = Query::builder()
            .elements(["Na", "Cl"])
            .crystal_system(crate::query::CrystalSystem::Cubic)
            .build()
            .unwrap();
        assert_eq!(ids(&reg.get_capable(&q).capable), vec!["a"]);
    }

    #[test]
    fn disabled_providers_are_silent_unless_requested() {
        let reg = registry(vec![
            ProviderEndpoint::new("a", "https://a"),
            ProviderEndpoint::new("b", "https://b").disabled(),
        ]);
        let q = Query::builder().elements(["Fe"]).build().unwrap();
        let set = reg.get_capable(&q);
        assert_eq!(ids(&set.capable), vec!["a"]);
        assert!(set.skipped.is_empty());

        let q = Query::builder()
            .elements(["Fe"])
            .providers(["b", "a"])
            .build()
            .unwrap();
        let set = reg.get_capable(&q);
        assert_eq!(ids(&set.capable), vec!["a"]);
        assert_eq!(set.skipped[0].reason, SkipReason::Disabled);
    }

    #[test]
    fn allow_list_sets_priority_and_warns_on_unknown() {
        let reg = registry(vec![
            ProviderEndpoint::new("a", "https://a").with_tier(Tier::Core),
            ProviderEndpoint::new("b", "https://b"),
            ProviderEndpoint::new("c", "https://c"),
        ]);
        let q = Query::builder()
            .elements(["Fe"])
            .providers(["c", "nope", "a"])
            .build()
            .unwrap();
        let set = reg.get_capable(&q);
        assert_eq!(set.priority(), vec!["c", "a"]);
        assert_eq!(set.warnings, vec!["unknown provider 'nope' ignored"]);
    }

    #[test]
    fn default_priority_is_tier_then_id() {
        let reg = registry(vec![
            ProviderEndpoint::new("zeta", "https://z").with_tier(Tier::Core),
            ProviderEndpoint::new("alpha", "https://a").with_tier(Tier::Experimental),
            ProviderEndpoint::new("beta", "https://b"),
        ]);
        let q = Query::builder().elements(["Fe"]).build().unwrap();
        assert_eq!(reg.get_capable(&q).priority(), vec!["zeta", "beta", "alpha"]);
    }

    #[test]
    fn missing_api_key_is_reported() {
        let mut ep = ProviderEndpoint::new("native", "https://api.example")
            .with_api_type(ApiType::MaterialsProject);
        ep.api_key_env = Some("MATFED_TEST_UNSET_KEY_VAR".into());
        let reg = registry(vec![ep]);
        let q = Query::builder().elements(["Fe"]).build().unwrap();
        let set = reg.get_capable(&q);
        assert!(set.capable.is_empty());
        assert_eq!(
            set.skipped[0].reason,
            SkipReason::MissingApiKey("MATFED_TEST_UNSET_KEY_VAR".into())
        );
    }

    #[test]
    fn clients_match_api_type() {
        let reg = registry(vec![
            ProviderEndpoint::new("opt", "https://o"),
            ProviderEndpoint::new("mpn", "https://m").with_api_type(ApiType::MaterialsProject),
        ]);
        assert_eq!(reg.get("opt").unwrap().client.api_type(), ApiType::Optimade);
        assert_eq!(
            reg.get("mpn").unwrap().client.api_type(),
            ApiType::MaterialsProject
        );
    }
}
