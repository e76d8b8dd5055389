//! Provider endpoint descriptions and the layered patches that build them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::{ElementOperators, ProviderCapabilities};
use crate::query::Property;
use crate::translator::Dialect;

/// Selects which client implementation talks to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    /// Standard filter-query API (`/v1/structures?filter=`).
    #[default]
    Optimade,
    /// Materials Project native summary API.
    MaterialsProject,
}

impl ApiType {
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Optimade => Dialect::Optimade,
            Self::MaterialsProject => Dialect::MaterialsProject,
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Optimade => "optimade",
            Self::MaterialsProject => "materials_project",
        })
    }
}

/// Priority class. Lower tiers are preferred.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Core,
    #[default]
    Standard,
    Experimental,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Core => "core",
            Self::Standard => "standard",
            Self::Experimental => "experimental",
        })
    }
}

/// One addressable data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub id: String,
    pub name: String,
    /// Base URL without trailing slash.
    pub base_url: String,
    pub capabilities: ProviderCapabilities,
    pub tier: Tier,
    pub enabled: bool,
    pub api_type: ApiType,
    /// Environment variable holding the API key. The key itself is never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl ProviderEndpoint {
    /// A standard-capability endpoint, enabled, in the default tier.
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: trim_base_url(&base_url.into()),
            capabilities: ProviderCapabilities::default(),
            tier: Tier::default(),
            enabled: true,
            api_type: ApiType::default(),
            api_key_env: None,
        }
    }

    pub fn with_api_type(mut self, api_type: ApiType) -> Self {
        self.api_type = api_type;
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_property(mut self, property: Property, field: impl Into<String>) -> Self {
        self.capabilities.properties.insert(property, field.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_owned()
}

/// Capability fields a layer may override. Property keys are property
/// names (`band_gap`), values are provider-native field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityPatch {
    pub element_operators: Option<ElementOperators>,
    pub formula: Option<bool>,
    pub nelements: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    pub space_group_field: Option<String>,
    pub crystal_system_field: Option<String>,
}

/// Field-level override for one provider id. `None` leaves the field as
/// the previous layer set it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderPatch {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub tier: Option<Tier>,
    pub enabled: Option<bool>,
    pub api_type: Option<ApiType>,
    pub api_key_env: Option<String>,
    pub capabilities: Option<CapabilityPatch>,
}

impl ProviderPatch {
    /// Apply this patch on top of `endpoint`.
    ///
    /// Unknown property names are ignored with a warning rather than
    /// rejecting the whole layer.
    pub fn apply(&self, endpoint: &mut ProviderEndpoint) {
        if let Some(name) = &self.name {
            endpoint.name.clone_from(name);
        }
        if let Some(url) = &self.base_url {
            endpoint.base_url = trim_base_url(url);
        }
        if let Some(tier) = self.tier {
            endpoint.tier = tier;
        }
        if let Some(enabled) = self.enabled {
            endpoint.enabled = enabled;
        }
        if let Some(api_type) = self.api_type {
            endpoint.api_type = api_type;
        }
        if let Some(var) = &self.api_key_env {
            endpoint.api_key_env = Some(var.clone());
        }
        if let Some(caps) = &self.capabilities {
            let target = &mut endpoint.capabilities;
            if let Some(ops) = caps.element_operators {
                target.element_operators = ops;
            }
            if let Some(formula) = caps.formula {
                target.formula = formula;
            }
            if let Some(nelements) = caps.nelements {
                target.nelements = nelements;
            }
            for (name, field) in &caps.properties {
                match name.parse::<Property>() {
                    Ok(property) if field.is_empty() => {
                        target.properties.remove(&property);
                    }
                    Ok(property) => {
                        target.properties.insert(property, field.clone());
                    }
                    Err(_) => {
                        tracing::warn!(provider = %endpoint.id, property = %name, "unknown property in provider patch");
                    }
                }
            }
            if let Some(field) = &caps.space_group_field {
                target.space_group_field = (!field.is_empty()).then(|| field.clone());
            }
            if let Some(field) = &caps.crystal_system_field {
                target.crystal_system_field = (!field.is_empty()).then(|| field.clone());
            }
        }
    }

    /// Build a fresh endpoint from this patch alone. Requires `base_url`.
    pub fn into_endpoint(&self, id: &str) -> Option<ProviderEndpoint> {
        let base_url = self.base_url.as_deref()?;
        let mut endpoint = ProviderEndpoint::new(id, base_url);
        self.apply(&mut endpoint);
        Some(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trims_trailing_slash() {
        let ep = ProviderEndpoint::new("mp", "https://optimade.materialsproject.org/ ");
        assert_eq!(ep.base_url, "https://optimade.materialsproject.org");
        assert_eq!(ep.name, "mp");
        assert!(ep.enabled);
    }

    #[test]
    fn patch_overrides_only_set_fields() {
        let mut ep = ProviderEndpoint::new("oqmd", "http://old.example");
        let patch = ProviderPatch {
            base_url: Some("https://oqmd.org/optimade/".into()),
            tier: Some(Tier::Core),
            ..Default::default()
        };
        patch.apply(&mut ep);
        assert_eq!(ep.base_url, "https://oqmd.org/optimade");
        assert_eq!(ep.tier, Tier::Core);
        assert_eq!(ep.name, "oqmd");
        assert!(ep.enabled);
    }

    #[test]
    fn capability_patch_merges_property_fields() {
        let mut ep = ProviderEndpoint::new("mp", "https://x").with_property(Property::Density, "d");
        let patch = ProviderPatch {
            capabilities: Some(CapabilityPatch {
                properties: BTreeMap::from([
                    ("band_gap".to_string(), "_mp_band_gap".to_string()),
                    ("density".to_string(), String::new()),
                    ("hardness".to_string(), "_x".to_string()),
                ]),
                space_group_field: Some("_mp_spacegroup".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        patch.apply(&mut ep);
        assert_eq!(
            ep.capabilities.property_field(Property::BandGap),
            Some("_mp_band_gap")
        );
        assert_eq!(ep.capabilities.property_field(Property::Density), None);
        assert_eq!(
            ep.capabilities.space_group_field.as_deref(),
            Some("_mp_spacegroup")
        );
    }

    #[test]
    fn patch_without_url_cannot_create_endpoint() {
        let patch = ProviderPatch {
            enabled: Some(true),
            ..Default::default()
        };
        assert!(patch.into_endpoint("custom").is_none());

        let patch = ProviderPatch {
            base_url: Some("https://custom.example/optimade".into()),
            name: Some("Custom DB".into()),
            ..Default::default()
        };
        let ep = patch.into_endpoint("custom").unwrap();
        assert_eq!(ep.name, "Custom DB");
        assert_eq!(ep.api_type, ApiType::Optimade);
    }

    #[test]
    fn patch_deserializes_from_toml() {
        let patch: ProviderPatch = toml::from_str(
            r#"
            tier = "core"
            api_type = "materials_project"
            api_key_env = "MP_API_KEY"

            [capabilities.properties]
            band_gap = "band_gap"
            "#,
        )
        .unwrap();
        assert_eq!(patch.tier, Some(Tier::Core));
        assert_eq!(patch.api_type, Some(ApiType::MaterialsProject));
        assert_eq!(
            patch.capabilities.unwrap().properties["band_gap"],
            "band_gap"
        );
    }

    #[test]
    fn tiers_order_core_first() {
        assert!(Tier::Core < Tier::Standard);
        assert!(Tier::Standard < Tier::Experimental);
    }

    #[test]
    fn api_key_missing_env_is_none() {
        let mut ep = ProviderEndpoint::new("mp", "https://x");
        ep.api_key_env = Some("MATFED_TEST_KEY_THAT_IS_NEVER_SET".into());
        assert!(ep.api_key().is_none());
    }
}
