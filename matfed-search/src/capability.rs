//! Provider capability declarations and query requirements.
//!
//! Composition and property filters are hard requirements: a provider that
//! cannot express one is not queried at all. Structural filters are soft: the
//! provider is still queried and the translator records a warning for the
//! clause it had to drop.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::{Property, Query};

/// A single filterable query field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Elements,
    ElementsAny,
    ExcludedElements,
    Formula,
    Nelements,
    Property(Property),
    SpaceGroup,
    CrystalSystem,
}

impl FilterField {
    /// Structural fields degrade to a warning instead of excluding a provider.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::SpaceGroup | Self::CrystalSystem)
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elements => f.write_str("elements"),
            Self::ElementsAny => f.write_str("elements_any"),
            Self::ExcludedElements => f.write_str("excluded_elements"),
            Self::Formula => f.write_str("formula"),
            Self::Nelements => f.write_str("nelements"),
            Self::Property(p) => f.write_str(p.name()),
            Self::SpaceGroup => f.write_str("space_group"),
            Self::CrystalSystem => f.write_str("crystal_system"),
        }
    }
}

/// Which element-set operators a provider understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementOperators {
    /// "contains all" (`HAS ALL`).
    pub has_all: bool,
    /// "contains any" (`HAS ANY`).
    pub has_any: bool,
    /// Negated "contains any", used for exclusions.
    pub exclude: bool,
}

impl Default for ElementOperators {
    fn default() -> Self {
        Self {
            has_all: true,
            has_any: true,
            exclude: true,
        }
    }
}

/// What a provider can filter on, and under which field names.
///
/// Defaults describe a standard-compliant endpoint: all element operators,
/// reduced formula and element count, and no provider-specific property or
/// structural fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCapabilities {
    pub element_operators: ElementOperators,
    pub formula: bool,
    pub nelements: bool,
    /// Property → provider-native field name.
    pub properties: BTreeMap<Property, String>,
    /// Provider-native space-group field, if filterable.
    pub space_group_field: Option<String>,
    /// Provider-native crystal-system field, if filterable.
    pub crystal_system_field: Option<String>,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            element_operators: ElementOperators::default(),
            formula: true,
            nelements: true,
            properties: BTreeMap::new(),
            space_group_field: None,
            crystal_system_field: None,
        }
    }
}

impl ProviderCapabilities {
    /// Whether the provider can express a filter on `field`.
    pub fn supports(&self, field: FilterField) -> bool {
        match field {
            FilterField::Elements => self.element_operators.has_all,
            FilterField::ElementsAny => self.element_operators.has_any,
            FilterField::ExcludedElements => self.element_operators.exclude,
            FilterField::Formula => self.formula,
            FilterField::Nelements => self.nelements,
            FilterField::Property(p) => self.properties.contains_key(&p),
            FilterField::SpaceGroup => self.space_group_field.is_some(),
            FilterField::CrystalSystem => self.crystal_system_field.is_some(),
        }
    }

    /// Hard requirements of `query` this provider cannot express.
    pub fn missing(&self, query: &Query) -> Vec<FilterField> {
        required_fields(query)
            .into_iter()
            .filter(|f| !f.is_soft() && !self.supports(*f))
            .collect()
    }

    /// Provider-native field name for a property, if supported.
    pub fn property_field(&self, property: Property) -> Option<&str> {
        self.properties.get(&property).map(String::as_str)
    }
}

/// Every filter field present in `query`, in a fixed order.
pub fn required_fields(query: &Query) -> BTreeSet<FilterField> {
    let mut fields = BTreeSet::new();
    if !query.elements().is_empty() {
        fields.insert(FilterField::Elements);
    }
    if !query.elements_any().is_empty() {
        fields.insert(FilterField::ElementsAny);
    }
    if !query.excluded_elements().is_empty() {
        fields.insert(FilterField::ExcludedElements);
    }
    if query.formula().is_some() {
        fields.insert(FilterField::Formula);
    }
    if query.nelements().is_some() {
        fields.insert(FilterField::Nelements);
    }
    for property in query.properties().keys() {
        fields.insert(FilterField::Property(*property));
    }
    if query.space_group().is_some() {
        fields.insert(FilterField::SpaceGroup);
    }
    if query.crystal_system().is_some() {
        fields.insert(FilterField::CrystalSystem);
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CrystalSystem, PropertyRange};

    #[test]
    fn default_capabilities_cover_composition() {
        let caps = ProviderCapabilities::default();
        assert!(caps.supports(FilterField::Elements));
        assert!(caps.supports(FilterField::ElementsAny));
        assert!(caps.supports(FilterField::Formula));
        assert!(!caps.supports(FilterField::Property(Property::BandGap)));
        assert!(!caps.supports(FilterField::SpaceGroup));
    }

    #[test]
    fn missing_reports_hard_requirements_only() {
        let query = Query::builder()
            .elements(["Fe"])
            .property(Property::BandGap, PropertyRange::at_least(1.0))
            .crystal_system(CrystalSystem::Cubic)
            .build()
            .unwrap();
        let caps = ProviderCapabilities::default();
        assert_eq!(
            caps.missing(&query),
            vec![FilterField::Property(Property::BandGap)]
        );
    }

    #[test]
    fn declared_property_satisfies_requirement() {
        let query = Query::builder()
            .property(Property::BandGap, PropertyRange::at_least(1.0))
            .build()
            .unwrap();
        let mut caps = ProviderCapabilities::default();
        caps.properties
            .insert(Property::BandGap, "_mp_band_gap".into());
        assert!(caps.missing(&query).is_empty());
        assert_eq!(caps.property_field(Property::BandGap), Some("_mp_band_gap"));
    }

    #[test]
    fn required_fields_in_fixed_order() {
        let query = Query::builder()
            .crystal_system(CrystalSystem::Cubic)
            .exclude(["Pb"])
            .elements(["Fe"])
            .build()
            .unwrap();
        let fields: Vec<_> = required_fields(&query).into_iter().collect();
        assert_eq!(
            fields,
            vec![
                FilterField::Elements,
                FilterField::ExcludedElements,
                FilterField::CrystalSystem
            ]
        );
    }

    #[test]
    fn filter_field_display() {
        assert_eq!(FilterField::Property(Property::BandGap).to_string(), "band_gap");
        assert_eq!(FilterField::ElementsAny.to_string(), "elements_any");
    }
}
