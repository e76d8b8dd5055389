//! The validated, provider-neutral search query.
//!
//! A [`Query`] is built once through [`QueryBuilder`], which normalises and
//! validates every field, and is immutable afterwards. Sets and maps are
//! ordered collections, so two queries with the same content serialise to
//! the same canonical JSON regardless of construction order. That canonical
//! form is what [`Query::hash`] fingerprints.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::composition::{normalize_symbol, Composition};
use crate::error::{Result, SearchError};

/// Largest accepted result limit.
pub const MAX_LIMIT: usize = 10_000;

/// Result limit used when the builder is not given one.
pub const DEFAULT_LIMIT: usize = 100;

/// A filterable physical property, each in a fixed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    /// Electronic band gap, eV.
    BandGap,
    /// Formation energy per atom, eV/atom.
    FormationEnergy,
    /// Energy above the convex hull, eV/atom.
    EnergyAboveHull,
    /// Voigt-Reuss-Hill bulk modulus, GPa.
    BulkModulus,
    /// Voigt-Reuss-Hill shear modulus, GPa.
    ShearModulus,
    /// Debye temperature, K.
    DebyeTemperature,
    /// Mass density, g/cm³.
    Density,
}

impl Property {
    /// Canonical snake_case name, used as the property key on materials.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BandGap => "band_gap",
            Self::FormationEnergy => "formation_energy",
            Self::EnergyAboveHull => "energy_above_hull",
            Self::BulkModulus => "bulk_modulus",
            Self::ShearModulus => "shear_modulus",
            Self::DebyeTemperature => "debye_temperature",
            Self::Density => "density",
        }
    }

    /// The unit every value of this property is expressed in.
    pub fn unit(&self) -> &'static str {
        match self {
            Self::BandGap => "eV",
            Self::FormationEnergy | Self::EnergyAboveHull => "eV/atom",
            Self::BulkModulus | Self::ShearModulus => "GPa",
            Self::DebyeTemperature => "K",
            Self::Density => "g/cm^3",
        }
    }

    /// All properties in declaration order.
    pub fn all() -> &'static [Property] {
        &[
            Self::BandGap,
            Self::FormationEnergy,
            Self::EnergyAboveHull,
            Self::BulkModulus,
            Self::ShearModulus,
            Self::DebyeTemperature,
            Self::Density,
        ]
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Property {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| SearchError::InvalidQuery(format!("unknown property '{s}'")))
    }
}

/// Inclusive numeric bounds. At least one side must be present.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl PropertyRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        // -0.0 and 0.0 must fingerprint identically.
        let fold = |v: f64| if v == 0.0 { 0.0 } else { v };
        Self {
            min: min.map(fold),
            max: max.map(fold),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self::new(Some(min), None)
    }

    pub fn at_most(max: f64) -> Self {
        Self::new(None, Some(max))
    }

    pub fn between(min: f64, max: f64) -> Self {
        Self::new(Some(min), Some(max))
    }

    /// Whether `value` lies inside the range, both ends inclusive.
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }

    fn validate(&self, what: &str) -> Result<()> {
        if self.min.is_none() && self.max.is_none() {
            return Err(SearchError::InvalidQuery(format!(
                "{what} range needs a min or a max"
            )));
        }
        for bound in [self.min, self.max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(SearchError::InvalidQuery(format!(
                    "{what} bounds must be finite"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(SearchError::InvalidQuery(format!(
                    "{what} min {min} is greater than max {max}"
                )));
            }
        }
        Ok(())
    }
}

/// Inclusive bounds on the number of distinct elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CountRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl CountRange {
    pub fn contains(&self, n: u32) -> bool {
        self.min.is_none_or(|min| n >= min) && self.max.is_none_or(|max| n <= max)
    }
}

/// A space group given either as its Hermann-Mauguin symbol or its number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpaceGroup {
    Number(u16),
    Symbol(String),
}

impl fmt::Display for SpaceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Symbol(s) => f.write_str(s),
        }
    }
}

impl FromStr for SpaceGroup {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SearchError::InvalidQuery("space group is empty".into()));
        }
        Ok(match trimmed.parse::<u16>() {
            Ok(n) => Self::Number(n),
            Err(_) => Self::Symbol(trimmed.to_owned()),
        })
    }
}

/// The seven crystal systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrystalSystem {
    Triclinic,
    Monoclinic,
    Orthorhombic,
    Tetragonal,
    Trigonal,
    Hexagonal,
    Cubic,
}

impl CrystalSystem {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Triclinic => "triclinic",
            Self::Monoclinic => "monoclinic",
            Self::Orthorhombic => "orthorhombic",
            Self::Tetragonal => "tetragonal",
            Self::Trigonal => "trigonal",
            Self::Hexagonal => "hexagonal",
            Self::Cubic => "cubic",
        }
    }

    pub fn all() -> &'static [CrystalSystem] {
        &[
            Self::Triclinic,
            Self::Monoclinic,
            Self::Orthorhombic,
            Self::Tetragonal,
            Self::Trigonal,
            Self::Hexagonal,
            Self::Cubic,
        ]
    }
}

impl fmt::Display for CrystalSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CrystalSystem {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|cs| cs.name() == lower)
            .ok_or_else(|| SearchError::InvalidQuery(format!("unknown crystal system '{s}'")))
    }
}

/// An immutable, validated search request.
///
/// Deserialisation applies the same normalisation as [`QueryBuilder`] but
/// not its validation, so [`Query::validate`] still decides whether a
/// query from JSON may run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "QueryFields")]
pub struct Query {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    elements: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    elements_any: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    excluded_elements: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nelements: Option<CountRange>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<Property, PropertyRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    space_group: Option<SpaceGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crystal_system: Option<CrystalSystem>,
    /// Allow-list in priority order. Order is significant: it decides which
    /// provider's value becomes primary during fusion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    providers: Vec<String>,
    limit: usize,
}

/// The serialised shape of a [`Query`] before normalisation.
#[derive(Deserialize)]
struct QueryFields {
    #[serde(default)]
    elements: Vec<String>,
    #[serde(default)]
    elements_any: Vec<String>,
    #[serde(default)]
    excluded_elements: Vec<String>,
    #[serde(default)]
    formula: Option<String>,
    #[serde(default)]
    nelements: Option<CountRange>,
    #[serde(default)]
    properties: BTreeMap<Property, PropertyRange>,
    #[serde(default)]
    space_group: Option<SpaceGroup>,
    #[serde(default)]
    crystal_system: Option<CrystalSystem>,
    #[serde(default)]
    providers: Vec<String>,
    limit: usize,
}

impl From<QueryFields> for Query {
    fn from(raw: QueryFields) -> Self {
        // Unrecognised values are kept verbatim for validate() to reject.
        let lenient_set = |symbols: Vec<String>| -> BTreeSet<String> {
            symbols
                .into_iter()
                .map(|s| normalize_symbol(&s).unwrap_or(s))
                .collect()
        };
        Self {
            elements: lenient_set(raw.elements),
            elements_any: lenient_set(raw.elements_any),
            excluded_elements: lenient_set(raw.excluded_elements),
            formula: raw.formula.map(|f| {
                Composition::parse(&f)
                    .map(|c| c.reduced_formula())
                    .unwrap_or(f)
            }),
            nelements: raw.nelements,
            properties: normalize_ranges(raw.properties),
            space_group: raw.space_group.map(normalize_space_group),
            crystal_system: raw.crystal_system,
            providers: dedup_providers(raw.providers),
            limit: raw.limit,
        }
    }
}

impl Query {
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// Elements every result must contain.
    pub fn elements(&self) -> &BTreeSet<String> {
        &self.elements
    }

    /// Elements of which every result must contain at least one.
    pub fn elements_any(&self) -> &BTreeSet<String> {
        &self.elements_any
    }

    pub fn excluded_elements(&self) -> &BTreeSet<String> {
        &self.excluded_elements
    }

    /// Exact formula in reduced, alphabetical form.
    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    pub fn nelements(&self) -> Option<CountRange> {
        self.nelements
    }

    pub fn properties(&self) -> &BTreeMap<Property, PropertyRange> {
        &self.properties
    }

    pub fn space_group(&self) -> Option<&SpaceGroup> {
        self.space_group.as_ref()
    }

    pub fn crystal_system(&self) -> Option<CrystalSystem> {
        self.crystal_system
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether the query carries at least one filter.
    pub fn has_filters(&self) -> bool {
        !self.elements.is_empty()
            || !self.elements_any.is_empty()
            || !self.excluded_elements.is_empty()
            || self.formula.is_some()
            || self.nelements.is_some()
            || !self.properties.is_empty()
            || self.space_group.is_some()
            || self.crystal_system.is_some()
    }

    /// Re-check every invariant. Queries that arrive through serde rather
    /// than the builder are validated here before any network call.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidQuery`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(SearchError::InvalidQuery(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        if !self.has_filters() {
            return Err(SearchError::InvalidQuery(
                "query needs at least one filter".into(),
            ));
        }
        for set in [&self.elements, &self.elements_any, &self.excluded_elements] {
            for symbol in set {
                if normalize_symbol(symbol).as_deref() != Some(symbol.as_str()) {
                    return Err(SearchError::InvalidQuery(format!(
                        "'{symbol}' is not a chemical element"
                    )));
                }
            }
        }
        if let Some(clash) = self.elements.intersection(&self.excluded_elements).next() {
            return Err(SearchError::InvalidQuery(format!(
                "element {clash} is both required and excluded"
            )));
        }
        if let Some(formula) = &self.formula {
            Composition::parse(formula)
                .map_err(|e| SearchError::InvalidQuery(format!("formula '{formula}': {e}")))?;
        }
        if let Some(range) = self.nelements {
            for bound in [range.min, range.max].into_iter().flatten() {
                if !(1..=118).contains(&bound) {
                    return Err(SearchError::InvalidQuery(format!(
                        "element count {bound} outside 1..=118"
                    )));
                }
            }
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(SearchError::InvalidQuery(format!(
                        "element count min {min} is greater than max {max}"
                    )));
                }
            }
        }
        for (property, range) in &self.properties {
            range.validate(property.name())?;
        }
        match &self.space_group {
            Some(SpaceGroup::Number(n)) if !(1..=230).contains(n) => {
                return Err(SearchError::InvalidQuery(format!(
                    "space group number {n} outside 1..=230"
                )));
            }
            Some(SpaceGroup::Symbol(s)) if s.trim().is_empty() => {
                return Err(SearchError::InvalidQuery("space group is empty".into()));
            }
            _ => {}
        }
        if self.providers.iter().any(|p| p.trim().is_empty()) {
            return Err(SearchError::InvalidQuery(
                "provider ids must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Canonical JSON used for fingerprinting and on-disk cache entries.
    pub fn canonical_json(&self) -> String {
        // Every field is a plain value or an ordered collection; this cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deterministic SHA-256 fingerprint, lowercase hex.
    pub fn hash(&self) -> String {
        let digest = Sha256::digest(self.canonical_json().as_bytes());
        format!("{digest:x}")
    }
}

/// Step-by-step construction of a [`Query`].
///
/// Element symbols are case-normalised, the formula is reduced, and
/// duplicate provider ids are dropped (first occurrence wins).
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    elements: Vec<String>,
    elements_any: Vec<String>,
    excluded_elements: Vec<String>,
    formula: Option<String>,
    nelements: Option<CountRange>,
    properties: Vec<(Property, PropertyRange)>,
    space_group: Option<SpaceGroup>,
    crystal_system: Option<CrystalSystem>,
    providers: Vec<String>,
    limit: Option<usize>,
}

impl QueryBuilder {
    pub fn elements<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements.extend(elements.into_iter().map(Into::into));
        self
    }

    pub fn elements_any<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements_any.extend(elements.into_iter().map(Into::into));
        self
    }

    pub fn exclude<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_elements
            .extend(elements.into_iter().map(Into::into));
        self
    }

    pub fn formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn nelements(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.nelements = Some(CountRange { min, max });
        self
    }

    /// Add a property range. A later range for the same property replaces
    /// an earlier one.
    pub fn property(mut self, property: Property, range: PropertyRange) -> Self {
        self.properties.push((property, range));
        self
    }

    pub fn space_group(mut self, space_group: SpaceGroup) -> Self {
        self.space_group = Some(space_group);
        self
    }

    pub fn crystal_system(mut self, crystal_system: CrystalSystem) -> Self {
        self.crystal_system = Some(crystal_system);
        self
    }

    /// Restrict the search to these providers, in priority order.
    pub fn providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers.extend(providers.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Normalise and validate.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidQuery`] for any malformed or
    /// out-of-range field.
    pub fn build(self) -> Result<Query> {
        let formula = self
            .formula
            .map(|f| {
                Composition::parse(&f)
                    .map(|c| c.reduced_formula())
                    .map_err(|e| SearchError::InvalidQuery(format!("formula '{f}': {e}")))
            })
            .transpose()?;

        let query = Query {
            elements: normalize_set(self.elements)?,
            elements_any: normalize_set(self.elements_any)?,
            excluded_elements: normalize_set(self.excluded_elements)?,
            formula,
            nelements: self.nelements,
            properties: normalize_ranges(self.properties),
            space_group: self.space_group.map(normalize_space_group),
            crystal_system: self.crystal_system,
            providers: dedup_providers(self.providers),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
        };
        query.validate()?;
        Ok(query)
    }
}

fn normalize_ranges<I>(ranges: I) -> BTreeMap<Property, PropertyRange>
where
    I: IntoIterator<Item = (Property, PropertyRange)>,
{
    ranges
        .into_iter()
        .map(|(p, r)| (p, PropertyRange::new(r.min, r.max)))
        .collect()
}

fn normalize_space_group(space_group: SpaceGroup) -> SpaceGroup {
    match space_group {
        SpaceGroup::Symbol(s) => SpaceGroup::Symbol(s.trim().to_owned()),
        number => number,
    }
}

/// Trim ids and drop repeats; the first occurrence keeps its rank.
fn dedup_providers(raw: Vec<String>) -> Vec<String> {
    let mut providers: Vec<String> = Vec::new();
    for id in raw {
        let id = id.trim().to_owned();
        if !providers.contains(&id) {
            providers.push(id);
        }
    }
    providers
}

fn normalize_set(raw: Vec<String>) -> Result<BTreeSet<String>> {
    raw.iter()
        .map(|s| {
            normalize_symbol(s).ok_or_else(|| {
                SearchError::InvalidQuery(format!("'{}' is not a chemical element", s.trim()))
            })
        })
        .collect()
}
