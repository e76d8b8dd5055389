//! Fusion of raw provider records into canonical materials.
//!
//! Records describing the same material are grouped by a composition +
//! structure signature (reduced formula, plus space group when reported).
//! A record with only an element list has no stoichiometry, so it is keyed
//! by its chemical system (`elements:Fe-O`) and never joins a formula group.
//! Within a group, records are put into a total order (provider priority
//! rank, then provider id, then native id, then property payload) before
//! any value is chosen, so the outcome does not depend on the order
//! providers answered in. Fusing the same records in any order, or
//! re-fusing a fused set reduced back to records, yields the same materials.
//!
//! A material's `sources` are exactly the providers that supplied one of
//! its property values. Every contributing record, with or without
//! properties, is listed in `identifiers`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use crate::composition::{normalize_symbol, Composition};
use crate::types::{Material, PropertyValue, ProviderRef, RawProperty, RawRecord};

/// Fuse every provider's records into deduplicated materials.
///
/// `priority` lists provider ids from most to least trusted; it decides
/// which value becomes primary when several providers report the same
/// property. Providers not listed rank after all listed ones, by id.
///
/// Records with neither a parseable formula nor any element are dropped.
/// The returned list is sorted by [`sort_materials`].
pub fn fuse(batches: Vec<(String, Vec<RawRecord>)>, priority: &[String]) -> Vec<Material> {
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();

    for (provider, records) in batches {
        for mut record in records {
            // The batch owner is authoritative for provenance.
            record.source.clone_from(&provider);
            let Some(identity) = Identity::of(&record) else {
                tracing::debug!(
                    provider = %record.source,
                    id = %record.native_id,
                    "record without usable composition dropped"
                );
                continue;
            };
            let signature = identity.signature();
            groups
                .entry(signature)
                .or_insert_with(|| Group::new(identity))
                .records
                .push(record);
        }
    }

    let mut materials: Vec<Material> = groups
        .into_iter()
        .map(|(signature, group)| group.into_material(&signature, priority))
        .collect();
    sort_materials(&mut materials);
    materials
}

/// Deterministic final order: most sources first, then formula, then id.
pub fn sort_materials(materials: &mut [Material]) {
    materials.sort_by(|a, b| {
        b.sources
            .len()
            .cmp(&a.sources.len())
            .then_with(|| a.formula.cmp(&b.formula))
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl Material {
    /// Reduce a fused material back to one raw record per contributing
    /// provider record.
    ///
    /// Each provider's property values are attached to its first identifier;
    /// further identifiers from the same provider carry composition only.
    /// A material known only by its chemical system yields records with an
    /// element list and no formula.
    pub fn to_raw_records(&self) -> Vec<RawRecord> {
        let formula = Composition::parse(&self.formula)
            .is_ok()
            .then(|| self.formula.clone());
        let mut by_source: BTreeMap<&str, BTreeMap<String, RawProperty>> = BTreeMap::new();
        let values = self.properties.iter().map(|(n, v)| (n, v)).chain(
            self.extra_properties
                .iter()
                .flat_map(|(n, vs)| vs.iter().map(move |v| (n, v))),
        );
        for (name, value) in values {
            by_source.entry(&value.source).or_default().insert(
                name.clone(),
                RawProperty {
                    value: value.value,
                    unit: value.unit.clone(),
                    method: value.method.clone(),
                },
            );
        }

        let mut records = Vec::with_capacity(self.identifiers.len());
        for ident in &self.identifiers {
            let properties = by_source.remove(ident.source.as_str()).unwrap_or_default();
            records.push(RawRecord {
                source: ident.source.clone(),
                native_id: ident.native_id.clone(),
                formula: formula.clone(),
                elements: self.elements.clone(),
                space_group: self.space_group.clone(),
                properties,
            });
        }
        records
    }
}

/// The composition + structure identity of a record.
struct Identity {
    /// Reduced formula, or the hyphen-joined chemical system.
    formula: String,
    /// Grouping key without the space group.
    key: String,
    elements: Vec<String>,
    space_group: Option<String>,
}

impl Identity {
    fn of(record: &RawRecord) -> Option<Self> {
        let parsed = record
            .formula
            .as_deref()
            .and_then(|f| Composition::parse(f).ok());
        let (formula, key, elements) = match parsed {
            Some(composition) => {
                let formula = composition.reduced_formula();
                (formula.clone(), formula, composition.elements())
            }
            None => {
                let symbols: BTreeSet<String> = record
                    .elements
                    .iter()
                    .filter_map(|e| normalize_symbol(e))
                    .collect();
                if symbols.is_empty() {
                    return None;
                }
                let elements: Vec<String> = symbols.into_iter().collect();
                let system = elements.join("-");
                (system.clone(), format!("elements:{system}"), elements)
            }
        };
        let space_group = record
            .space_group
            .as_deref()
            .map(|s| s.split_whitespace().collect::<String>())
            .filter(|s| !s.is_empty());
        Some(Self {
            formula,
            key,
            elements,
            space_group,
        })
    }

    fn signature(&self) -> String {
        match &self.space_group {
            Some(sg) => format!("{}|{sg}", self.key),
            None => self.key.clone(),
        }
    }
}

struct Group {
    identity: Identity,
    records: Vec<RawRecord>,
}

impl Group {
    fn new(identity: Identity) -> Self {
        Self {
            identity,
            records: Vec::new(),
        }
    }

    fn into_material(mut self, signature: &str, priority: &[String]) -> Material {
        let rank = |source: &str| {
            priority
                .iter()
                .position(|p| p == source)
                .unwrap_or(priority.len())
        };
        self.records.sort_by(|a, b| {
            rank(&a.source)
                .cmp(&rank(&b.source))
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.native_id.cmp(&b.native_id))
                .then_with(|| cmp_properties(&a.properties, &b.properties))
        });

        let mut identifiers: BTreeSet<ProviderRef> = BTreeSet::new();
        let mut sources: BTreeSet<String> = BTreeSet::new();
        // property → (source → value), first value per source wins.
        let mut candidates: BTreeMap<String, Vec<PropertyValue>> = BTreeMap::new();

        for record in &self.records {
            identifiers.insert(ProviderRef {
                source: record.source.clone(),
                native_id: record.native_id.clone(),
            });
            for (name, raw) in &record.properties {
                if !raw.value.is_finite() {
                    continue;
                }
                let slot = candidates.entry(name.clone()).or_default();
                if slot.iter().any(|v| v.source == record.source) {
                    continue;
                }
                sources.insert(record.source.clone());
                slot.push(PropertyValue {
                    value: raw.value,
                    source: record.source.clone(),
                    method: raw.method.clone(),
                    unit: raw.unit.clone(),
                });
            }
        }

        let mut properties = BTreeMap::new();
        let mut extra_properties = BTreeMap::new();
        for (name, mut values) in candidates {
            let primary = values.remove(0);
            properties.insert(name.clone(), primary);
            if !values.is_empty() {
                extra_properties.insert(name, values);
            }
        }

        let nelements = self.identity.elements.len();
        Material {
            id: material_id(signature),
            formula: self.identity.formula,
            elements: self.identity.elements,
            nelements,
            space_group: self.identity.space_group,
            sources: sources.into_iter().collect(),
            identifiers: identifiers.into_iter().collect(),
            properties,
            extra_properties,
        }
    }
}

/// Total order over property payloads: name, then value, then unit, then method.
fn cmp_properties(a: &BTreeMap<String, RawProperty>, b: &BTreeMap<String, RawProperty>) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((name_a, pa)), Some((name_b, pb))) => {
                let ord = name_a
                    .cmp(name_b)
                    .then_with(|| pa.value.total_cmp(&pb.value))
                    .then_with(|| pa.unit.cmp(&pb.unit))
                    .then_with(|| pa.method.cmp(&pb.method));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// `mat-` followed by the first 16 hex digits of SHA-256(signature).
pub fn material_id(signature: &str) -> String {
    let digest = Sha256::digest(signature.as_bytes());
    let hex = format!("{digest:x}");
    format!("mat-{}", &hex[..16])
}
