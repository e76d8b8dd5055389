//! Query → provider-native filter translation.
//!
//! [`translate`] is a pure function of the query and the provider's
//! capabilities: the same inputs always produce byte-identical output.
//! Clauses are emitted in a fixed field order, element lists are sorted,
//! and numbers use Rust's shortest round-trip formatting.
//!
//! Capability checks happen in the registry before translation. A
//! composition or property field the provider lacks never reaches this
//! point; a structural field it lacks is dropped with a warning.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::capability::ProviderCapabilities;
use crate::query::{PropertyRange, Query, SpaceGroup};

/// Target filter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// The open filter-query standard:
    /// `elements HAS ALL "Fe","O" AND band_gap>=1`.
    #[default]
    Optimade,
    /// Materials Project native query parameters:
    /// `elements=Fe,O&band_gap_min=1`.
    MaterialsProject,
}

/// A translated filter plus any clauses that had to be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Translation {
    pub filter: String,
    pub warnings: Vec<String>,
}

/// Translate `query` into `dialect` using the field names in `caps`.
pub fn translate(query: &Query, caps: &ProviderCapabilities, dialect: Dialect) -> Translation {
    match dialect {
        Dialect::Optimade => translate_optimade(query, caps),
        Dialect::MaterialsProject => translate_materials_project(query, caps),
    }
}

fn translate_optimade(query: &Query, caps: &ProviderCapabilities) -> Translation {
    let mut clauses: Vec<String> = Vec::new();
    let mut warnings = Vec::new();

    if !query.elements().is_empty() {
        clauses.push(format!("elements HAS ALL {}", quoted_list(query.elements())));
    }
    if !query.elements_any().is_empty() {
        clauses.push(format!(
            "elements HAS ANY {}",
            quoted_list(query.elements_any())
        ));
    }
    if !query.excluded_elements().is_empty() {
        clauses.push(format!(
            "NOT elements HAS ANY {}",
            quoted_list(query.excluded_elements())
        ));
    }
    if let Some(formula) = query.formula() {
        clauses.push(format!("chemical_formula_reduced={}", quote(formula)));
    }
    if let Some(range) = query.nelements() {
        if let Some(min) = range.min {
            clauses.push(format!("nelements>={min}"));
        }
        if let Some(max) = range.max {
            clauses.push(format!("nelements<={max}"));
        }
    }
    for (property, range) in query.properties() {
        match caps.property_field(*property) {
            Some(field) => push_range(&mut clauses, field, range),
            None => warnings.push(format!("{property} filter not supported; dropped")),
        }
    }
    if let Some(sg) = query.space_group() {
        match &caps.space_group_field {
            Some(field) => clauses.push(match sg {
                SpaceGroup::Number(n) => format!("{field}={n}"),
                SpaceGroup::Symbol(s) => format!("{field}={}", quote(s)),
            }),
            None => warnings.push("space_group filter not supported; dropped".into()),
        }
    }
    if let Some(cs) = query.crystal_system() {
        match &caps.crystal_system_field {
            Some(field) => clauses.push(format!("{field}={}", quote(cs.name()))),
            None => warnings.push("crystal_system filter not supported; dropped".into()),
        }
    }

    Translation {
        filter: clauses.join(" AND "),
        warnings,
    }
}

fn translate_materials_project(query: &Query, caps: &ProviderCapabilities) -> Translation {
    let mut params = url::form_urlencoded::Serializer::new(String::new());
    let mut warnings = Vec::new();

    if !query.elements().is_empty() {
        params.append_pair("elements", &comma_list(query.elements()));
    }
    if !query.elements_any().is_empty() {
        warnings.push("elements_any filter not supported; dropped".into());
    }
    if !query.excluded_elements().is_empty() {
        params.append_pair("exclude_elements", &comma_list(query.excluded_elements()));
    }
    if let Some(formula) = query.formula() {
        params.append_pair("formula", formula);
    }
    if let Some(range) = query.nelements() {
        if let Some(min) = range.min {
            params.append_pair("nelements_min", &min.to_string());
        }
        if let Some(max) = range.max {
            params.append_pair("nelements_max", &max.to_string());
        }
    }
    for (property, range) in query.properties() {
        let Some(param) = caps
            .property_field(*property)
            .and_then(materials_project_range_param)
        else {
            warnings.push(format!("{property} filter not supported; dropped"));
            continue;
        };
        if let Some(min) = range.min {
            params.append_pair(&format!("{param}_min"), &number(min));
        }
        if let Some(max) = range.max {
            params.append_pair(&format!("{param}_max"), &number(max));
        }
    }
    if let Some(sg) = query.space_group() {
        match (&caps.space_group_field, sg) {
            (Some(_), SpaceGroup::Number(n)) => {
                params.append_pair("spacegroup_number", &n.to_string());
            }
            (Some(_), SpaceGroup::Symbol(s)) => {
                params.append_pair("spacegroup_symbol", s);
            }
            (None, _) => warnings.push("space_group filter not supported; dropped".into()),
        }
    }
    if let Some(cs) = query.crystal_system() {
        match &caps.crystal_system_field {
            Some(_) => {
                // The API expects title case: "Cubic".
                let mut name = cs.name().to_owned();
                if let Some(first) = name.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                params.append_pair("crystal_system", &name);
            }
            None => warnings.push("crystal_system filter not supported; dropped".into()),
        }
    }

    Translation {
        filter: params.finish(),
        warnings,
    }
}

/// The `_min`/`_max` parameter stem for a summary document field.
///
/// Top-level fields filter under their own name. Nested elastic moduli
/// filter under flat stems; other nested fields have no range filter.
fn materials_project_range_param(field: &str) -> Option<&str> {
    if !field.contains('.') {
        return Some(field);
    }
    let stem = match field {
        "bulk_modulus.vrh" => "k_vrh",
        "bulk_modulus.voigt" => "k_voigt",
        "bulk_modulus.reuss" => "k_reuss",
        "shear_modulus.vrh" => "g_vrh",
        "shear_modulus.voigt" => "g_voigt",
        "shear_modulus.reuss" => "g_reuss",
        _ => return None,
    };
    Some(stem)
}

fn push_range(clauses: &mut Vec<String>, field: &str, range: &PropertyRange) {
    if let Some(min) = range.min {
        clauses.push(format!("{field}>={}", number(min)));
    }
    if let Some(max) = range.max {
        clauses.push(format!("{field}<={}", number(max)));
    }
}

/// Shortest round-trip decimal; integral values keep no fractional part.
fn number(v: f64) -> String {
    let mut out = String::new();
    let _ = write!(out, "{v}");
    out
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn quoted_list<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
    items
        .into_iter()
        .map(|s| quote(s))
        .collect::<Vec<_>>()
        .join(",")
}

fn comma_list<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
    items
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
