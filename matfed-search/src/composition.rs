//! Chemical formula parsing and reduced-formula canonicalisation.
//!
//! Formulas are parsed into an element → count map. Parenthesised and
//! bracketed groups with multipliers are supported (`Ca3(PO4)2`); fractional
//! and partial-occupancy formulas are rejected.

use std::collections::BTreeMap;
use std::fmt;

/// Every chemical symbol from H to Og, in atomic-number order.
pub const ELEMENTS: &[&str] = &[
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

/// Returns `true` if `symbol` is a known chemical symbol (case-sensitive).
pub fn is_element(symbol: &str) -> bool {
    ELEMENTS.contains(&symbol)
}

/// Normalise user-typed element symbols (`"fe"`, `"FE"`) to canonical case.
///
/// Returns `None` if the result is not a known element.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    let mut symbol = first.to_ascii_uppercase().to_string();
    symbol.extend(chars.map(|c| c.to_ascii_lowercase()));
    is_element(&symbol).then_some(symbol)
}

/// An element → atom-count map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Composition {
    counts: BTreeMap<String, u64>,
}

impl Composition {
    /// Parse a formula such as `Fe2O3`, `Ca3(PO4)2` or `K4[Fe(CN)6]`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending position if the
    /// formula is empty, unbalanced, fractional, or names an unknown element.
    pub fn parse(formula: &str) -> Result<Self, String> {
        let chars: Vec<char> = formula.chars().filter(|c| !c.is_whitespace()).collect();
        if chars.is_empty() {
            return Err("formula is empty".into());
        }
        let mut pos = 0;
        let counts = parse_group(&chars, &mut pos, None)?;
        if pos != chars.len() {
            return Err(format!("unexpected '{}' at position {pos}", chars[pos]));
        }
        if counts.is_empty() {
            return Err("formula contains no elements".into());
        }
        Ok(Self { counts })
    }

    /// Sorted distinct element symbols.
    pub fn elements(&self) -> Vec<String> {
        self.counts.keys().cloned().collect()
    }

    /// Number of distinct elements.
    pub fn nelements(&self) -> usize {
        self.counts.len()
    }

    /// Divide every count by the greatest common divisor.
    #[must_use]
    pub fn reduced(&self) -> Self {
        let divisor = self.counts.values().copied().fold(0, gcd).max(1);
        Self {
            counts: self
                .counts
                .iter()
                .map(|(el, n)| (el.clone(), n / divisor))
                .collect(),
        }
    }

    /// Reduced formula with elements in alphabetical order and unit
    /// counts omitted, e.g. `Fe2O3`.
    pub fn reduced_formula(&self) -> String {
        self.reduced().to_string()
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (element, count) in &self.counts {
            f.write_str(element)?;
            if *count != 1 {
                write!(f, "{count}")?;
            }
        }
        Ok(())
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn parse_group(
    chars: &[char],
    pos: &mut usize,
    closing: Option<char>,
) -> Result<BTreeMap<String, u64>, String> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();

    while *pos < chars.len() {
        let c = chars[*pos];
        match c {
            '(' | '[' => {
                let close = if c == '(' { ')' } else { ']' };
                *pos += 1;
                let inner = parse_group(chars, pos, Some(close))?;
                let multiplier = parse_count(chars, pos)?.unwrap_or(1);
                for (element, n) in inner {
                    let n = n.checked_mul(multiplier).ok_or_else(count_overflow)?;
                    add_count(&mut counts, element, n)?;
                }
            }
            ')' | ']' => {
                if closing == Some(c) {
                    *pos += 1;
                    if counts.is_empty() {
                        return Err(format!("empty group before position {pos}"));
                    }
                    return Ok(counts);
                }
                return Err(format!("unbalanced '{c}' at position {pos}"));
            }
            c if c.is_ascii_uppercase() => {
                let mut symbol = c.to_string();
                *pos += 1;
                while *pos < chars.len() && chars[*pos].is_ascii_lowercase() {
                    symbol.push(chars[*pos]);
                    *pos += 1;
                }
                if !is_element(&symbol) {
                    return Err(format!("unknown element '{symbol}'"));
                }
                let n = parse_count(chars, pos)?.unwrap_or(1);
                add_count(&mut counts, symbol, n)?;
            }
            other => return Err(format!("unexpected '{other}' at position {pos}")),
        }
    }

    match closing {
        Some(close) => Err(format!("missing '{close}'")),
        None => Ok(counts),
    }
}

fn add_count(counts: &mut BTreeMap<String, u64>, element: String, n: u64) -> Result<(), String> {
    let slot = counts.entry(element).or_insert(0);
    *slot = slot.checked_add(n).ok_or_else(count_overflow)?;
    Ok(())
}

fn count_overflow() -> String {
    "element count out of range".into()
}

fn parse_count(chars: &[char], pos: &mut usize) -> Result<Option<u64>, String> {
    let start = *pos;
    while *pos < chars.len() && chars[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos < chars.len() && chars[*pos] == '.' {
        return Err(format!("fractional count at position {pos}"));
    }
    if start == *pos {
        return Ok(None);
    }
    let digits: String = chars[start..*pos].iter().collect();
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("count '{digits}' out of range"))?;
    if n == 0 {
        return Err(format!("zero count at position {start}"));
    }
    Ok(Some(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_formula() {
        let comp = Composition::parse("Fe2O3").unwrap();
        assert_eq!(comp.elements(), vec!["Fe", "O"]);
        assert_eq!(comp.reduced_formula(), "Fe2O3");
    }

    #[test]
    fn reduces_by_gcd() {
        let comp = Composition::parse("Fe4O6").unwrap();
        assert_eq!(comp.reduced_formula(), "Fe2O3");
    }

    #[test]
    fn order_in_formula_is_irrelevant() {
        let a = Composition::parse("O3Fe2").unwrap();
        let b = Composition::parse("Fe2O3").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_nested_groups() {
        let comp = Composition::parse("Ca3(PO4)2").unwrap();
        assert_eq!(comp.to_string(), "Ca3O8P2");

        let comp = Composition::parse("K4[Fe(CN)6]").unwrap();
        assert_eq!(comp.to_string(), "C6FeK4N6");
    }

    #[test]
    fn whitespace_ignored() {
        let comp = Composition::parse(" Li Co O2 ").unwrap();
        assert_eq!(comp.reduced_formula(), "CoLiO2");
    }

    #[test]
    fn rejects_unknown_element() {
        let err = Composition::parse("Xx2O").unwrap_err();
        assert!(err.contains("unknown element"));
    }

    #[test]
    fn rejects_fractional_counts() {
        assert!(Composition::parse("Fe0.5O").is_err());
    }

    #[test]
    fn rejects_unbalanced_groups() {
        assert!(Composition::parse("Ca3(PO4").is_err());
        assert!(Composition::parse("CaPO4)").is_err());
        assert!(Composition::parse("()").is_err());
    }

    #[test]
    fn rejects_empty_and_zero() {
        assert!(Composition::parse("").is_err());
        assert!(Composition::parse("Fe0").is_err());
        assert!(Composition::parse("fe2o3").is_err());
    }

    #[test]
    fn rejects_counts_that_overflow() {
        let err = Composition::parse("(H4294967296)4294967296").unwrap_err();
        assert_eq!(err, "element count out of range");

        let err = Composition::parse("H18446744073709551615H").unwrap_err();
        assert_eq!(err, "element count out of range");

        assert!(Composition::parse("H99999999999999999999").is_err());
    }

    #[test]
    fn normalize_symbol_fixes_case() {
        assert_eq!(normalize_symbol("fe").as_deref(), Some("Fe"));
        assert_eq!(normalize_symbol(" O ").as_deref(), Some("O"));
        assert_eq!(normalize_symbol("Xx"), None);
        assert_eq!(normalize_symbol(""), None);
    }

    #[test]
    fn element_table_is_complete() {
        assert_eq!(ELEMENTS.len(), 118);
        assert!(is_element("Og"));
    }
}
