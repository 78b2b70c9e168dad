//! Index terms and the document writer
//!
//! Property values are flattened into scalar [`IndexTerm`]s before they reach
//! a posting list. Lists index each element under the same key, maps index
//! each entry under `key.subkey`, and blobs are never indexed.

use crate::graph::property::PropertyValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Scalar value stored in a posting list.
///
/// Terms of different numeric widths compare by numeric value, so `29i32`
/// and `29i64` (and `29.0`) find each other. Across kinds the order is
/// booleans, then numbers, then strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexTerm {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl IndexTerm {
    /// Scalar term for a value, `None` for structured or unindexable values
    pub fn from_value(value: &PropertyValue) -> Option<IndexTerm> {
        match value {
            PropertyValue::Boolean(b) => Some(IndexTerm::Bool(*b)),
            PropertyValue::Integer(i) | PropertyValue::DateTime(i) => Some(IndexTerm::Int(*i)),
            PropertyValue::Int32(i) => Some(IndexTerm::Int(*i as i64)),
            PropertyValue::Float(f) if !f.is_nan() => Some(IndexTerm::Float(*f)),
            PropertyValue::Float32(f) if !f.is_nan() => Some(IndexTerm::Float(*f as f64)),
            PropertyValue::String(s) => Some(IndexTerm::Str(s.clone())),
            _ => None,
        }
    }

    /// A property value that flattens back to this term
    pub fn to_value(&self) -> PropertyValue {
        match self {
            IndexTerm::Bool(b) => PropertyValue::Boolean(*b),
            IndexTerm::Int(i) => PropertyValue::Integer(*i),
            IndexTerm::Float(f) => PropertyValue::Float(*f),
            IndexTerm::Str(s) => PropertyValue::String(s.clone()),
        }
    }

    /// Terms of the same class are comparable by range predicates
    pub(crate) fn class(&self) -> u8 {
        match self {
            IndexTerm::Bool(_) => 0,
            IndexTerm::Int(_) | IndexTerm::Float(_) => 1,
            IndexTerm::Str(_) => 2,
        }
    }
}

fn cmp_int_float(i: i64, f: f64) -> Ordering {
    let approx = (i as f64).total_cmp(&f);
    if approx != Ordering::Equal {
        return approx;
    }
    // Same f64 image: f is integral here, compare exactly
    (i as i128).cmp(&(f as i128))
}

impl Ord for IndexTerm {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexTerm::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => cmp_int_float(*a, *b),
            (Float(a), Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Str(a), Str(b)) => a.cmp(b),
            _ => self.class().cmp(&other.class()),
        }
    }
}

impl PartialOrd for IndexTerm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexTerm {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexTerm {}

impl fmt::Display for IndexTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexTerm::Bool(b) => write!(f, "{}", b),
            IndexTerm::Int(i) => write!(f, "{}", i),
            IndexTerm::Float(x) => write!(f, "{}", x),
            IndexTerm::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Sink for the terms of one indexed property
pub trait DocumentWriter {
    /// Add `value` under `key`. Returns `false` when (part of) the value could
    /// not be indexed; indexable parts are still written.
    fn write(&mut self, key: &str, value: &PropertyValue) -> bool;

    /// Whether `value` is already recorded under `key`
    fn present(&self, key: &str, value: &PropertyValue) -> bool;
}

/// In-memory [`DocumentWriter`] collecting `(key, term)` pairs
#[derive(Debug, Default)]
pub struct TermDocument {
    terms: Vec<(String, IndexTerm)>,
}

impl TermDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terms(&self) -> &[(String, IndexTerm)] {
        &self.terms
    }

    pub fn into_terms(self) -> Vec<(String, IndexTerm)> {
        self.terms
    }
}

impl DocumentWriter for TermDocument {
    fn write(&mut self, key: &str, value: &PropertyValue) -> bool {
        match value {
            PropertyValue::Array(items) => {
                let mut complete = true;
                for item in items {
                    if !self.present(key, item) {
                        complete &= self.write(key, item);
                    }
                }
                complete
            }
            PropertyValue::Map(entries) => {
                let mut complete = true;
                for (sub, item) in entries {
                    complete &= self.write(&format!("{}.{}", key, sub), item);
                }
                complete
            }
            scalar => match IndexTerm::from_value(scalar) {
                Some(term) => {
                    if !self.present(key, scalar) {
                        self.terms.push((key.to_string(), term));
                    }
                    true
                }
                None => false,
            },
        }
    }

    fn present(&self, key: &str, value: &PropertyValue) -> bool {
        match IndexTerm::from_value(value) {
            Some(term) => self.terms.iter().any(|(k, t)| k == key && *t == term),
            None => false,
        }
    }
}

/// Flatten a value into its terms; the flag is `false` when something was skipped
pub fn terms_of(key: &str, value: &PropertyValue) -> (Vec<(String, IndexTerm)>, bool) {
    let mut document = TermDocument::new();
    let complete = document.write(key, value);
    (document.into_terms(), complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_numeric_widths_compare_equal() {
        let a = IndexTerm::from_value(&PropertyValue::Int32(29)).unwrap();
        let b = IndexTerm::from_value(&PropertyValue::Integer(29)).unwrap();
        let c = IndexTerm::from_value(&PropertyValue::Float(29.0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(IndexTerm::Int(29) < IndexTerm::Float(29.5));
        assert!(IndexTerm::Float(-0.5) < IndexTerm::Int(0));
    }

    #[test]
    fn test_to_value_flattens_back() {
        for value in [
            PropertyValue::Int32(7),
            PropertyValue::DateTime(1_700_000_000_000),
            PropertyValue::Float32(0.5),
            PropertyValue::Boolean(false),
            PropertyValue::from("x"),
        ] {
            let term = IndexTerm::from_value(&value).unwrap();
            assert_eq!(IndexTerm::from_value(&term.to_value()), Some(term));
        }
    }

    #[test]
    fn test_cross_kind_order() {
        assert!(IndexTerm::Bool(true) < IndexTerm::Int(i64::MIN));
        assert!(IndexTerm::Float(f64::MAX) < IndexTerm::Str(String::new()));
    }

    #[test]
    fn test_large_integers_stay_distinct() {
        let a = IndexTerm::Int(i64::MAX);
        let b = IndexTerm::Int(i64::MAX - 1);
        assert_ne!(a, b);
        assert_ne!(IndexTerm::Int(9_007_199_254_740_993), IndexTerm::Float(9_007_199_254_740_992.0));
    }

    #[test]
    fn test_list_values_deduplicated() {
        let value = PropertyValue::Array(vec!["a".into(), "b".into(), "a".into()]);
        let (terms, complete) = terms_of("tags", &value);
        assert!(complete);
        assert_eq!(terms.len(), 2);
        assert!(terms.iter().all(|(k, _)| k == "tags"));
    }

    #[test]
    fn test_map_values_use_dotted_keys() {
        let mut map = HashMap::new();
        map.insert("city".to_string(), PropertyValue::from("Santa Fe"));
        let (terms, complete) = terms_of("address", &PropertyValue::Map(map));
        assert!(complete);
        assert_eq!(terms, vec![("address.city".to_string(), IndexTerm::Str("Santa Fe".into()))]);
    }

    #[test]
    fn test_blob_rejected_but_siblings_kept() {
        let value = PropertyValue::Array(vec![PropertyValue::Blob(vec![1]), 5i64.into()]);
        let mut document = TermDocument::new();
        assert!(!document.write("mixed", &value));
        assert_eq!(document.terms().len(), 1);
        assert!(document.present("mixed", &PropertyValue::Integer(5)));
        assert!(!document.present("other", &PropertyValue::Integer(5)));
    }
}
