//! Index query predicates
//!
//! A query is a list of [`QueryElement`]s over single keys; an id matches when
//! it satisfies every element.

use super::property_index::PropertyIndex;
use super::term::IndexTerm;
use super::{IndexError, IndexResult};
use crate::graph::property::PropertyValue;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound;

/// Comparison operator of a [`QueryElement::Compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        };
        f.write_str(op)
    }
}

/// Predicate over one indexed key
#[derive(Debug, Clone, PartialEq)]
pub enum QueryElement {
    /// `key <op> value`. Ordering operators only match values of the same
    /// kind (numbers with numbers, strings with strings).
    Compare {
        key: String,
        op: CompareOp,
        value: PropertyValue,
    },
    /// `start <= key < end`
    Interval {
        key: String,
        start: PropertyValue,
        end: PropertyValue,
    },
}

impl QueryElement {
    pub fn compare(key: impl Into<String>, op: CompareOp, value: impl Into<PropertyValue>) -> Self {
        QueryElement::Compare {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::compare(key, CompareOp::Eq, value)
    }

    pub fn interval(
        key: impl Into<String>,
        start: impl Into<PropertyValue>,
        end: impl Into<PropertyValue>,
    ) -> Self {
        QueryElement::Interval {
            key: key.into(),
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            QueryElement::Compare { key, .. } | QueryElement::Interval { key, .. } => key,
        }
    }

    /// Ids matching this element, given the postings of its key
    pub fn evaluate(&self, postings: Option<&PropertyIndex>) -> IndexResult<BTreeSet<u64>> {
        let Some(postings) = postings else {
            // Still reject malformed values on an empty index
            self.terms()?;
            return Ok(BTreeSet::new());
        };
        let ids = match self {
            QueryElement::Compare { op, value, .. } => {
                let term = term(value)?;
                match op {
                    CompareOp::Eq => postings.get(&term),
                    CompareOp::Ne => {
                        let excluded = postings.get(&term);
                        postings.all().into_iter().filter(|id| !excluded.contains(id)).collect()
                    }
                    CompareOp::Gt => postings.beyond(&term, true, false),
                    CompareOp::Ge => postings.beyond(&term, true, true),
                    CompareOp::Lt => postings.beyond(&term, false, false),
                    CompareOp::Le => postings.beyond(&term, false, true),
                }
            }
            QueryElement::Interval { start, end, .. } => {
                let (start, end) = (term(start)?, term(end)?);
                postings.range(Bound::Included(&start), Bound::Excluded(&end))
            }
        };
        Ok(ids)
    }

    fn terms(&self) -> IndexResult<()> {
        match self {
            QueryElement::Compare { value, .. } => term(value).map(|_| ()),
            QueryElement::Interval { start, end, .. } => term(start).and_then(|_| term(end)).map(|_| ()),
        }
    }
}

fn term(value: &PropertyValue) -> IndexResult<IndexTerm> {
    IndexTerm::from_value(value).ok_or(IndexError::UnsupportedValue(value.type_name()))
}

impl fmt::Display for QueryElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryElement::Compare { key, op, value } => write!(f, "{} {} {}", key, op, value),
            QueryElement::Interval { key, start, end } => write!(f, "{} in [{}, {})", key, start, end),
        }
    }
}

/// Intersection of every element's matches, ascending, capped at `hits`
pub fn conjunction<'a>(
    elements: &[QueryElement],
    postings_for: impl Fn(&str) -> Option<&'a PropertyIndex>,
    hits: usize,
) -> IndexResult<Vec<u64>> {
    let mut result: Option<BTreeSet<u64>> = None;
    for element in elements {
        let ids = element.evaluate(postings_for(element.key()))?;
        result = Some(match result {
            None => ids,
            Some(acc) => acc.intersection(&ids).copied().collect(),
        });
    }
    Ok(result.unwrap_or_default().into_iter().take(hits).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ages() -> PropertyIndex {
        let mut index = PropertyIndex::new();
        for (id, age) in [(1u64, 29i64), (2, 27), (3, 32), (4, 35)] {
            index.insert(IndexTerm::Int(age), id);
        }
        index.insert(IndexTerm::Str("unknown".into()), 5);
        index
    }

    fn ids(set: BTreeSet<u64>) -> Vec<u64> {
        set.into_iter().collect()
    }

    #[test]
    fn test_compare_operators() {
        let index = ages();
        let eval = |op, v: i64| ids(QueryElement::compare("age", op, v).evaluate(Some(&index)).unwrap());
        assert_eq!(eval(CompareOp::Eq, 29), vec![1]);
        assert_eq!(eval(CompareOp::Gt, 29), vec![3, 4]);
        assert_eq!(eval(CompareOp::Ge, 29), vec![1, 3, 4]);
        assert_eq!(eval(CompareOp::Lt, 32), vec![1, 2]);
        assert_eq!(eval(CompareOp::Le, 27), vec![2]);
        assert_eq!(eval(CompareOp::Ne, 29), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_interval_is_half_open() {
        let index = ages();
        let element = QueryElement::interval("age", 27i64, 32i64);
        assert_eq!(ids(element.evaluate(Some(&index)).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_conjunction_intersects() {
        let index = ages();
        let elements = vec![
            QueryElement::compare("age", CompareOp::Ge, 27i64),
            QueryElement::compare("age", CompareOp::Lt, 35i64),
            QueryElement::compare("age", CompareOp::Ne, 32i64),
        ];
        let result = conjunction(&elements, |_| Some(&index), 1000).unwrap();
        assert_eq!(result, vec![1, 2]);

        let limited = conjunction(&elements, |_| Some(&index), 1).unwrap();
        assert_eq!(limited, vec![1]);
    }

    #[test]
    fn test_unindexable_value_rejected() {
        let element = QueryElement::eq("blob", PropertyValue::Blob(vec![1]));
        assert!(matches!(element.evaluate(None), Err(IndexError::UnsupportedValue("Blob"))));
        assert!(QueryElement::eq("age", 1i64).evaluate(None).unwrap().is_empty());
    }
}
