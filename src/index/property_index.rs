//! B-Tree posting lists for one indexed key

use super::term::IndexTerm;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Term -> ids of the elements carrying it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyIndex {
    index: BTreeMap<IndexTerm, BTreeSet<u64>>,
}

impl PropertyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, term: IndexTerm, id: u64) {
        self.index.entry(term).or_default().insert(id);
    }

    /// Returns whether the entry existed
    pub fn remove(&mut self, term: &IndexTerm, id: u64) -> bool {
        let Some(ids) = self.index.get_mut(term) else {
            return false;
        };
        let removed = ids.remove(&id);
        if ids.is_empty() {
            self.index.remove(term);
        }
        removed
    }

    pub fn get(&self, term: &IndexTerm) -> BTreeSet<u64> {
        self.index.get(term).cloned().unwrap_or_default()
    }

    pub fn count(&self, term: &IndexTerm) -> usize {
        self.index.get(term).map_or(0, BTreeSet::len)
    }

    /// Ids whose term lies between the bounds. Inverted or empty bounds
    /// yield nothing instead of panicking.
    pub fn range(&self, lower: Bound<&IndexTerm>, upper: Bound<&IndexTerm>) -> BTreeSet<u64> {
        if let (Bound::Included(l) | Bound::Excluded(l), Bound::Included(u) | Bound::Excluded(u)) =
            (lower, upper)
        {
            let both_inclusive = matches!((lower, upper), (Bound::Included(_), Bound::Included(_)));
            if l > u || (l == u && !both_inclusive) {
                return BTreeSet::new();
            }
        }
        self.index
            .range::<IndexTerm, _>((lower, upper))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Ids with a term strictly above (`above = true`) or below `term`,
    /// restricted to terms of the same class
    pub fn beyond(&self, term: &IndexTerm, above: bool, inclusive: bool) -> BTreeSet<u64> {
        let edge = if inclusive {
            Bound::Included(term)
        } else {
            Bound::Excluded(term)
        };
        let same_class = |(t, _): &(&IndexTerm, &BTreeSet<u64>)| t.class() == term.class();
        let mut result = BTreeSet::new();
        if above {
            for (_, ids) in self.index.range::<IndexTerm, _>((edge, Bound::Unbounded)).take_while(same_class) {
                result.extend(ids.iter().copied());
            }
        } else {
            for (_, ids) in self
                .index
                .range::<IndexTerm, _>((Bound::Unbounded, edge))
                .rev()
                .take_while(same_class)
            {
                result.extend(ids.iter().copied());
            }
        }
        result
    }

    /// Every id with any term
    pub fn all(&self) -> BTreeSet<u64> {
        self.index.values().flatten().copied().collect()
    }

    /// Number of (term, id) entries
    pub fn len(&self) -> usize {
        self.index.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_index_ops() {
        let mut index = PropertyIndex::new();
        let val = IndexTerm::Int(100);

        index.insert(val.clone(), 1);
        index.insert(val.clone(), 2);

        let results = index.get(&val);
        assert_eq!(results.len(), 2);
        assert!(results.contains(&1));
        assert!(results.contains(&2));

        assert!(index.remove(&val, 1));
        assert!(!index.remove(&val, 1));
        let results = index.get(&val);
        assert_eq!(results.len(), 1);
        assert!(results.contains(&2));

        index.remove(&val, 2);
        assert!(index.is_empty());
    }

    #[test]
    fn test_property_index_range() {
        let mut index = PropertyIndex::new();
        for i in 1..=10 {
            index.insert(IndexTerm::Int(i), i as u64);
        }

        // [3, 8)
        let results = index.range(Bound::Included(&IndexTerm::Int(3)), Bound::Excluded(&IndexTerm::Int(8)));
        assert_eq!(results.into_iter().collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);

        let inverted = index.range(Bound::Included(&IndexTerm::Int(8)), Bound::Excluded(&IndexTerm::Int(3)));
        assert!(inverted.is_empty());
        let empty = index.range(Bound::Included(&IndexTerm::Int(3)), Bound::Excluded(&IndexTerm::Int(3)));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_beyond_stays_within_class() {
        let mut index = PropertyIndex::new();
        index.insert(IndexTerm::Int(10), 1);
        index.insert(IndexTerm::Float(20.5), 2);
        index.insert(IndexTerm::Str("zzz".into()), 3);
        index.insert(IndexTerm::Bool(true), 4);

        let above = index.beyond(&IndexTerm::Int(10), true, false);
        assert_eq!(above.into_iter().collect::<Vec<_>>(), vec![2]);

        let at_most = index.beyond(&IndexTerm::Int(20), false, true);
        assert_eq!(at_most.into_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(index.len(), 4);
        assert_eq!(index.all().len(), 4);
    }
}
