//! Persisted index-name registry
//!
//! One name list per [`IndexColumn`], kept under a reader-writer lock and
//! written through to a config record of the graph backend on every change.
//! User index names are matched case-insensitively and keep the spelling
//! they were created with; key-index names are property keys and stay
//! case-sensitive.

use super::IndexResult;
use crate::graph::types::ElementKind;
use crate::storage::{keys, KvBackend};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The four index collections of a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexColumn {
    /// Key indices over vertex properties
    SystemVertex,
    /// Key indices over edge properties
    SystemEdge,
    /// Named, manually populated vertex indices
    UserVertex,
    /// Named, manually populated edge indices
    UserEdge,
}

impl IndexColumn {
    pub const ALL: [IndexColumn; 4] = [
        IndexColumn::SystemVertex,
        IndexColumn::SystemEdge,
        IndexColumn::UserVertex,
        IndexColumn::UserEdge,
    ];

    pub fn system(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Vertex => IndexColumn::SystemVertex,
            ElementKind::Edge => IndexColumn::SystemEdge,
        }
    }

    pub fn user(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Vertex => IndexColumn::UserVertex,
            ElementKind::Edge => IndexColumn::UserEdge,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IndexColumn::SystemVertex => "system_vertex",
            IndexColumn::SystemEdge => "system_edge",
            IndexColumn::UserVertex => "user_vertex",
            IndexColumn::UserEdge => "user_edge",
        }
    }

    pub fn kind(self) -> ElementKind {
        match self {
            IndexColumn::SystemVertex | IndexColumn::UserVertex => ElementKind::Vertex,
            IndexColumn::SystemEdge | IndexColumn::UserEdge => ElementKind::Edge,
        }
    }

    pub fn is_user(self) -> bool {
        matches!(self, IndexColumn::UserVertex | IndexColumn::UserEdge)
    }

    /// Registry key for `name` in this column
    pub fn normalize(self, name: &str) -> String {
        if self.is_user() {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }

    fn record_name(self) -> String {
        format!("indices.{}", self.name())
    }
}

impl fmt::Display for IndexColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized name -> name as created
type NameList = IndexMap<String, String>;

pub struct IndexRegistry {
    backend: Arc<dyn KvBackend>,
    columns: [RwLock<NameList>; 4],
}

impl IndexRegistry {
    /// Load the four name lists from `backend`
    pub fn open(backend: Arc<dyn KvBackend>) -> IndexResult<Self> {
        let mut lists: [NameList; 4] = Default::default();
        for column in IndexColumn::ALL {
            if let Some(bytes) = backend.get(&keys::config_key(&column.record_name()))? {
                let names: Vec<String> = bincode::deserialize(&bytes)?;
                lists[column.slot()] = names
                    .into_iter()
                    .map(|name| (column.normalize(&name), name))
                    .collect();
            }
        }
        Ok(Self {
            backend,
            columns: lists.map(RwLock::new),
        })
    }

    fn persist(&self, column: IndexColumn, list: &NameList) -> IndexResult<()> {
        let names: Vec<&String> = list.values().collect();
        self.backend
            .put(&keys::config_key(&column.record_name()), &bincode::serialize(&names)?)?;
        Ok(())
    }

    /// Add `name`. Returns `false` if it was already registered.
    pub fn register(&self, column: IndexColumn, name: &str) -> IndexResult<bool> {
        let key = column.normalize(name);
        let mut list = self.columns[column.slot()].write();
        if list.contains_key(&key) {
            return Ok(false);
        }
        list.insert(key, name.to_string());
        if let Err(e) = self.persist(column, &list) {
            list.pop();
            return Err(e);
        }
        debug!("Registered index {} in {}", name, column);
        Ok(true)
    }

    /// Remove `name`. Returns `false` if it was not registered.
    pub fn unregister(&self, column: IndexColumn, name: &str) -> IndexResult<bool> {
        let key = column.normalize(name);
        let mut list = self.columns[column.slot()].write();
        let Some(index) = list.get_index_of(&key) else {
            return Ok(false);
        };
        let Some((key, display)) = list.shift_remove_index(index) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(column, &list) {
            list.shift_insert(index, key, display);
            return Err(e);
        }
        debug!("Unregistered index {} in {}", name, column);
        Ok(true)
    }

    pub fn contains(&self, column: IndexColumn, name: &str) -> bool {
        self.columns[column.slot()].read().contains_key(&column.normalize(name))
    }

    /// Names as created, in creation order
    pub fn names(&self, column: IndexColumn) -> Vec<String> {
        self.columns[column.slot()].read().values().cloned().collect()
    }

    /// Normalized names, in creation order
    pub fn keys(&self, column: IndexColumn) -> Vec<String> {
        self.columns[column.slot()].read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[test]
    fn test_register_is_idempotent() {
        let registry = IndexRegistry::open(Arc::new(MemoryBackend::new())).unwrap();
        assert!(registry.register(IndexColumn::UserVertex, "ageIdx").unwrap());
        assert!(!registry.register(IndexColumn::UserVertex, "ageIdx").unwrap());
        assert!(!registry.register(IndexColumn::UserVertex, "AGEIDX").unwrap());
        assert_eq!(registry.names(IndexColumn::UserVertex), vec!["ageIdx".to_string()]);
        assert!(registry.contains(IndexColumn::UserVertex, "ageidx"));
        assert!(!registry.contains(IndexColumn::UserEdge, "ageIdx"));
    }

    #[test]
    fn test_key_index_names_are_case_sensitive() {
        let registry = IndexRegistry::open(Arc::new(MemoryBackend::new())).unwrap();
        registry.register(IndexColumn::SystemVertex, "name").unwrap();
        assert!(registry.register(IndexColumn::SystemVertex, "Name").unwrap());
        assert_eq!(registry.keys(IndexColumn::SystemVertex).len(), 2);
    }

    #[test]
    fn test_lists_persist() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        {
            let registry = IndexRegistry::open(backend.clone()).unwrap();
            registry.register(IndexColumn::UserEdge, "Weights").unwrap();
            registry.register(IndexColumn::SystemEdge, "weight").unwrap();
            registry.register(IndexColumn::SystemEdge, "since").unwrap();
            assert!(registry.unregister(IndexColumn::SystemEdge, "weight").unwrap());
            assert!(!registry.unregister(IndexColumn::SystemEdge, "weight").unwrap());
        }
        let registry = IndexRegistry::open(backend).unwrap();
        assert_eq!(registry.names(IndexColumn::UserEdge), vec!["Weights".to_string()]);
        assert_eq!(registry.keys(IndexColumn::UserEdge), vec!["weights".to_string()]);
        assert_eq!(registry.names(IndexColumn::SystemEdge), vec!["since".to_string()]);
        assert!(registry.names(IndexColumn::SystemVertex).is_empty());
    }
}
