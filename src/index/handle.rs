//! Typed handle on one user index
//!
//! User indices are populated explicitly with [`Index::put`]; property writes
//! never touch them. Removing an element still removes it from every index.

use super::generation::Generation;
use super::manager::IndexingService;
use super::query::QueryElement;
use super::registry::IndexColumn;
use crate::graph::element::Element;
use crate::graph::property::PropertyValue;
use crate::graph::store::{validate_key, Graph, GraphError, GraphResult};
use std::fmt;
use std::marker::PhantomData;

/// Named user index over elements of type `E`
pub struct Index<E: Element> {
    graph: Graph,
    name: String,
    column: IndexColumn,
    _kind: PhantomData<fn() -> E>,
}

impl<E: Element> Clone for Index<E> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            name: self.name.clone(),
            column: self.column,
            _kind: PhantomData,
        }
    }
}

impl<E: Element> Index<E> {
    pub(crate) fn new(graph: Graph, name: &str, column: IndexColumn) -> Self {
        Self {
            graph,
            name: name.to_string(),
            column,
            _kind: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn service(&self) -> GraphResult<&dyn IndexingService> {
        let indexing: &dyn IndexingService = self.graph.core().indexing.as_ref();
        if indexing.has_index(self.column, &self.name) {
            Ok(indexing)
        } else {
            Err(GraphError::IndexNotFound(self.name.clone()))
        }
    }

    fn check_owner(&self, element: &E) -> GraphResult<()> {
        if element.graph().same_instance(&self.graph) {
            Ok(())
        } else {
            Err(GraphError::ElementNotFound {
                kind: E::KIND,
                id: element.raw_id(),
            })
        }
    }

    /// Service handle after waiting for every write made so far
    fn settled(&self) -> GraphResult<&dyn IndexingService> {
        let service = self.service()?;
        service.wait_for_generation(service.last_generation());
        Ok(service)
    }

    /// Index `element` under `key = value`, replacing what it had under `key`
    pub fn put(&self, key: &str, value: impl Into<PropertyValue>, element: &E) -> GraphResult<Generation> {
        validate_key(key)?;
        self.check_owner(element)?;
        let value = value.into();
        value.check_storable().map_err(GraphError::UnsupportedPropertyType)?;
        Ok(self
            .service()?
            .set(self.column, element.raw_id(), &self.name, key, &value)?)
    }

    /// Elements indexed under `key = value`, up to the graph's default hit limit
    pub fn get(&self, key: &str, value: impl Into<PropertyValue>) -> GraphResult<Vec<E>> {
        let hits = self.graph.core().indexing.default_hits();
        self.get_limited(key, value, hits)
    }

    pub fn get_limited(&self, key: &str, value: impl Into<PropertyValue>, hits: usize) -> GraphResult<Vec<E>> {
        validate_key(key)?;
        let ids = self
            .settled()?
            .get(self.column, &self.name, key, &value.into(), hits)?;
        self.graph.resolve_all(ids)
    }

    pub fn count(&self, key: &str, value: impl Into<PropertyValue>) -> GraphResult<usize> {
        validate_key(key)?;
        Ok(self.settled()?.count(self.column, &self.name, key, &value.into())?)
    }

    /// Drop the entry of `element` for `key = value`
    pub fn remove(&self, key: &str, value: impl Into<PropertyValue>, element: &E) -> GraphResult<Generation> {
        validate_key(key)?;
        self.check_owner(element)?;
        Ok(self
            .service()?
            .delete_entry(self.column, element.raw_id(), &self.name, key, &value.into())?)
    }

    /// Conjunction of comparison and interval predicates
    pub fn query(&self, elements: &[QueryElement]) -> GraphResult<Vec<E>> {
        if elements.is_empty() {
            return Err(GraphError::Argument("query needs at least one element".to_string()));
        }
        let hits = self.graph.core().indexing.default_hits();
        let ids = self.settled()?.query(self.column, &self.name, elements, hits)?;
        self.graph.resolve_all(ids)
    }

    /// Remove every entry, keeping the index registered
    pub fn clear(&self) -> GraphResult<Generation> {
        Ok(self.service()?.delete_index(self.column, &self.name)?)
    }
}

impl<E: Element> fmt::Debug for Index<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("column", &self.column)
            .finish()
    }
}
