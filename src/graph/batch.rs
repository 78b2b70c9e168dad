//! Bulk loading in fixed-size transactions

use super::edge::Edge;
use super::element::Element;
use super::property::PropertyValue;
use super::store::{Graph, GraphResult};
use super::types::{EdgeId, VertexId};
use super::vertex::Vertex;
use tracing::{debug, error};

/// Wraps a graph in a transaction that is committed and reopened every
/// `batch_size` mutations. Whatever is pending is committed by
/// [`BatchLoader::finish`], or on drop.
pub struct BatchLoader {
    graph: Graph,
    batch_size: usize,
    pending: usize,
    committed: usize,
    finished: bool,
}

impl BatchLoader {
    /// Start loading; fails if `graph` already has an open transaction
    pub fn new(graph: Graph, batch_size: usize) -> GraphResult<Self> {
        graph.begin()?;
        Ok(Self {
            graph,
            batch_size: batch_size.max(1),
            pending: 0,
            committed: 0,
            finished: false,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn add_vertex(&mut self, id: Option<VertexId>) -> GraphResult<Vertex> {
        let vertex = self.graph.add_vertex(id)?;
        self.tick()?;
        Ok(vertex)
    }

    pub fn add_edge(&mut self, id: Option<EdgeId>, out_vertex: &Vertex, in_vertex: &Vertex, label: &str) -> GraphResult<Edge> {
        let edge = self.graph.add_edge(id, out_vertex, in_vertex, label)?;
        self.tick()?;
        Ok(edge)
    }

    pub fn set_property<E: Element>(&mut self, element: &E, key: &str, value: impl Into<PropertyValue>) -> GraphResult<()> {
        element.set_property(key, value)?;
        self.tick()
    }

    /// Mutations committed so far
    pub fn committed(&self) -> usize {
        self.committed
    }

    fn tick(&mut self) -> GraphResult<()> {
        self.pending += 1;
        if self.pending >= self.batch_size {
            self.graph.commit()?;
            self.committed += self.pending;
            debug!("Batch loader committed {} mutations", self.committed);
            self.pending = 0;
            self.graph.begin()?;
        }
        Ok(())
    }

    /// Commit the last partial batch
    pub fn finish(mut self) -> GraphResult<usize> {
        self.finished = true;
        self.graph.commit()?;
        self.committed += std::mem::take(&mut self.pending);
        Ok(self.committed)
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        if self.finished || !self.graph.in_transaction() {
            return;
        }
        if let Err(e) = self.graph.commit() {
            error!("Batch loader failed to commit {} pending mutations: {}", self.pending, e);
        }
    }
}
