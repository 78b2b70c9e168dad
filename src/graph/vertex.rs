//! Vertex handle

use super::edge::Edge;
use super::element::Element;
use super::store::{Graph, GraphResult};
use super::types::{Direction, ElementKind, VertexId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A vertex of a [`Graph`]. Cheap to clone; reads and writes go straight
/// to the graph's stores.
#[derive(Clone)]
pub struct Vertex {
    graph: Graph,
    id: VertexId,
}

impl Vertex {
    pub(crate) fn new(graph: Graph, id: VertexId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    /// Incident edges in `direction`, restricted to `labels` unless empty.
    /// A self-loop appears once per direction when `direction` is `Both`.
    pub fn edges(&self, direction: Direction, labels: &[&str]) -> GraphResult<Vec<Edge>> {
        self.graph.core().vertex_edges(&self.graph, self.id, direction, labels)
    }

    /// Vertices at the other end of [`Vertex::edges`]
    pub fn vertices(&self, direction: Direction, labels: &[&str]) -> GraphResult<Vec<Vertex>> {
        Ok(self
            .edges(direction, labels)?
            .into_iter()
            .map(|edge| {
                let other = if edge.out_vertex_id() == self.id {
                    edge.in_vertex_id()
                } else {
                    edge.out_vertex_id()
                };
                Vertex::new(self.graph.clone(), other)
            })
            .collect())
    }

    /// Add an edge from this vertex to `in_vertex`
    pub fn add_edge(&self, label: &str, in_vertex: &Vertex) -> GraphResult<Edge> {
        self.graph.add_edge(None, self, in_vertex, label)
    }

    /// Remove this vertex and every incident edge
    pub fn remove(self) -> GraphResult<()> {
        let graph = self.graph.clone();
        graph.remove_vertex(&self)
    }
}

impl Element for Vertex {
    const KIND: ElementKind = ElementKind::Vertex;

    fn raw_id(&self) -> u64 {
        self.id.as_u64()
    }

    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn resolve(graph: &Graph, id: u64) -> GraphResult<Option<Self>> {
        graph.vertex(VertexId::new(id))
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.graph.same_instance(&other.graph)
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex").field("id", &self.id.as_u64()).finish()
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v[{}]", self.id.as_u64())
    }
}
