//! Edge handle
//!
//! An edge is directed: it leaves its out-vertex and enters its in-vertex.
//! Endpoints and label are fixed at creation; relabeling means removing the
//! edge and adding a new one.

use super::element::Element;
use super::store::{Graph, GraphError, GraphResult};
use super::types::{Direction, EdgeId, ElementKind, Label, VertexId};
use super::vertex::Vertex;
use std::fmt;
use std::hash::{Hash, Hasher};

/// An edge of a [`Graph`]
#[derive(Clone)]
pub struct Edge {
    graph: Graph,
    id: EdgeId,
    /// Edge goes FROM this vertex
    out_vertex: VertexId,
    /// Edge goes TO this vertex
    in_vertex: VertexId,
    label: Label,
}

impl Edge {
    pub(crate) fn new(graph: Graph, id: EdgeId, out_vertex: VertexId, in_vertex: VertexId, label: Label) -> Self {
        Self {
            graph,
            id,
            out_vertex,
            in_vertex,
            label,
        }
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn out_vertex_id(&self) -> VertexId {
        self.out_vertex
    }

    pub fn in_vertex_id(&self) -> VertexId {
        self.in_vertex
    }

    /// Endpoint on the `direction` side: `Out` is the tail, `In` the head
    pub fn vertex(&self, direction: Direction) -> GraphResult<Vertex> {
        let id = match direction {
            Direction::Out => self.out_vertex,
            Direction::In => self.in_vertex,
            Direction::Both => {
                return Err(GraphError::Argument(
                    "an edge has no single vertex in direction Both".to_string(),
                ))
            }
        };
        Ok(Vertex::new(self.graph.clone(), id))
    }

    pub fn is_self_loop(&self) -> bool {
        self.out_vertex == self.in_vertex
    }

    pub fn remove(self) -> GraphResult<()> {
        let graph = self.graph.clone();
        graph.remove_edge(&self)
    }
}

impl Element for Edge {
    const KIND: ElementKind = ElementKind::Edge;

    fn raw_id(&self) -> u64 {
        self.id.as_u64()
    }

    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn resolve(graph: &Graph, id: u64) -> GraphResult<Option<Self>> {
        graph.edge(EdgeId::new(id))
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.graph.same_instance(&other.graph)
    }
}

impl Eq for Edge {}

impl Hash for Edge {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("id", &self.id.as_u64())
            .field("out", &self.out_vertex.as_u64())
            .field("in", &self.in_vertex.as_u64())
            .field("label", &self.label.as_str())
            .finish()
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "e[{}][{}-{}->{}]",
            self.id.as_u64(),
            self.out_vertex.as_u64(),
            self.label,
            self.in_vertex.as_u64()
        )
    }
}
