//! Graphdex
//!
//! A property graph storage engine: vertices and directed, labeled edges
//! carrying typed properties, stored in a pluggable ordered key/value
//! backend (in-memory or RocksDB), with secondary indices whose visibility
//! is tracked by generation numbers.
//!
//! # Layout
//!
//! - [`storage`]: key/value backends, element table, property and adjacency stores
//! - [`index`]: index collections, generations, the indexing service
//! - [`graph`]: the [`Graph`] façade, element handles, events, bulk loading
//! - [`config`], [`factory`]: opening graphs
//!
//! ## Example Usage
//!
//! ```rust
//! use graphdex::{Direction, Element, ElementKind, Graph};
//!
//! let graph = Graph::memory().unwrap();
//! graph.create_key_index("name", ElementKind::Vertex).unwrap();
//!
//! let alice = graph.add_vertex(None).unwrap();
//! alice.set_property("name", "Alice").unwrap();
//! let bob = graph.add_vertex(None).unwrap();
//! bob.set_property("name", "Bob").unwrap();
//!
//! let knows = alice.add_edge("knows", &bob).unwrap();
//! knows.set_property("since", 2020i64).unwrap();
//!
//! assert_eq!(alice.vertices(Direction::Out, &["knows"]).unwrap(), vec![bob.clone()]);
//! assert_eq!(graph.vertices_by("name", "Bob").unwrap(), vec![bob]);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod factory;
pub mod graph;
pub mod index;
pub mod storage;

// Re-export main types for convenience
pub use config::{ConfigError, GraphConfig, GraphConfiguration, IndexConfig, StorageKind};
pub use factory::GraphFactory;
pub use graph::{
    BatchLoader, Direction, Edge, EdgeId, Element, ElementKind, EventDelivery, Features, Graph, GraphError,
    GraphEvent, GraphListener, GraphResult, GraphStats, Label, PropertyMap, PropertyValue, Vertex, VertexId,
};
pub use index::{CompareOp, Generation, Index, IndexColumn, IndexStats, QueryElement, RefreshPolicy};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
        assert_eq!(ver, "0.1.0");
    }
}
