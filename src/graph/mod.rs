//! Property graph model
//!
//! - Vertices and directed, labeled edges with typed properties
//! - Several edges between the same pair of vertices, and self-loops
//! - Key indices kept in step with property writes
//! - Transactions, change listeners and bulk loading

pub mod batch;
pub mod edge;
pub mod element;
pub mod event;
pub mod features;
pub mod property;
pub mod store;
pub mod types;
pub mod vertex;

// Re-export main types
pub use batch::BatchLoader;
pub use edge::Edge;
pub use element::Element;
pub use event::{EventDelivery, GraphEvent, GraphListener};
pub use features::Features;
pub use property::{PropertyMap, PropertyValue};
pub use store::{Graph, GraphError, GraphResult, GraphStats};
pub use types::{Direction, EdgeId, ElementKind, Label, VertexId};
pub use vertex::Vertex;
