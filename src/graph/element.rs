//! Behaviour shared by vertices and edges

use super::property::{PropertyMap, PropertyValue};
use super::store::{Graph, GraphResult};
use super::types::ElementKind;

mod sealed {
    pub trait Sealed {}
    impl Sealed for crate::graph::vertex::Vertex {}
    impl Sealed for crate::graph::edge::Edge {}
}

/// A vertex or an edge: an immutable id plus a mutable property bag.
///
/// Two elements are equal when they belong to the same graph instance and
/// carry the same id.
pub trait Element: Clone + Send + Sync + sealed::Sealed {
    const KIND: ElementKind;

    /// Raw id within the element's kind
    fn raw_id(&self) -> u64;

    fn graph(&self) -> &Graph;

    /// Look up an element of this kind by raw id
    #[doc(hidden)]
    fn resolve(graph: &Graph, id: u64) -> GraphResult<Option<Self>>;

    /// Current value of `key`, `None` if unset
    fn property(&self, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.graph().core().property(Self::KIND, self.raw_id(), key)
    }

    /// Set `key`, returning the value it replaced
    fn set_property(&self, key: &str, value: impl Into<PropertyValue>) -> GraphResult<Option<PropertyValue>> {
        self.graph()
            .core()
            .set_property(Self::KIND, self.raw_id(), key, value.into())
    }

    /// Remove `key`, returning its last value
    fn remove_property(&self, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.graph().core().remove_property(Self::KIND, self.raw_id(), key)
    }

    fn property_keys(&self) -> GraphResult<Vec<String>> {
        self.graph().core().property_keys(Self::KIND, self.raw_id())
    }

    fn properties(&self) -> GraphResult<PropertyMap> {
        self.graph().core().properties(Self::KIND, self.raw_id())
    }
}
