//! Per-vertex adjacency records
//!
//! Each edge produces two records: one in the out-vertex's `Out` collection
//! and one in the in-vertex's `In` collection. Records are keyed by label and
//! then edge id, so a label filter is a single prefix scan and results are
//! deterministic for a fixed data set.

use super::keys;
use super::{KvBackend, StorageResult, WriteBatch};
use crate::graph::types::{Direction, EdgeId, Label, VertexId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// One edge as seen from one of its endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjacencyRecord {
    /// Direction relative to the vertex that was queried
    pub direction: Direction,
    pub label: Label,
    pub edge: EdgeId,
    /// The vertex at the other end; equal to the queried vertex for self-loops
    pub neighbor: VertexId,
}

/// Directional, label-keyed edge lists for every vertex
pub trait AdjacencyStore: Send + Sync {
    /// Queue a record for `edge` in `vertex`'s `direction` collection
    fn add_edge_record(
        &self,
        vertex: VertexId,
        direction: Direction,
        label: &Label,
        edge: EdgeId,
        neighbor: VertexId,
        batch: &mut WriteBatch,
    );

    /// Queue removal of exactly one record. Missing records are ignored
    /// in release builds and trip an assertion in debug builds.
    fn remove_edge_record(
        &self,
        vertex: VertexId,
        direction: Direction,
        label: &Label,
        edge: EdgeId,
        neighbor: VertexId,
        batch: &mut WriteBatch,
    ) -> StorageResult<()>;

    /// Records touching `vertex`. An empty `labels` slice means every label;
    /// `Direction::Both` is the union of `Out` and `In`.
    fn edges(
        &self,
        vertex: VertexId,
        direction: Direction,
        labels: &[Label],
    ) -> StorageResult<Vec<AdjacencyRecord>>;
}

/// [`AdjacencyStore`] embedded in the vertex property namespace of a
/// key/value backend
pub struct KvAdjacencyStore {
    backend: Arc<dyn KvBackend>,
}

impl KvAdjacencyStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    fn scan(
        &self,
        vertex: VertexId,
        direction: Direction,
        scan_prefix: &[u8],
        out: &mut Vec<AdjacencyRecord>,
    ) -> StorageResult<()> {
        let direction_prefix = keys::adjacency_prefix(vertex.as_u64(), direction);
        for (key, value) in self.backend.scan_prefix(scan_prefix)? {
            let (label, edge) = keys::parse_adjacency_suffix(&key, &direction_prefix)?;
            out.push(AdjacencyRecord {
                direction,
                label: Label::new(label),
                edge: EdgeId::new(edge),
                neighbor: VertexId::new(keys::decode_u64(&value)?),
            });
        }
        Ok(())
    }
}

impl AdjacencyStore for KvAdjacencyStore {
    fn add_edge_record(
        &self,
        vertex: VertexId,
        direction: Direction,
        label: &Label,
        edge: EdgeId,
        neighbor: VertexId,
        batch: &mut WriteBatch,
    ) {
        batch.put(
            keys::adjacency_key(vertex.as_u64(), direction, label.as_str(), edge.as_u64()),
            neighbor.as_u64().to_be_bytes().to_vec(),
        );
    }

    fn remove_edge_record(
        &self,
        vertex: VertexId,
        direction: Direction,
        label: &Label,
        edge: EdgeId,
        neighbor: VertexId,
        batch: &mut WriteBatch,
    ) -> StorageResult<()> {
        let key = keys::adjacency_key(vertex.as_u64(), direction, label.as_str(), edge.as_u64());
        if cfg!(debug_assertions) {
            let stored = self.backend.get(&key)?;
            let expected = neighbor.as_u64().to_be_bytes();
            if stored.as_deref() != Some(&expected[..]) {
                warn!(
                    "Adjacency record missing: {} {:?} {} {} -> {}",
                    vertex, direction, label, edge, neighbor
                );
            }
            debug_assert!(
                stored.as_deref() == Some(&expected[..]),
                "adjacency record for {} missing on {}",
                edge,
                vertex
            );
        }
        batch.delete(key);
        Ok(())
    }

    fn edges(
        &self,
        vertex: VertexId,
        direction: Direction,
        labels: &[Label],
    ) -> StorageResult<Vec<AdjacencyRecord>> {
        let labels: BTreeSet<&str> = labels.iter().map(Label::as_str).collect();
        let mut records = Vec::new();
        for &dir in direction.expand() {
            if labels.is_empty() {
                let prefix = keys::adjacency_prefix(vertex.as_u64(), dir);
                self.scan(vertex, dir, &prefix, &mut records)?;
            } else {
                for label in &labels {
                    let prefix = keys::adjacency_label_prefix(vertex.as_u64(), dir, label);
                    self.scan(vertex, dir, &prefix, &mut records)?;
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn store() -> (Arc<dyn KvBackend>, KvAdjacencyStore) {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        (backend.clone(), KvAdjacencyStore::new(backend))
    }

    /// Write both records of an edge, as the graph does
    fn link(
        backend: &Arc<dyn KvBackend>,
        store: &KvAdjacencyStore,
        edge: u64,
        out: u64,
        inv: u64,
        label: &str,
    ) {
        let mut batch = WriteBatch::new();
        let label = Label::new(label);
        let (e, o, i) = (EdgeId::new(edge), VertexId::new(out), VertexId::new(inv));
        store.add_edge_record(o, Direction::Out, &label, e, i, &mut batch);
        store.add_edge_record(i, Direction::In, &label, e, o, &mut batch);
        backend.write(batch).unwrap();
    }

    fn edge_ids(records: &[AdjacencyRecord]) -> Vec<u64> {
        records.iter().map(|r| r.edge.as_u64()).collect()
    }

    #[test]
    fn test_records_are_symmetric() {
        let (backend, store) = store();
        link(&backend, &store, 10, 1, 2, "knows");

        let out = store.edges(VertexId::new(1), Direction::Out, &[]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].neighbor, VertexId::new(2));
        assert_eq!(out[0].label.as_str(), "knows");

        let inc = store.edges(VertexId::new(2), Direction::In, &[]).unwrap();
        assert_eq!(inc[0].neighbor, VertexId::new(1));
        assert!(store.edges(VertexId::new(1), Direction::In, &[]).unwrap().is_empty());
        assert!(store.edges(VertexId::new(2), Direction::Out, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_label_filter() {
        let (backend, store) = store();
        link(&backend, &store, 1, 1, 2, "knows");
        link(&backend, &store, 2, 1, 3, "created");
        link(&backend, &store, 3, 1, 4, "likes");

        let v = VertexId::new(1);
        assert_eq!(store.edges(v, Direction::Out, &[]).unwrap().len(), 3);
        let filtered = store
            .edges(v, Direction::Out, &[Label::new("knows"), Label::new("likes")])
            .unwrap();
        let mut ids = edge_ids(&filtered);
        ids.sort();
        assert_eq!(ids, vec![1, 3]);

        // Repeated labels do not repeat records
        let repeated = store
            .edges(v, Direction::Out, &[Label::new("knows"), Label::new("knows")])
            .unwrap();
        assert_eq!(repeated.len(), 1);
    }

    #[test]
    fn test_duplicate_edges_kept_apart() {
        let (backend, store) = store();
        link(&backend, &store, 1, 1, 2, "knows");
        link(&backend, &store, 2, 1, 2, "knows");

        let knows = [Label::new("knows")];
        assert_eq!(store.edges(VertexId::new(1), Direction::Out, &knows).unwrap().len(), 2);

        let mut batch = WriteBatch::new();
        store
            .remove_edge_record(
                VertexId::new(1),
                Direction::Out,
                &knows[0],
                EdgeId::new(1),
                VertexId::new(2),
                &mut batch,
            )
            .unwrap();
        backend.write(batch).unwrap();

        let left = store.edges(VertexId::new(1), Direction::Out, &knows).unwrap();
        assert_eq!(edge_ids(&left), vec![2]);
    }

    #[test]
    fn test_self_loop_both_directions() {
        let (backend, store) = store();
        link(&backend, &store, 7, 5, 5, "self");

        let both = store.edges(VertexId::new(5), Direction::Both, &[]).unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].direction, Direction::Out);
        assert_eq!(both[1].direction, Direction::In);
        assert!(both.iter().all(|r| r.neighbor == VertexId::new(5)));
    }

    #[test]
    fn test_labels_that_share_a_prefix() {
        let (backend, store) = store();
        link(&backend, &store, 1, 1, 2, "knows");
        link(&backend, &store, 2, 1, 2, "knows_well");

        let knows = store
            .edges(VertexId::new(1), Direction::Out, &[Label::new("knows")])
            .unwrap();
        assert_eq!(edge_ids(&knows), vec![1]);
    }
}
