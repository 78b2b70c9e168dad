//! Element headers and id allocation
//!
//! A header record marks an element as existing. Vertex headers are empty;
//! edge headers carry the immutable endpoints and label.

use super::keys;
use super::{KvBackend, StorageResult, WriteBatch};
use crate::graph::types::{ElementKind, Label, VertexId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const NEXT_VERTEX_ID: &str = "next_vertex_id";
const NEXT_EDGE_ID: &str = "next_edge_id";

/// Immutable part of an edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeHeader {
    pub out_vertex: VertexId,
    pub in_vertex: VertexId,
    pub label: Label,
}

/// Existence records plus monotonically increasing id counters
pub struct ElementTable {
    backend: Arc<dyn KvBackend>,
    next_vertex: AtomicU64,
    next_edge: AtomicU64,
}

impl ElementTable {
    /// Open the table, recovering id counters.
    ///
    /// The counter is the larger of the persisted value and one past the
    /// highest surviving header, so concurrent allocations that persisted
    /// their counters out of order never cause an id to be handed out twice.
    pub fn open(backend: Arc<dyn KvBackend>) -> StorageResult<Self> {
        let next_vertex = Self::recover_counter(&*backend, ElementKind::Vertex)?;
        let next_edge = Self::recover_counter(&*backend, ElementKind::Edge)?;
        debug!(
            "Element table opened, next vertex id {}, next edge id {}",
            next_vertex, next_edge
        );
        Ok(Self {
            backend,
            next_vertex: AtomicU64::new(next_vertex),
            next_edge: AtomicU64::new(next_edge),
        })
    }

    fn counter_name(kind: ElementKind) -> &'static str {
        match kind {
            ElementKind::Vertex => NEXT_VERTEX_ID,
            ElementKind::Edge => NEXT_EDGE_ID,
        }
    }

    fn counter(&self, kind: ElementKind) -> &AtomicU64 {
        match kind {
            ElementKind::Vertex => &self.next_vertex,
            ElementKind::Edge => &self.next_edge,
        }
    }

    fn recover_counter(backend: &dyn KvBackend, kind: ElementKind) -> StorageResult<u64> {
        let stored = match backend.get(&keys::config_key(Self::counter_name(kind)))? {
            Some(bytes) => keys::decode_u64(&bytes)?,
            None => 1,
        };
        let mut highest = 0;
        for (key, _) in backend.scan_prefix(&keys::header_prefix(kind))? {
            highest = highest.max(keys::header_id(&key)?);
        }
        Ok(stored.max(highest + 1))
    }

    /// Hand out a fresh id and record the advanced counter in `batch`
    pub fn allocate(&self, kind: ElementKind, batch: &mut WriteBatch) -> u64 {
        let id = self.counter(kind).fetch_add(1, Ordering::SeqCst);
        batch.put(
            keys::config_key(Self::counter_name(kind)),
            (id + 1).to_be_bytes().to_vec(),
        );
        id
    }

    /// Make sure a caller-supplied id is never handed out by `allocate`
    pub fn reserve(&self, kind: ElementKind, id: u64, batch: &mut WriteBatch) {
        let next = id.saturating_add(1);
        let previous = self.counter(kind).fetch_max(next, Ordering::SeqCst);
        if previous < next {
            batch.put(
                keys::config_key(Self::counter_name(kind)),
                next.to_be_bytes().to_vec(),
            );
        }
    }

    pub fn exists(&self, kind: ElementKind, id: u64) -> StorageResult<bool> {
        Ok(self.backend.get(&keys::header_key(kind, id))?.is_some())
    }

    pub fn edge_header(&self, id: u64) -> StorageResult<Option<EdgeHeader>> {
        match self.backend.get(&keys::header_key(ElementKind::Edge, id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn insert_vertex(&self, id: u64, batch: &mut WriteBatch) {
        batch.put(keys::header_key(ElementKind::Vertex, id), Vec::new());
    }

    pub fn insert_edge(&self, id: u64, header: &EdgeHeader, batch: &mut WriteBatch) -> StorageResult<()> {
        batch.put(keys::header_key(ElementKind::Edge, id), bincode::serialize(header)?);
        Ok(())
    }

    pub fn remove(&self, kind: ElementKind, id: u64, batch: &mut WriteBatch) {
        batch.delete(keys::header_key(kind, id));
    }

    /// All live ids of one kind, ascending
    pub fn ids(&self, kind: ElementKind) -> StorageResult<Vec<u64>> {
        self.backend
            .scan_prefix(&keys::header_prefix(kind))?
            .iter()
            .map(|(key, _)| keys::header_id(key))
            .collect()
    }

    /// Every edge header, ascending by id
    pub fn edge_headers(&self) -> StorageResult<Vec<(u64, EdgeHeader)>> {
        self.backend
            .scan_prefix(&keys::header_prefix(ElementKind::Edge))?
            .iter()
            .map(|(key, value)| Ok((keys::header_id(key)?, bincode::deserialize(value)?)))
            .collect()
    }
}
