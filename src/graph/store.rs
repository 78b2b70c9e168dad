//! Graph façade
//!
//! [`Graph`] composes the element table, property store, adjacency store and
//! indexing service over one transactional key/value backend. It enforces the
//! graph-level invariants: edges only between existing vertices of the same
//! graph, cascade removal of incident edges, and key indices kept in step with
//! every property write.

use super::edge::Edge;
use super::element::Element;
use super::event::{EventBus, GraphEvent, GraphListener};
use super::features::Features;
use super::property::{PropertyMap, PropertyValue};
use super::types::{Direction, EdgeId, ElementKind, Label, VertexId};
use super::vertex::Vertex;
use crate::config::{ConfigError, GraphConfig, StorageKind};
use crate::index::term::terms_of;
use crate::index::{
    Generation, Index, IndexColumn, IndexError, IndexManager, IndexStats, IndexTerm, IndexingService,
    QueryElement,
};
use crate::storage::keys;
use crate::storage::{
    AdjacencyStore, EdgeHeader, ElementTable, KvAdjacencyStore, KvBackend, KvPropertyStore, MemoryBackend,
    PropertyStore, RocksBackend, StorageError, TransactionalBackend, WriteBatch,
};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that can occur during graph operations
#[derive(Error, Debug)]
pub enum GraphError {
    /// Empty or malformed key, label or index name
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("{kind} {id} not found")]
    ElementNotFound { kind: ElementKind, id: u64 },

    #[error("{kind} {id} already exists")]
    DuplicateElement { kind: ElementKind, id: u64 },

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Unsupported property type: {0}")]
    UnsupportedPropertyType(&'static str),

    /// Nested `begin`, or `commit`/`rollback` without an open transaction
    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Index error: {0}")]
    Index(IndexError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<StorageError> for GraphError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::UnsupportedValue(type_name) => GraphError::UnsupportedPropertyType(type_name),
            StorageError::Batch(state) => GraphError::TransactionState(state.to_string()),
            other => GraphError::Storage(other),
        }
    }
}

impl From<IndexError> for GraphError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::IndexNotFound(name) => GraphError::IndexNotFound(name),
            IndexError::UnsupportedValue(type_name) => GraphError::UnsupportedPropertyType(type_name),
            other => GraphError::Index(other),
        }
    }
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Element counts plus per-collection index statistics
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub vertices: usize,
    pub edges: usize,
    pub indices: Vec<(IndexColumn, IndexStats)>,
}

/// Config record present while persisted key-index snapshots may lag storage
const STALE_SNAPSHOTS: &str = "index_snapshots_stale";

/// Keeps persisted key-index snapshots honest across unclean exits.
///
/// The stale record is written before the first key-indexed storage write
/// after an index commit and deleted once the next commit has renamed its
/// snapshots into place. Writers hold `gate` shared for the whole mutation;
/// commits hold it exclusively, so no write falls between a snapshot and the
/// record's removal.
struct SnapshotTracker {
    tracked: bool,
    gate: RwLock<()>,
    stale: Mutex<bool>,
}

/// Shared state behind every [`Graph`] handle
pub(crate) struct GraphCore {
    config: GraphConfig,
    tx: Arc<TransactionalBackend>,
    elements: ElementTable,
    properties: Box<dyn PropertyStore>,
    adjacency: Box<dyn AdjacencyStore>,
    pub(crate) indexing: Arc<IndexManager>,
    events: EventBus,
    features: Features,
    snapshots: SnapshotTracker,
}

pub(crate) fn validate_key(key: &str) -> GraphResult<()> {
    if key.is_empty() {
        return Err(GraphError::Argument("property key must not be empty".to_string()));
    }
    if keys::is_reserved(key) {
        return Err(GraphError::Argument(format!("property key {:?} uses the reserved prefix", key)));
    }
    Ok(())
}

fn validate_label(label: &str) -> GraphResult<()> {
    if label.is_empty() {
        return Err(GraphError::Argument("edge label must not be empty".to_string()));
    }
    if label.contains(keys::RESERVED_PREFIX) {
        return Err(GraphError::Argument(format!("edge label {:?} contains a NUL byte", label)));
    }
    Ok(())
}

pub(crate) fn validate_index_name(name: &str) -> GraphResult<()> {
    if name.trim().is_empty() {
        return Err(GraphError::Argument("index name must not be empty".to_string()));
    }
    Ok(())
}

impl GraphCore {
    fn in_transaction(&self) -> bool {
        self.tx.in_batch()
    }

    fn emit(&self, event: GraphEvent) {
        self.events.emit(event, self.in_transaction());
    }

    fn require(&self, kind: ElementKind, id: u64) -> GraphResult<()> {
        if self.elements.exists(kind, id)? {
            Ok(())
        } else {
            Err(GraphError::ElementNotFound { kind, id })
        }
    }

    /// Element reads and writes go through [`Element`]
    pub(crate) fn property(&self, kind: ElementKind, id: u64, key: &str) -> GraphResult<Option<PropertyValue>> {
        validate_key(key)?;
        Ok(self.properties.get(kind, id, key)?)
    }

    pub(crate) fn set_property(
        &self,
        kind: ElementKind,
        id: u64,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<Option<PropertyValue>> {
        validate_key(key)?;
        value.check_storable().map_err(GraphError::UnsupportedPropertyType)?;
        self.require(kind, id)?;

        let gate = self.key_indexed_write(self.indexing.has_index(IndexColumn::system(kind), key))?;
        let old_value = self.properties.set(kind, id, key, &value)?;
        self.sync_key_index(kind, id, key, Some(&value));
        drop(gate);
        debug!("Set {}.{} on {} {}", key, value.type_name(), kind, id);

        self.emit(GraphEvent::PropertySet {
            kind,
            id,
            key: key.to_string(),
            old_value: old_value.clone(),
            new_value: value,
        });
        Ok(old_value)
    }

    pub(crate) fn remove_property(&self, kind: ElementKind, id: u64, key: &str) -> GraphResult<Option<PropertyValue>> {
        validate_key(key)?;
        let gate = self.key_indexed_write(self.indexing.has_index(IndexColumn::system(kind), key))?;
        let old_value = self.properties.delete(kind, id, key)?;
        if let Some(old_value) = &old_value {
            self.sync_key_index(kind, id, key, None);
            drop(gate);
            self.emit(GraphEvent::PropertyRemoved {
                kind,
                id,
                key: key.to_string(),
                old_value: old_value.clone(),
            });
        }
        Ok(old_value)
    }

    pub(crate) fn property_keys(&self, kind: ElementKind, id: u64) -> GraphResult<Vec<String>> {
        Ok(self.properties.keys(kind, id)?)
    }

    pub(crate) fn properties(&self, kind: ElementKind, id: u64) -> GraphResult<PropertyMap> {
        Ok(self.properties.entries(kind, id)?.into_iter().collect())
    }

    /// Enter a storage write that key indices must follow, marking the
    /// persisted snapshots stale first. Hold the guard until the index is
    /// updated too.
    fn key_indexed_write(&self, indexed: bool) -> GraphResult<Option<RwLockReadGuard<'_, ()>>> {
        if !self.snapshots.tracked || !indexed {
            return Ok(None);
        }
        let gate = self.snapshots.gate.read();
        let mut stale = self.snapshots.stale.lock();
        if !*stale {
            self.tx.put(&keys::config_key(STALE_SNAPSHOTS), &[1])?;
            *stale = true;
        }
        Ok(Some(gate))
    }

    /// Whether the stale record is stored; resyncs the cached flag
    fn load_stale_marker(&self) -> GraphResult<bool> {
        if !self.snapshots.tracked {
            return Ok(false);
        }
        let present = self.tx.get(&keys::config_key(STALE_SNAPSHOTS))?.is_some();
        *self.snapshots.stale.lock() = present;
        Ok(present)
    }

    /// Commit index state; once snapshots are on disk the stale record goes
    fn commit_indices(&self) -> GraphResult<()> {
        if !self.snapshots.tracked {
            self.indexing.commit()?;
            return Ok(());
        }
        let _gate = self.snapshots.gate.write();
        self.indexing.commit()?;
        let mut stale = self.snapshots.stale.lock();
        if *stale && !self.in_transaction() {
            self.tx.delete(&keys::config_key(STALE_SNAPSHOTS))?;
            *stale = false;
        }
        Ok(())
    }

    /// Empty and refill every key index from storage
    fn rebuild_key_indices(&self) -> GraphResult<()> {
        for kind in [ElementKind::Vertex, ElementKind::Edge] {
            let column = IndexColumn::system(kind);
            for key in self.indexing.indices(column) {
                self.indexing.delete_index(column, &key)?;
                self.backfill_key_index(kind, &key)?;
            }
        }
        Ok(())
    }

    /// Mirror a property write into the key index of `key`, if there is one.
    /// Index failures never fail the property write.
    fn sync_key_index(&self, kind: ElementKind, id: u64, key: &str, value: Option<&PropertyValue>) {
        let column = IndexColumn::system(kind);
        if !self.indexing.has_index(column, key) {
            return;
        }
        let result = match value {
            Some(value) => self.indexing.set(column, id, key, key, value),
            None => self.indexing.delete_key(column, id, key, key),
        };
        if let Err(e) = result {
            warn!("Key index {} not updated for {} {}: {}", key, kind, id, e);
        }
    }

    pub(crate) fn vertex_edges(
        &self,
        graph: &Graph,
        vertex: VertexId,
        direction: Direction,
        labels: &[&str],
    ) -> GraphResult<Vec<Edge>> {
        let labels: Vec<Label> = labels.iter().map(|label| Label::new(*label)).collect();
        let records = self.adjacency.edges(vertex, direction, &labels)?;
        Ok(records
            .into_iter()
            .map(|record| {
                let (out_vertex, in_vertex) = match record.direction {
                    Direction::In => (record.neighbor, vertex),
                    _ => (vertex, record.neighbor),
                };
                Edge::new(graph.clone(), record.edge, out_vertex, in_vertex, record.label)
            })
            .collect())
    }

    /// Queue removal of one edge's header, properties and both adjacency records
    fn queue_edge_removal(&self, id: EdgeId, header: &EdgeHeader, batch: &mut WriteBatch) -> GraphResult<()> {
        self.adjacency.remove_edge_record(
            header.out_vertex,
            Direction::Out,
            &header.label,
            id,
            header.in_vertex,
            batch,
        )?;
        self.adjacency.remove_edge_record(
            header.in_vertex,
            Direction::In,
            &header.label,
            id,
            header.out_vertex,
            batch,
        )?;
        self.properties.clear(ElementKind::Edge, id.as_u64(), batch)?;
        self.elements.remove(ElementKind::Edge, id.as_u64(), batch);
        Ok(())
    }

    fn removed_properties(&self, kind: ElementKind, id: u64) -> GraphResult<PropertyMap> {
        if self.events.has_listeners() {
            self.properties(kind, id)
        } else {
            Ok(PropertyMap::new())
        }
    }

    fn forget_documents(&self, kind: ElementKind, id: u64) {
        if let Err(e) = self.indexing.delete_documents(kind, id) {
            warn!("Index entries of {} {} not removed: {}", kind, id, e);
        }
    }

    /// Re-populate the key index `key` of `kind` from stored properties
    fn backfill_key_index(&self, kind: ElementKind, key: &str) -> GraphResult<usize> {
        let column = IndexColumn::system(kind);
        let mut filled = 0;
        for id in self.elements.ids(kind)? {
            if let Some(value) = self.properties.get(kind, id, key)? {
                self.indexing.set(column, id, key, key, &value)?;
                filled += 1;
            }
        }
        debug!("Backfilled key index {} on {} with {} elements", key, kind, filled);
        Ok(filled)
    }

    /// Restore collections the registry knows about and refill key indices
    fn reconcile_indices(&self) -> GraphResult<()> {
        for (column, name) in self.indexing.reconcile()? {
            if !column.is_user() {
                self.backfill_key_index(column.kind(), &name)?;
            }
        }
        Ok(())
    }

    fn flush(&self) -> GraphResult<()> {
        if !self.in_transaction() {
            self.commit_indices()?;
        }
        self.tx.flush()?;
        Ok(())
    }
}

impl Drop for GraphCore {
    fn drop(&mut self) {
        if self.in_transaction() {
            warn!("Graph at {:?} closed with an open transaction; rolling back", self.config.path);
            if let Err(e) = self.tx.rollback() {
                error!("Failed to roll back open transaction: {}", e);
            }
            if let Err(e) = self.indexing.rollback() {
                error!("Failed to roll back index collections: {}", e);
            }
        }
        match self.flush() {
            Ok(()) => info!("Graph at {:?} closed", self.config.path),
            Err(e) => error!("Failed to flush graph at {:?} on close: {}", self.config.path, e),
        }
    }
}

/// A property graph. Cheap to clone; clones share the same instance.
#[derive(Clone)]
pub struct Graph {
    core: Arc<GraphCore>,
}

impl Graph {
    /// Open (or create) a graph as described by `config`
    pub fn open(config: GraphConfig) -> GraphResult<Self> {
        config.validate()?;

        let backend: Arc<dyn KvBackend> = match config.storage {
            StorageKind::Memory => Arc::new(MemoryBackend::new()),
            StorageKind::RocksDb => {
                std::fs::create_dir_all(&config.path).map_err(StorageError::Io)?;
                Arc::new(RocksBackend::open(config.storage_dir())?)
            }
        };

        let tx = Arc::new(TransactionalBackend::new(backend.clone()));
        let store: Arc<dyn KvBackend> = tx.clone();
        let elements = ElementTable::open(store.clone())?;
        let properties: Box<dyn PropertyStore> = Box::new(KvPropertyStore::new(store.clone()));
        let adjacency: Box<dyn AdjacencyStore> = Box::new(KvAdjacencyStore::new(store));
        // The registry bypasses the transaction overlay
        let indexing = Arc::new(IndexManager::open(backend, &config.index, config.index_dir())?);

        let core = GraphCore {
            features: Features::for_storage(config.storage),
            events: EventBus::new(config.events),
            snapshots: SnapshotTracker {
                tracked: config.index_dir().is_some(),
                gate: RwLock::new(()),
                stale: Mutex::new(false),
            },
            config,
            tx,
            elements,
            properties,
            adjacency,
            indexing,
        };
        core.reconcile_indices()?;
        if core.load_stale_marker()? {
            warn!("Index snapshots at {:?} are behind storage; rebuilding key indices", core.config.path);
            core.rebuild_key_indices()?;
        }
        info!("Opened {:?} graph at {:?}", core.config.storage, core.config.path);

        Ok(Self { core: Arc::new(core) })
    }

    /// Fresh in-memory graph
    pub fn memory() -> GraphResult<Self> {
        Self::open(GraphConfig::memory())
    }

    pub(crate) fn core(&self) -> &GraphCore {
        &self.core
    }

    pub(crate) fn from_core(core: Arc<GraphCore>) -> Self {
        Self { core }
    }

    pub(crate) fn downgrade(&self) -> Weak<GraphCore> {
        Arc::downgrade(&self.core)
    }

    /// Whether two handles refer to the same graph instance
    pub fn same_instance(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.core.config
    }

    pub fn features(&self) -> Features {
        self.core.features
    }

    pub fn indexing(&self) -> &Arc<IndexManager> {
        &self.core.indexing
    }

    // ========== Vertices ==========

    /// Add a vertex. `None` assigns the next free id; a supplied id must
    /// not be taken.
    pub fn add_vertex(&self, id: Option<VertexId>) -> GraphResult<Vertex> {
        let core = &self.core;
        let mut batch = WriteBatch::new();
        let id = match id {
            Some(id) => {
                if core.elements.exists(ElementKind::Vertex, id.as_u64())? {
                    return Err(GraphError::DuplicateElement {
                        kind: ElementKind::Vertex,
                        id: id.as_u64(),
                    });
                }
                core.elements.reserve(ElementKind::Vertex, id.as_u64(), &mut batch);
                id
            }
            None => VertexId::new(core.elements.allocate(ElementKind::Vertex, &mut batch)),
        };
        core.elements.insert_vertex(id.as_u64(), &mut batch);
        core.tx.write(batch)?;
        debug!("Added vertex {}", id);

        core.emit(GraphEvent::VertexAdded { id });
        Ok(Vertex::new(self.clone(), id))
    }

    /// Look up a vertex; `None` if it does not exist
    pub fn vertex(&self, id: VertexId) -> GraphResult<Option<Vertex>> {
        if self.core.elements.exists(ElementKind::Vertex, id.as_u64())? {
            Ok(Some(Vertex::new(self.clone(), id)))
        } else {
            Ok(None)
        }
    }

    /// Remove a vertex together with every incident edge.
    ///
    /// Storage cleanup is one batch (edges first, then the vertex); index
    /// cleanup follows and is best-effort.
    pub fn remove_vertex(&self, vertex: &Vertex) -> GraphResult<()> {
        let core = &self.core;
        let id = vertex.id();
        if !vertex.graph().same_instance(self) {
            return Err(GraphError::ElementNotFound {
                kind: ElementKind::Vertex,
                id: id.as_u64(),
            });
        }
        core.require(ElementKind::Vertex, id.as_u64())?;

        // A self-loop shows up in both directions; remove it once
        let incident: BTreeMap<EdgeId, ()> = core
            .adjacency
            .edges(id, Direction::Both, &[])?
            .into_iter()
            .map(|record| (record.edge, ()))
            .collect();

        // Removed ids may be supplied again later; their entries must not outlive a crash
        let gate = core.key_indexed_write(true)?;
        let mut batch = WriteBatch::new();
        let mut removed_edges = Vec::with_capacity(incident.len());
        for edge in incident.keys() {
            let header = match core.elements.edge_header(edge.as_u64())? {
                Some(header) => header,
                None => {
                    warn!("Adjacency of vertex {} lists missing edge {}", id, edge);
                    continue;
                }
            };
            let properties = core.removed_properties(ElementKind::Edge, edge.as_u64())?;
            core.queue_edge_removal(*edge, &header, &mut batch)?;
            removed_edges.push((*edge, header, properties));
        }

        let properties = core.removed_properties(ElementKind::Vertex, id.as_u64())?;
        core.properties.clear(ElementKind::Vertex, id.as_u64(), &mut batch)?;
        core.elements.remove(ElementKind::Vertex, id.as_u64(), &mut batch);
        core.tx.write(batch)?;
        debug!("Removed vertex {} with {} incident edges", id, removed_edges.len());

        for (edge, _, _) in &removed_edges {
            core.forget_documents(ElementKind::Edge, edge.as_u64());
        }
        core.forget_documents(ElementKind::Vertex, id.as_u64());
        drop(gate);

        for (edge, header, properties) in removed_edges {
            core.emit(GraphEvent::EdgeRemoved {
                id: edge,
                out_vertex: header.out_vertex,
                in_vertex: header.in_vertex,
                label: header.label,
                properties,
            });
        }
        core.emit(GraphEvent::VertexRemoved { id, properties });
        Ok(())
    }

    /// Every vertex, ascending by id
    pub fn vertices(&self) -> GraphResult<Vec<Vertex>> {
        Ok(self
            .core
            .elements
            .ids(ElementKind::Vertex)?
            .into_iter()
            .map(|id| Vertex::new(self.clone(), VertexId::new(id)))
            .collect())
    }

    /// Vertices whose `key` property matches `value`; answered by the key
    /// index when `key` has one, by a scan otherwise
    pub fn vertices_by(&self, key: &str, value: impl Into<PropertyValue>) -> GraphResult<Vec<Vertex>> {
        self.lookup(key, &value.into())
    }

    // ========== Edges ==========

    /// Add an edge from `out_vertex` to `in_vertex`. Both endpoints must
    /// exist in this graph.
    pub fn add_edge(&self, id: Option<EdgeId>, out_vertex: &Vertex, in_vertex: &Vertex, label: &str) -> GraphResult<Edge> {
        validate_label(label)?;
        let core = &self.core;
        for endpoint in [out_vertex, in_vertex] {
            if !endpoint.graph().same_instance(self)
                || !core.elements.exists(ElementKind::Vertex, endpoint.id().as_u64())?
            {
                return Err(GraphError::ElementNotFound {
                    kind: ElementKind::Vertex,
                    id: endpoint.id().as_u64(),
                });
            }
        }

        let mut batch = WriteBatch::new();
        let id = match id {
            Some(id) => {
                if core.elements.exists(ElementKind::Edge, id.as_u64())? {
                    return Err(GraphError::DuplicateElement {
                        kind: ElementKind::Edge,
                        id: id.as_u64(),
                    });
                }
                core.elements.reserve(ElementKind::Edge, id.as_u64(), &mut batch);
                id
            }
            None => EdgeId::new(core.elements.allocate(ElementKind::Edge, &mut batch)),
        };

        let header = EdgeHeader {
            out_vertex: out_vertex.id(),
            in_vertex: in_vertex.id(),
            label: Label::new(label),
        };
        core.elements.insert_edge(id.as_u64(), &header, &mut batch)?;
        core.adjacency
            .add_edge_record(header.out_vertex, Direction::Out, &header.label, id, header.in_vertex, &mut batch);
        core.adjacency
            .add_edge_record(header.in_vertex, Direction::In, &header.label, id, header.out_vertex, &mut batch);
        core.tx.write(batch)?;
        debug!("Added edge {} ({} -{}-> {})", id, header.out_vertex, label, header.in_vertex);

        core.emit(GraphEvent::EdgeAdded {
            id,
            out_vertex: header.out_vertex,
            in_vertex: header.in_vertex,
            label: header.label.clone(),
        });
        Ok(Edge::new(self.clone(), id, header.out_vertex, header.in_vertex, header.label))
    }

    /// Look up an edge; `None` if it does not exist
    pub fn edge(&self, id: EdgeId) -> GraphResult<Option<Edge>> {
        Ok(self
            .core
            .elements
            .edge_header(id.as_u64())?
            .map(|header| Edge::new(self.clone(), id, header.out_vertex, header.in_vertex, header.label)))
    }

    pub fn remove_edge(&self, edge: &Edge) -> GraphResult<()> {
        let core = &self.core;
        let id = edge.id();
        let header = match core.elements.edge_header(id.as_u64())? {
            Some(header) if edge.graph().same_instance(self) => header,
            _ => {
                return Err(GraphError::ElementNotFound {
                    kind: ElementKind::Edge,
                    id: id.as_u64(),
                })
            }
        };

        let properties = core.removed_properties(ElementKind::Edge, id.as_u64())?;
        let gate = core.key_indexed_write(true)?;
        let mut batch = WriteBatch::new();
        core.queue_edge_removal(id, &header, &mut batch)?;
        core.tx.write(batch)?;
        debug!("Removed edge {}", id);

        core.forget_documents(ElementKind::Edge, id.as_u64());
        drop(gate);
        core.emit(GraphEvent::EdgeRemoved {
            id,
            out_vertex: header.out_vertex,
            in_vertex: header.in_vertex,
            label: header.label,
            properties,
        });
        Ok(())
    }

    /// Every edge, ascending by id
    pub fn edges(&self) -> GraphResult<Vec<Edge>> {
        Ok(self
            .core
            .elements
            .edge_headers()?
            .into_iter()
            .map(|(id, header)| Edge::new(self.clone(), EdgeId::new(id), header.out_vertex, header.in_vertex, header.label))
            .collect())
    }

    /// Edges whose `key` property matches `value`
    pub fn edges_by(&self, key: &str, value: impl Into<PropertyValue>) -> GraphResult<Vec<Edge>> {
        self.lookup(key, &value.into())
    }

    fn lookup<E: Element>(&self, key: &str, value: &PropertyValue) -> GraphResult<Vec<E>> {
        validate_key(key)?;
        let core = &self.core;
        let column = IndexColumn::system(E::KIND);

        let wanted = IndexTerm::from_value(value);
        if core.indexing.has_index(column, key) {
            core.indexing.wait_for_generation(core.indexing.last_generation());
            if wanted.is_some() {
                let ids = core.indexing.get(column, key, key, value, usize::MAX)?;
                return self.resolve_all(ids);
            }
            if let Some(candidates) = self.structured_candidates(column, key, value)? {
                let mut found = Vec::new();
                for id in candidates {
                    if core.properties.get(E::KIND, id, key)?.as_ref() == Some(value) {
                        found.push(id);
                    }
                }
                return self.resolve_all(found);
            }
            // Nothing in the value is indexable; scan
        }

        let mut found = Vec::new();
        for id in core.elements.ids(E::KIND)? {
            let stored = match core.properties.get(E::KIND, id, key)? {
                Some(stored) => stored,
                None => continue,
            };
            let matches = match &wanted {
                Some(term) => terms_of(key, &stored).0.iter().any(|(k, t)| k == key && t == term),
                None => &stored == value,
            };
            if matches {
                found.push(id);
            }
        }
        self.resolve_all(found)
    }

    /// Ids whose key index holds every term of a list or map `value`.
    /// `None` when the value flattens to no terms at all.
    fn structured_candidates(
        &self,
        column: IndexColumn,
        key: &str,
        value: &PropertyValue,
    ) -> GraphResult<Option<BTreeSet<u64>>> {
        let (terms, _) = terms_of(key, value);
        let mut candidates: Option<BTreeSet<u64>> = None;
        for (indexed, term) in terms {
            let ids: BTreeSet<u64> = self
                .core
                .indexing
                .get(column, key, &indexed, &term.to_value(), usize::MAX)?
                .into_iter()
                .collect();
            candidates = Some(match candidates {
                Some(current) => current.intersection(&ids).copied().collect(),
                None => ids,
            });
            if candidates.as_ref().is_some_and(BTreeSet::is_empty) {
                break;
            }
        }
        Ok(candidates)
    }

    /// Turn index hits into handles, skipping ids removed since indexing
    pub(crate) fn resolve_all<E: Element>(&self, ids: Vec<u64>) -> GraphResult<Vec<E>> {
        let mut elements = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(element) = E::resolve(self, id)? {
                elements.push(element);
            }
        }
        Ok(elements)
    }

    // ========== Key indices ==========

    /// Index `key` on every element of `kind` from now on, filling the index
    /// from existing elements. `false` if it was already indexed.
    pub fn create_key_index(&self, key: &str, kind: ElementKind) -> GraphResult<bool> {
        validate_key(key)?;
        let created = self.core.indexing.create_index(IndexColumn::system(kind), key)?;
        if created {
            self.core.backfill_key_index(kind, key)?;
            info!("Created key index {} on {}", key, kind);
        }
        Ok(created)
    }

    pub fn drop_key_index(&self, key: &str, kind: ElementKind) -> GraphResult<Generation> {
        validate_key(key)?;
        Ok(self.core.indexing.drop_index(IndexColumn::system(kind), key)?)
    }

    pub fn indexed_keys(&self, kind: ElementKind) -> Vec<String> {
        self.core.indexing.indices(IndexColumn::system(kind))
    }

    // ========== User indices ==========

    /// Create the user index `name` over elements of type `E`, or return
    /// the existing one
    pub fn create_index<E: Element>(&self, name: &str) -> GraphResult<Index<E>> {
        validate_index_name(name)?;
        let column = IndexColumn::user(E::KIND);
        self.core.indexing.create_index(column, name)?;
        Ok(Index::new(self.clone(), name, column))
    }

    pub fn index<E: Element>(&self, name: &str) -> Option<Index<E>> {
        let column = IndexColumn::user(E::KIND);
        if self.core.indexing.has_index(column, name) {
            Some(Index::new(self.clone(), name, column))
        } else {
            None
        }
    }

    /// Names of the user indices over `kind`
    pub fn indices(&self, kind: ElementKind) -> Vec<String> {
        self.core.indexing.indices(IndexColumn::user(kind))
    }

    pub fn drop_index(&self, kind: ElementKind, name: &str) -> GraphResult<Generation> {
        validate_index_name(name)?;
        Ok(self.core.indexing.drop_index(IndexColumn::user(kind), name)?)
    }

    // ========== Queries and generations ==========

    /// Conjunctive query over the key indices of `E`. Every element key
    /// must be indexed (or be a sub-key of an indexed map property).
    pub fn query<E: Element>(&self, elements: &[QueryElement], hits: usize) -> GraphResult<Vec<E>> {
        if elements.is_empty() {
            return Err(GraphError::Argument("query needs at least one element".to_string()));
        }
        let indexing = &self.core.indexing;
        indexing.wait_for_generation(indexing.last_generation());
        let ids = indexing.query_keys(E::KIND, elements, hits)?;
        self.resolve_all(ids)
    }

    /// Block until index writes up to `generation` are visible; `false`
    /// when the configured timeout passed first
    pub fn wait_for_generation(&self, generation: Generation) -> bool {
        self.core.indexing.wait_for_generation(generation)
    }

    pub fn last_generation(&self) -> Generation {
        self.core.indexing.last_generation()
    }

    // ========== Transactions ==========

    /// Start buffering writes. Index state is committed first so a later
    /// rollback returns to this point.
    pub fn begin(&self) -> GraphResult<()> {
        let core = &self.core;
        if core.in_transaction() {
            return Err(GraphError::TransactionState("a transaction is already open".to_string()));
        }
        core.commit_indices()?;
        core.tx.begin()?;
        debug!("Transaction started");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.core.in_transaction()
    }

    pub fn commit(&self) -> GraphResult<()> {
        let core = &self.core;
        let ops = core.tx.commit()?;
        core.commit_indices()?;
        core.events.release();
        debug!("Transaction committed ({} ops)", ops);
        Ok(())
    }

    pub fn rollback(&self) -> GraphResult<()> {
        let core = &self.core;
        let ops = core.tx.rollback()?;
        core.events.discard();
        core.indexing.rollback()?;
        core.load_stale_marker()?;
        core.reconcile_indices()?;
        debug!("Transaction rolled back ({} ops)", ops);
        Ok(())
    }

    // ========== Lifecycle ==========

    pub fn add_listener(&self, listener: impl GraphListener + 'static) {
        self.core.events.add(Arc::new(listener));
    }

    /// Persist committed index state and flush the backend
    pub fn flush(&self) -> GraphResult<()> {
        self.core.flush()?;
        info!("Flushed graph at {:?}", self.core.config.path);
        Ok(())
    }

    pub fn stats(&self) -> GraphResult<GraphStats> {
        Ok(GraphStats {
            vertices: self.core.elements.ids(ElementKind::Vertex)?.len(),
            edges: self.core.elements.ids(ElementKind::Edge)?.len(),
            indices: self.core.indexing.stats(),
        })
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("path", &self.core.config.path)
            .field("storage", &self.core.config.storage)
            .finish()
    }
}
