//! Index collection: the named indices of one element column
//!
//! A collection keeps three views of its data:
//!
//! - the working state, which every mutation updates under the writer lock
//! - the committed state, restored by `rollback` and persisted by `commit`
//! - the visible snapshot, which readers query; it is replaced by a refresh
//!
//! Each mutation returns a generation. A reader that needs to observe a
//! write calls `wait_for_generation` with it before querying.
//!
//! With [`RefreshPolicy::Immediate`] there is no separate snapshot: readers
//! see the working state under the writer lock, and a refresh only advances
//! the published generation. Background refresh publishes a copy that shares
//! every index with the working state, so the first write to an index after
//! each refresh clones that index.

use super::generation::{Generation, GenerationClock, Refresh, RefreshPolicy, Refresher, Visibility};
use super::property_index::PropertyIndex;
use super::query::{self, QueryElement};
use super::term::{terms_of, IndexTerm};
use super::{IndexError, IndexResult};
use crate::graph::property::PropertyValue;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Uniform contract of an index backend
pub trait IndexCollection: Send + Sync {
    /// Register `name`. Returns `false` if it already existed.
    fn create_index(&self, name: &str) -> IndexResult<bool>;

    /// Unregister `name` and delete all of its entries
    fn drop_index(&self, name: &str) -> IndexResult<Generation>;

    fn has_index(&self, name: &str) -> bool;

    fn get_indices(&self) -> Vec<String>;

    /// Upsert the entries of `id` for `key` in `index`; older values of the
    /// same key are replaced
    fn set(&self, id: u64, index: &str, key: &str, value: &PropertyValue) -> IndexResult<Generation>;

    /// Remove all entries of `id` for `key` in `index`
    fn delete_key(&self, id: u64, index: &str, key: &str) -> IndexResult<Generation>;

    /// Remove the entries of `id` for exactly `key = value` in `index`
    fn delete_entry(&self, id: u64, index: &str, key: &str, value: &PropertyValue) -> IndexResult<Generation>;

    /// Remove every entry referencing `id`, in every index
    fn delete_documents(&self, id: u64) -> IndexResult<Generation>;

    /// Remove every entry of `index`, keeping it registered
    fn delete_index(&self, index: &str) -> IndexResult<Generation>;

    /// Ids with `key = value` in the visible snapshot, at most `hits`
    fn get(&self, index: &str, key: &str, value: &PropertyValue, hits: usize) -> IndexResult<Vec<u64>>;

    /// Number of ids with `key = value` in the visible snapshot
    fn count(&self, index: &str, key: &str, value: &PropertyValue) -> IndexResult<usize>;

    /// Ids matching every element, at most `hits`
    fn query(&self, index: &str, elements: &[QueryElement], hits: usize) -> IndexResult<Vec<u64>>;

    /// Block until writes up to `generation` are visible. Returns `false`
    /// when the timeout passed first; results may then be stale.
    fn wait_for_generation(&self, generation: Generation, timeout: Duration) -> bool;

    /// Generation of the newest write to this collection
    fn last_generation(&self) -> Generation;

    /// Stage the working state for commit
    fn prepare(&self) -> IndexResult<()>;

    /// Make the working state the committed state
    fn commit(&self) -> IndexResult<()>;

    /// Revert the working state to the last commit
    fn rollback(&self) -> IndexResult<()>;

    fn stats(&self) -> IndexStats;
}

/// Per-collection counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub indices: usize,
    pub entries: usize,
    /// Values (or parts of values) the document writer refused
    pub skipped_writes: u64,
    pub visible_generation: Generation,
}

type DocumentTerms = Vec<(String, IndexTerm)>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NamedIndex {
    /// Indexed key (dotted for map entries) -> postings
    keys: BTreeMap<String, PropertyIndex>,
    /// id -> source property key -> terms written for it
    documents: FxHashMap<u64, BTreeMap<String, DocumentTerms>>,
}

impl NamedIndex {
    fn unpost(&mut self, id: u64, terms: &[(String, IndexTerm)]) {
        for (key, term) in terms {
            if let Some(postings) = self.keys.get_mut(key) {
                postings.remove(term, id);
                if postings.is_empty() {
                    self.keys.remove(key);
                }
            }
        }
    }

    fn set(&mut self, id: u64, key: &str, terms: DocumentTerms) {
        self.delete_key(id, key);
        if terms.is_empty() {
            return;
        }
        for (indexed, term) in &terms {
            self.keys.entry(indexed.clone()).or_default().insert(term.clone(), id);
        }
        self.documents.entry(id).or_default().insert(key.to_string(), terms);
    }

    fn delete_key(&mut self, id: u64, key: &str) {
        let Some(document) = self.documents.get_mut(&id) else {
            return;
        };
        let Some(old) = document.remove(key) else {
            return;
        };
        if document.is_empty() {
            self.documents.remove(&id);
        }
        self.unpost(id, &old);
    }

    fn delete_entry(&mut self, id: u64, key: &str, terms: &[(String, IndexTerm)]) {
        let Some(document) = self.documents.get_mut(&id) else {
            return;
        };
        let Some(stored) = document.get_mut(key) else {
            return;
        };
        let (removed, kept): (DocumentTerms, DocumentTerms) =
            stored.drain(..).partition(|entry| terms.contains(entry));
        *stored = kept;
        if stored.is_empty() {
            document.remove(key);
        }
        if document.is_empty() {
            self.documents.remove(&id);
        }
        self.unpost(id, &removed);
    }

    fn delete_document(&mut self, id: u64) {
        if let Some(document) = self.documents.remove(&id) {
            for terms in document.values() {
                self.unpost(id, terms);
            }
        }
    }

    fn entries(&self) -> usize {
        self.keys.values().map(PropertyIndex::len).sum()
    }
}

/// Index name -> index. Indices are shared copy-on-write between the
/// working, committed and visible states.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexData {
    indices: BTreeMap<String, Arc<NamedIndex>>,
}

impl IndexData {
    fn index(&self, name: &str) -> IndexResult<&NamedIndex> {
        self.indices
            .get(name)
            .map(Arc::as_ref)
            .ok_or_else(|| IndexError::IndexNotFound(name.to_string()))
    }

    fn index_mut(&mut self, name: &str) -> IndexResult<&mut NamedIndex> {
        self.indices
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| IndexError::IndexNotFound(name.to_string()))
    }

    fn load(path: &Path) -> IndexResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }

    fn save(&self, path: &Path) -> IndexResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

struct WriterState {
    working: IndexData,
    committed: IndexData,
    /// Working state changed since the last commit
    dirty: bool,
    /// Working state already written to the staging file
    prepared: bool,
}

struct CollectionInner {
    column: String,
    clock: Arc<GenerationClock>,
    writer: Mutex<WriterState>,
    /// Readers use the working state directly instead of `visible`.
    /// With immediate refresh every read publishes first anyway, and a
    /// published copy would make the next write clone the index it touches.
    live_reads: bool,
    visible: RwLock<Arc<IndexData>>,
    visibility: Visibility,
    skipped_writes: AtomicU64,
    snapshot: Option<PathBuf>,
}

impl CollectionInner {
    fn new(
        column: &str,
        clock: Arc<GenerationClock>,
        data: IndexData,
        snapshot: Option<PathBuf>,
        refresh: RefreshPolicy,
    ) -> Arc<Self> {
        let live_reads = matches!(refresh, RefreshPolicy::Immediate);
        let visible = if live_reads { IndexData::default() } else { data.clone() };
        Arc::new(Self {
            column: column.to_string(),
            clock,
            live_reads,
            writer: Mutex::new(WriterState {
                working: data.clone(),
                committed: data,
                dirty: false,
                prepared: false,
            }),
            visible: RwLock::new(Arc::new(visible)),
            visibility: Visibility::new(),
            skipped_writes: AtomicU64::new(0),
            snapshot,
        })
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut IndexData) -> IndexResult<T>) -> IndexResult<(T, Generation)> {
        let mut writer = self.writer.lock();
        let value = f(&mut writer.working)?;
        writer.dirty = true;
        writer.prepared = false;
        let generation = self.clock.next();
        self.visibility.record_write(generation);
        Ok((value, generation))
    }

    fn staging_path(path: &Path) -> PathBuf {
        path.with_extension("bin.tmp")
    }

    fn is_registered(&self, index: &str) -> IndexResult<()> {
        if self.writer.lock().working.indices.contains_key(index) {
            Ok(())
        } else {
            Err(IndexError::IndexNotFound(index.to_string()))
        }
    }

    /// Read from the visible snapshot, or the working state with live reads.
    /// Indices registered but not yet published read as empty.
    fn read<T: Default>(&self, index: &str, f: impl FnOnce(&NamedIndex) -> IndexResult<T>) -> IndexResult<T> {
        if self.live_reads {
            let writer = self.writer.lock();
            return f(writer.working.index(index)?);
        }
        self.is_registered(index)?;
        let snapshot = self.visible.read().clone();
        match snapshot.index(index) {
            Ok(named) => f(named),
            Err(_) => Ok(T::default()),
        }
    }
}

impl Refresh for CollectionInner {
    fn refresh(&self) {
        let writer = self.writer.lock();
        let generation = self.visibility.written();
        if !self.live_reads {
            // Shares every index with the working state; the next write to
            // an index clones it once
            *self.visible.write() = Arc::new(writer.working.clone());
        }
        drop(writer);
        self.visibility.publish(generation);
        debug!("Refreshed index column {} to generation {}", self.column, generation);
    }

    fn visibility(&self) -> &Visibility {
        &self.visibility
    }
}

/// Options of one [`MemoryIndexCollection`]
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    pub refresh: RefreshPolicy,
    /// Directory holding `<column>.bin`; `None` keeps the collection in memory only
    pub snapshot_dir: Option<PathBuf>,
}

/// In-memory [`IndexCollection`] with optional snapshot persistence
pub struct MemoryIndexCollection {
    inner: Arc<CollectionInner>,
    refresh: RefreshPolicy,
    _refresher: Option<Refresher>,
}

impl MemoryIndexCollection {
    /// Open the collection for `column`, loading its last committed snapshot
    pub fn open(column: &str, clock: Arc<GenerationClock>, options: CollectionOptions) -> IndexResult<Self> {
        let snapshot = options
            .snapshot_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.bin", column)));
        let data = match &snapshot {
            Some(path) if path.exists() => {
                let data = IndexData::load(path)?;
                info!(
                    "Loaded index column {} with {} indices from {:?}",
                    column,
                    data.indices.len(),
                    path
                );
                data
            }
            _ => IndexData::default(),
        };

        let inner = CollectionInner::new(column, clock, data, snapshot, options.refresh);

        let refresher = match options.refresh {
            RefreshPolicy::Immediate => None,
            RefreshPolicy::Background {
                min_stale_ms,
                max_stale_ms,
            } => Some(Refresher::spawn(
                inner.clone(),
                column,
                Duration::from_millis(min_stale_ms),
                Duration::from_millis(max_stale_ms.max(1)),
            )?),
        };

        Ok(Self {
            inner,
            refresh: options.refresh,
            _refresher: refresher,
        })
    }

    /// In-memory collection with immediate refresh
    pub fn in_memory(column: &str, clock: Arc<GenerationClock>) -> Self {
        Self {
            inner: CollectionInner::new(column, clock, IndexData::default(), None, RefreshPolicy::Immediate),
            refresh: RefreshPolicy::Immediate,
            _refresher: None,
        }
    }

    pub fn column(&self) -> &str {
        &self.inner.column
    }
}

impl IndexCollection for MemoryIndexCollection {
    fn create_index(&self, name: &str) -> IndexResult<bool> {
        if self.has_index(name) {
            return Ok(false);
        }
        let (created, _) = self.inner.mutate(|data| {
            if data.indices.contains_key(name) {
                return Ok(false);
            }
            data.indices.insert(name.to_string(), Arc::new(NamedIndex::default()));
            Ok(true)
        })?;
        if created {
            debug!("Created index {} in column {}", name, self.inner.column);
        }
        Ok(created)
    }

    fn drop_index(&self, name: &str) -> IndexResult<Generation> {
        let (_, generation) = self.inner.mutate(|data| {
            data.indices
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| IndexError::IndexNotFound(name.to_string()))
        })?;
        debug!("Dropped index {} in column {}", name, self.inner.column);
        Ok(generation)
    }

    fn has_index(&self, name: &str) -> bool {
        self.inner.writer.lock().working.indices.contains_key(name)
    }

    fn get_indices(&self) -> Vec<String> {
        self.inner.writer.lock().working.indices.keys().cloned().collect()
    }

    fn set(&self, id: u64, index: &str, key: &str, value: &PropertyValue) -> IndexResult<Generation> {
        let (terms, complete) = terms_of(key, value);
        if !complete {
            self.inner.skipped_writes.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Index {} skipped part of {}={} ({}) for id {}",
                index,
                key,
                value,
                value.type_name(),
                id
            );
        }
        let (_, generation) = self.inner.mutate(|data| {
            data.index_mut(index)?.set(id, key, terms);
            Ok(())
        })?;
        Ok(generation)
    }

    fn delete_key(&self, id: u64, index: &str, key: &str) -> IndexResult<Generation> {
        let (_, generation) = self.inner.mutate(|data| {
            data.index_mut(index)?.delete_key(id, key);
            Ok(())
        })?;
        Ok(generation)
    }

    fn delete_entry(&self, id: u64, index: &str, key: &str, value: &PropertyValue) -> IndexResult<Generation> {
        let (terms, _) = terms_of(key, value);
        let (_, generation) = self.inner.mutate(|data| {
            data.index_mut(index)?.delete_entry(id, key, &terms);
            Ok(())
        })?;
        Ok(generation)
    }

    fn delete_documents(&self, id: u64) -> IndexResult<Generation> {
        let (_, generation) = self.inner.mutate(|data| {
            for named in data.indices.values_mut() {
                if named.documents.contains_key(&id) {
                    Arc::make_mut(named).delete_document(id);
                }
            }
            Ok(())
        })?;
        Ok(generation)
    }

    fn delete_index(&self, index: &str) -> IndexResult<Generation> {
        let (_, generation) = self.inner.mutate(|data| {
            *data.index_mut(index)? = NamedIndex::default();
            Ok(())
        })?;
        Ok(generation)
    }

    fn get(&self, index: &str, key: &str, value: &PropertyValue, hits: usize) -> IndexResult<Vec<u64>> {
        self.query(index, &[QueryElement::eq(key, value.clone())], hits)
    }

    fn count(&self, index: &str, key: &str, value: &PropertyValue) -> IndexResult<usize> {
        let term = IndexTerm::from_value(value).ok_or(IndexError::UnsupportedValue(value.type_name()))?;
        self.inner
            .read(index, |named| Ok(named.keys.get(key).map_or(0, |p| p.count(&term))))
    }

    fn query(&self, index: &str, elements: &[QueryElement], hits: usize) -> IndexResult<Vec<u64>> {
        self.inner
            .read(index, |named| query::conjunction(elements, |key| named.keys.get(key), hits))
    }

    fn wait_for_generation(&self, generation: Generation, timeout: Duration) -> bool {
        match self.refresh {
            RefreshPolicy::Immediate => {
                if !self.inner.visibility.is_current(generation) {
                    self.inner.refresh();
                }
                true
            }
            RefreshPolicy::Background { .. } => self.inner.visibility.wait(generation, timeout),
        }
    }

    fn last_generation(&self) -> Generation {
        self.inner.visibility.written()
    }

    fn prepare(&self) -> IndexResult<()> {
        let mut writer = self.inner.writer.lock();
        if let Some(path) = &self.inner.snapshot {
            if writer.dirty && !writer.prepared {
                writer.working.save(&CollectionInner::staging_path(path))?;
                writer.prepared = true;
            }
        }
        Ok(())
    }

    fn commit(&self) -> IndexResult<()> {
        let mut writer = self.inner.writer.lock();
        if !writer.dirty {
            return Ok(());
        }
        if let Some(path) = &self.inner.snapshot {
            let staging = CollectionInner::staging_path(path);
            if !writer.prepared {
                writer.working.save(&staging)?;
            }
            std::fs::rename(&staging, path)?;
        }
        writer.committed = writer.working.clone();
        writer.dirty = false;
        writer.prepared = false;
        debug!("Committed index column {}", self.inner.column);
        Ok(())
    }

    fn rollback(&self) -> IndexResult<()> {
        let mut writer = self.inner.writer.lock();
        if let (Some(path), true) = (&self.inner.snapshot, writer.prepared) {
            match std::fs::remove_file(CollectionInner::staging_path(path)) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        if writer.dirty {
            writer.working = writer.committed.clone();
            writer.dirty = false;
            writer.prepared = false;
            let generation = self.inner.clock.next();
            self.inner.visibility.record_write(generation);
            debug!(
                "Rolled back index column {} (generation {})",
                self.inner.column, generation
            );
        }
        Ok(())
    }

    fn stats(&self) -> IndexStats {
        let writer = self.inner.writer.lock();
        IndexStats {
            indices: writer.working.indices.len(),
            entries: writer.working.indices.values().map(|named| named.entries()).sum(),
            skipped_writes: self.inner.skipped_writes.load(Ordering::Relaxed),
            visible_generation: self.inner.visibility.visible(),
        }
    }
}
