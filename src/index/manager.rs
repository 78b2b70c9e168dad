//! Indexing service
//!
//! Routes index writes and queries to the four collections of a graph,
//! keeps the name registry in step with them, and exposes generation waits
//! and the commit protocol across all four at once.

use super::collection::{CollectionOptions, IndexCollection, IndexStats, MemoryIndexCollection};
use super::generation::{Generation, GenerationClock};
use super::query::QueryElement;
use super::registry::{IndexColumn, IndexRegistry};
use super::{IndexError, IndexResult};
use crate::config::IndexConfig;
use crate::graph::property::PropertyValue;
use crate::graph::types::ElementKind;
use crate::storage::{KvBackend, MemoryBackend};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Index operations the graph depends on
pub trait IndexingService: Send + Sync {
    /// Register and create `name` in `column`; `false` if it already existed
    fn create_index(&self, column: IndexColumn, name: &str) -> IndexResult<bool>;

    /// Unregister `name` and delete its entries
    fn drop_index(&self, column: IndexColumn, name: &str) -> IndexResult<Generation>;

    fn has_index(&self, column: IndexColumn, name: &str) -> bool;

    /// Registered names, as created
    fn indices(&self, column: IndexColumn) -> Vec<String>;

    /// Replace the entries of `id` for `key` in `index`
    fn set(
        &self,
        column: IndexColumn,
        id: u64,
        index: &str,
        key: &str,
        value: &PropertyValue,
    ) -> IndexResult<Generation>;

    /// Remove the entries of `id` for `key` in `index`
    fn delete_key(&self, column: IndexColumn, id: u64, index: &str, key: &str) -> IndexResult<Generation>;

    /// Remove the entries of `id` for `key = value` in `index`
    fn delete_entry(
        &self,
        column: IndexColumn,
        id: u64,
        index: &str,
        key: &str,
        value: &PropertyValue,
    ) -> IndexResult<Generation>;

    /// Remove every entry of `id` from the key and user indices of `kind`
    fn delete_documents(&self, kind: ElementKind, id: u64) -> IndexResult<Generation>;

    /// Remove every entry of one index, keeping it registered
    fn delete_index(&self, column: IndexColumn, name: &str) -> IndexResult<Generation>;

    fn get(
        &self,
        column: IndexColumn,
        index: &str,
        key: &str,
        value: &PropertyValue,
        hits: usize,
    ) -> IndexResult<Vec<u64>>;

    fn count(&self, column: IndexColumn, index: &str, key: &str, value: &PropertyValue) -> IndexResult<usize>;

    /// Conjunctive query against one named index
    fn query(
        &self,
        column: IndexColumn,
        index: &str,
        elements: &[QueryElement],
        hits: usize,
    ) -> IndexResult<Vec<u64>>;

    /// Conjunctive query against the key indices of `kind`; each element is
    /// answered by the key index of its key
    fn query_keys(&self, kind: ElementKind, elements: &[QueryElement], hits: usize) -> IndexResult<Vec<u64>>;

    /// Block until writes up to `generation` are visible in every
    /// collection, bounded by the configured timeout. `false` means the
    /// timeout passed and results may be stale.
    fn wait_for_generation(&self, generation: Generation) -> bool;

    /// Newest generation handed out
    fn last_generation(&self) -> Generation;

    fn prepare(&self) -> IndexResult<()>;

    fn commit(&self) -> IndexResult<()>;

    /// Roll back all four collections; reports every collection that failed
    fn rollback(&self) -> IndexResult<()>;
}

/// [`IndexingService`] over four [`MemoryIndexCollection`]s
pub struct IndexManager {
    registry: IndexRegistry,
    collections: Vec<Box<dyn IndexCollection>>,
    clock: Arc<GenerationClock>,
    wait_timeout: Duration,
    default_hits: usize,
}

impl IndexManager {
    /// Open the service. The registry lives in `registry_backend`; index
    /// snapshots go under `snapshot_dir` when given.
    pub fn open(
        registry_backend: Arc<dyn KvBackend>,
        config: &IndexConfig,
        snapshot_dir: Option<PathBuf>,
    ) -> IndexResult<Self> {
        let clock = Arc::new(GenerationClock::new());
        let options = CollectionOptions {
            refresh: config.refresh,
            snapshot_dir,
        };
        let mut collections: Vec<Box<dyn IndexCollection>> = Vec::with_capacity(IndexColumn::ALL.len());
        for column in IndexColumn::ALL {
            collections.push(Box::new(MemoryIndexCollection::open(
                column.name(),
                clock.clone(),
                options.clone(),
            )?));
        }
        let registry = IndexRegistry::open(registry_backend)?;
        info!(
            "Indexing service opened ({:?}, persisted: {})",
            config.refresh,
            options.snapshot_dir.is_some()
        );
        Ok(Self {
            registry,
            collections,
            clock,
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            default_hits: config.default_hits_limit,
        })
    }

    /// Service with an in-memory registry and immediate refresh
    pub fn in_memory() -> IndexResult<Self> {
        Self::open(Arc::new(MemoryBackend::new()), &IndexConfig::default(), None)
    }

    pub fn collection(&self, column: IndexColumn) -> &dyn IndexCollection {
        self.collections[column.slot()].as_ref()
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    pub fn default_hits(&self) -> usize {
        self.default_hits
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Bring collections in line with the registry: recreate registered
    /// indices a collection lost and drop ones the registry does not know.
    /// Returns the recreated indices, which are empty.
    pub fn reconcile(&self) -> IndexResult<Vec<(IndexColumn, String)>> {
        let mut recreated = Vec::new();
        for column in IndexColumn::ALL {
            let collection = self.collection(column);
            let registered = self.registry.keys(column);
            for name in &registered {
                if collection.create_index(name)? {
                    recreated.push((column, name.clone()));
                }
            }
            for name in collection.get_indices() {
                if !registered.contains(&name) {
                    warn!("Dropping unregistered index {} from {}", name, column);
                    collection.drop_index(&name)?;
                }
            }
        }
        if !recreated.is_empty() {
            info!("Recreated {} indices missing from their collections", recreated.len());
        }
        Ok(recreated)
    }

    pub fn stats(&self) -> Vec<(IndexColumn, IndexStats)> {
        IndexColumn::ALL
            .iter()
            .map(|&column| (column, self.collection(column).stats()))
            .collect()
    }

    /// [`IndexingService::commit`] on the blocking thread pool
    pub async fn commit_async(self: Arc<Self>) -> IndexResult<()> {
        tokio::task::spawn_blocking(move || self.commit())
            .await
            .map_err(|e| IndexError::Task(e.to_string()))?
    }

    /// [`IndexingService::wait_for_generation`] on the blocking thread pool
    pub async fn wait_for_generation_async(self: Arc<Self>, generation: Generation) -> IndexResult<bool> {
        tokio::task::spawn_blocking(move || self.wait_for_generation(generation))
            .await
            .map_err(|e| IndexError::Task(e.to_string()))
    }

    /// Key index answering `key`: the key itself, or the map property it
    /// was expanded from (`address` for `address.city`)
    fn key_index_for(&self, column: IndexColumn, key: &str) -> IndexResult<String> {
        if self.registry.contains(column, key) {
            return Ok(key.to_string());
        }
        let mut prefix = key;
        while let Some(pos) = prefix.rfind('.') {
            prefix = &prefix[..pos];
            if self.registry.contains(column, prefix) {
                return Ok(prefix.to_string());
            }
        }
        Err(IndexError::IndexNotFound(key.to_string()))
    }
}

impl IndexingService for IndexManager {
    fn create_index(&self, column: IndexColumn, name: &str) -> IndexResult<bool> {
        let key = column.normalize(name);
        let registered = self.registry.register(column, name)?;
        let created = match self.collection(column).create_index(&key) {
            Ok(created) => created,
            Err(e) => {
                if registered {
                    self.registry.unregister(column, name)?;
                }
                return Err(e);
            }
        };
        if registered {
            info!("Created index {} in {}", name, column);
        }
        Ok(registered || created)
    }

    fn drop_index(&self, column: IndexColumn, name: &str) -> IndexResult<Generation> {
        if !self.registry.unregister(column, name)? {
            return Err(IndexError::IndexNotFound(name.to_string()));
        }
        let generation = self.collection(column).drop_index(&column.normalize(name))?;
        info!("Dropped index {} in {} at generation {}", name, column, generation);
        Ok(generation)
    }

    fn has_index(&self, column: IndexColumn, name: &str) -> bool {
        self.registry.contains(column, name)
    }

    fn indices(&self, column: IndexColumn) -> Vec<String> {
        self.registry.names(column)
    }

    fn set(
        &self,
        column: IndexColumn,
        id: u64,
        index: &str,
        key: &str,
        value: &PropertyValue,
    ) -> IndexResult<Generation> {
        let generation = self.collection(column).set(id, &column.normalize(index), key, value)?;
        debug!("Indexed {}={} for {} in {}/{} at {}", key, value, id, column, index, generation);
        Ok(generation)
    }

    fn delete_key(&self, column: IndexColumn, id: u64, index: &str, key: &str) -> IndexResult<Generation> {
        self.collection(column).delete_key(id, &column.normalize(index), key)
    }

    fn delete_entry(
        &self,
        column: IndexColumn,
        id: u64,
        index: &str,
        key: &str,
        value: &PropertyValue,
    ) -> IndexResult<Generation> {
        self.collection(column)
            .delete_entry(id, &column.normalize(index), key, value)
    }

    fn delete_documents(&self, kind: ElementKind, id: u64) -> IndexResult<Generation> {
        let system = self.collection(IndexColumn::system(kind)).delete_documents(id)?;
        let user = self.collection(IndexColumn::user(kind)).delete_documents(id)?;
        Ok(system.max(user))
    }

    fn delete_index(&self, column: IndexColumn, name: &str) -> IndexResult<Generation> {
        self.collection(column).delete_index(&column.normalize(name))
    }

    fn get(
        &self,
        column: IndexColumn,
        index: &str,
        key: &str,
        value: &PropertyValue,
        hits: usize,
    ) -> IndexResult<Vec<u64>> {
        self.collection(column)
            .get(&column.normalize(index), key, value, hits)
    }

    fn count(&self, column: IndexColumn, index: &str, key: &str, value: &PropertyValue) -> IndexResult<usize> {
        self.collection(column).count(&column.normalize(index), key, value)
    }

    fn query(
        &self,
        column: IndexColumn,
        index: &str,
        elements: &[QueryElement],
        hits: usize,
    ) -> IndexResult<Vec<u64>> {
        self.collection(column)
            .query(&column.normalize(index), elements, hits)
    }

    fn query_keys(&self, kind: ElementKind, elements: &[QueryElement], hits: usize) -> IndexResult<Vec<u64>> {
        let column = IndexColumn::system(kind);
        let collection = self.collection(column);
        let mut result: Option<BTreeSet<u64>> = None;
        for element in elements {
            let index = self.key_index_for(column, element.key())?;
            let ids: BTreeSet<u64> = collection
                .query(&index, std::slice::from_ref(element), usize::MAX)?
                .into_iter()
                .collect();
            result = Some(match result {
                None => ids,
                Some(acc) => acc.intersection(&ids).copied().collect(),
            });
        }
        Ok(result.unwrap_or_default().into_iter().take(hits).collect())
    }

    fn wait_for_generation(&self, generation: Generation) -> bool {
        let deadline = Instant::now() + self.wait_timeout;
        let mut current = true;
        for collection in &self.collections {
            let remaining = deadline.saturating_duration_since(Instant::now());
            current &= collection.wait_for_generation(generation, remaining);
        }
        if !current {
            warn!(
                "Index generation {} not visible within {:?}; results may be stale",
                generation, self.wait_timeout
            );
        }
        current
    }

    fn last_generation(&self) -> Generation {
        self.clock.current()
    }

    fn prepare(&self) -> IndexResult<()> {
        for collection in &self.collections {
            collection.prepare()?;
        }
        Ok(())
    }

    fn commit(&self) -> IndexResult<()> {
        self.prepare()?;
        for collection in &self.collections {
            collection.commit()?;
        }
        debug!("Committed indexing service at generation {}", self.clock.current());
        Ok(())
    }

    fn rollback(&self) -> IndexResult<()> {
        let mut failed = Vec::new();
        for (column, collection) in IndexColumn::ALL.iter().zip(&self.collections) {
            if let Err(e) = collection.rollback() {
                warn!("Rollback of {} failed: {}", column, e);
                failed.push(column.name().to_string());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(IndexError::Rollback(failed))
        }
    }
}
