//! Graph factory
//!
//! A RocksDB database can only be opened once per process. [`GraphFactory`]
//! hands out the already-open instance for a path instead of opening it a
//! second time. Build one at startup and pass it to whatever opens graphs.

use crate::config::{GraphConfig, StorageKind};
use crate::graph::store::{Graph, GraphCore, GraphResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Weak;
use tracing::debug;

pub struct GraphFactory {
    defaults: GraphConfig,
    open: Mutex<HashMap<PathBuf, Weak<GraphCore>>>,
}

impl GraphFactory {
    /// Factory whose graphs start from `defaults`; `open` overrides the path
    pub fn new(defaults: GraphConfig) -> Self {
        Self {
            defaults,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Open the RocksDB graph at `path` with the factory defaults
    pub fn open(&self, path: impl AsRef<Path>) -> GraphResult<Graph> {
        let config = GraphConfig {
            path: path.as_ref().to_path_buf(),
            storage: StorageKind::RocksDb,
            ..self.defaults.clone()
        };
        self.open_with(config)
    }

    /// Open a graph described by `config`. Persistent graphs already open
    /// at the same path are shared; the rest of `config` is then ignored.
    pub fn open_with(&self, config: GraphConfig) -> GraphResult<Graph> {
        if config.storage == StorageKind::Memory {
            return Graph::open(config);
        }

        let mut open = self.open.lock();
        open.retain(|_, core| core.strong_count() > 0);
        if let Some(core) = open.get(&config.path).and_then(Weak::upgrade) {
            debug!("Reusing open graph at {:?}", config.path);
            return Ok(Graph::from_core(core));
        }

        let path = config.path.clone();
        let graph = Graph::open(config)?;
        open.insert(path, graph.downgrade());
        Ok(graph)
    }

    /// Fresh in-memory graph with the factory defaults
    pub fn memory(&self) -> GraphResult<Graph> {
        Graph::open(GraphConfig {
            storage: StorageKind::Memory,
            ..self.defaults.clone()
        })
    }

    /// Persistent graphs currently open through this factory
    pub fn open_paths(&self) -> Vec<PathBuf> {
        let open = self.open.lock();
        open.iter()
            .filter(|(_, core)| core.strong_count() > 0)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

impl Default for GraphFactory {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}
