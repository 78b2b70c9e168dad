//! Secondary indexing
//!
//! - [`term`]: flattening property values into index terms
//! - [`property_index`]: B-Tree posting lists for one key
//! - [`collection`]: named indices of one element column, with commit/rollback
//! - [`generation`]: generation clock and read visibility
//! - [`registry`]: persisted index-name lists
//! - [`manager`]: the indexing service routing graph mutations to collections
//! - [`handle`]: typed handle on one user index

pub mod collection;
pub mod generation;
pub mod handle;
pub mod manager;
pub mod property_index;
pub mod query;
pub mod registry;
pub mod term;

pub use collection::{IndexCollection, IndexStats, MemoryIndexCollection};
pub use generation::{Generation, GenerationClock, RefreshPolicy};
pub use handle::Index;
pub use manager::{IndexManager, IndexingService};
pub use property_index::PropertyIndex;
pub use query::{CompareOp, QueryElement};
pub use registry::{IndexColumn, IndexRegistry};
pub use term::{DocumentWriter, IndexTerm, TermDocument};

use thiserror::Error;

/// Index errors
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O error while persisting a snapshot
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Registry record stored in the graph backend failed
    #[error("Registry storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Named index was never created or has been dropped
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Query value cannot be turned into an index term
    #[error("Unsupported value type in index operation: {0}")]
    UnsupportedValue(&'static str),

    /// Blocking index work spawned from async code failed
    #[error("Background task failed: {0}")]
    Task(String),

    /// One or more collections failed to roll back
    #[error("Rollback failed for: {}", .0.join(", "))]
    Rollback(Vec<String>),
}

pub type IndexResult<T> = Result<T, IndexError>;
