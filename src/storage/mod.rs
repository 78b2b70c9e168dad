//! Storage layer
//!
//! Every backend is an ordered key/value store behind [`KvBackend`]. The
//! property store, adjacency store and element table encode their records
//! into one shared keyspace (see [`keys`]), so a single atomic write batch
//! can cover a whole graph mutation.

pub mod adjacency;
pub mod elements;
pub mod keys;
pub mod memory;
pub mod property_store;
pub mod rocks;
pub mod transaction;

pub use adjacency::{AdjacencyRecord, AdjacencyStore, KvAdjacencyStore};
pub use elements::{EdgeHeader, ElementTable};
pub use memory::MemoryBackend;
pub use property_store::{KvPropertyStore, PropertyStore};
pub use rocks::RocksBackend;
pub use transaction::{BatchStateError, TransactionalBackend};

use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB error
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be decoded
    #[error("Corrupt record: {0}")]
    Corruption(String),

    /// Column family error
    #[error("Column family error: {0}")]
    ColumnFamily(String),

    /// Value type the store cannot serialize
    #[error("Unsupported property value type: {0}")]
    UnsupportedValue(&'static str),

    /// Batch opened twice, or committed/rolled back while closed
    #[error("Batch state error: {0}")]
    Batch(#[from] BatchStateError),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A single buffered mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Ordered list of mutations applied atomically by [`KvBackend::write`]
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Ordered key/value store used by every graph backend.
///
/// Implementations must apply a [`WriteBatch`] atomically and return
/// prefix scans in ascending key order.
pub trait KvBackend: Send + Sync {
    /// Read one key
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Apply all operations of `batch`, all or nothing
    fn write(&self, batch: WriteBatch) -> StorageResult<()>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Make previous writes durable
    fn flush(&self) -> StorageResult<()>;

    /// Whether data survives a process restart
    fn is_persistent(&self) -> bool;

    /// Convenience: single put
    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    /// Convenience: single delete
    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch_accumulates() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.delete(b"b".to_vec());

        let mut other = WriteBatch::new();
        other.put(b"c".to_vec(), b"3".to_vec());
        batch.extend(other);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.ops()[1], BatchOp::Delete(b"b".to_vec()));
    }
}
