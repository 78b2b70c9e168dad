//! RocksDB backend
//!
//! Embedded page-store backend. All graph records live in one column family
//! so a graph mutation maps to a single RocksDB write batch.

use super::{BatchOp, KvBackend, StorageError, StorageResult, WriteBatch};
use rocksdb::{ColumnFamilyDescriptor, Direction as IterDirection, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const GRAPH_CF: &str = "graph";

/// RocksDB-based persistent backend
pub struct RocksBackend {
    /// RocksDB instance
    db: Arc<DB>,
    /// Storage path, kept for log messages
    path: String,
}

impl RocksBackend {
    /// Open or create a backend at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path_str = path.as_ref().to_string_lossy().into_owned();

        info!("Opening RocksDB backend at: {}", path_str);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        opts.set_write_buffer_size(64 * 1024 * 1024); // 64 MB
        opts.set_max_write_buffer_number(3);
        opts.set_min_write_buffer_number_to_merge(1);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::PointInTime);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(GRAPH_CF, Self::graph_cf_options()),
        ];

        let db = DB::open_cf_descriptors(&opts, &path_str, cf_descriptors)?;

        info!("RocksDB backend opened successfully");

        Ok(Self {
            db: Arc::new(db),
            path: path_str,
        })
    }

    fn graph_cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf(&self) -> StorageResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(GRAPH_CF)
            .ok_or_else(|| StorageError::ColumnFamily(GRAPH_CF.to_string()))
    }
}

impl KvBackend for RocksBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let cf = self.cf()?;
        Ok(self.db.get_cf(cf, key)?)
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let cf = self.cf()?;
        let count = batch.len();
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => rocks_batch.put_cf(cf, key, value),
                BatchOp::Delete(key) => rocks_batch.delete_cf(cf, key),
            }
        }
        self.db.write(rocks_batch)?;
        debug!("Wrote batch of {} ops to {}", count, self.path);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf()?;
        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, IterDirection::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn flush(&self) -> StorageResult<()> {
        let cf = self.cf()?;
        self.db.flush_cf(cf)?;
        debug!("Flushed {} to disk", self.path);
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        true
    }
}
