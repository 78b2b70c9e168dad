//! Write buffering for graph transactions
//!
//! [`TransactionalBackend`] wraps any [`KvBackend`]. While a batch is open,
//! writes land in an overlay that reads consult first; `commit` hands the
//! overlay to the inner backend as one atomic write batch and `rollback`
//! drops it. Only one batch may be open at a time.

use super::{BatchOp, KvBackend, StorageError, StorageResult, WriteBatch};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Misuse of the batch lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchStateError {
    #[error("a batch is already open")]
    AlreadyOpen,

    #[error("no batch is open")]
    NotOpen,
}

type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Backend wrapper adding an optional write overlay
pub struct TransactionalBackend {
    inner: Arc<dyn KvBackend>,
    overlay: Mutex<Option<Overlay>>,
}

impl TransactionalBackend {
    pub fn new(inner: Arc<dyn KvBackend>) -> Self {
        Self {
            inner,
            overlay: Mutex::new(None),
        }
    }

    /// Open a batch; writes are buffered until `commit`
    pub fn begin(&self) -> StorageResult<()> {
        let mut overlay = self.overlay.lock();
        if overlay.is_some() {
            return Err(BatchStateError::AlreadyOpen.into());
        }
        *overlay = Some(Overlay::new());
        debug!("Opened storage batch");
        Ok(())
    }

    pub fn in_batch(&self) -> bool {
        self.overlay.lock().is_some()
    }

    /// Flush the open batch to the inner backend.
    ///
    /// The overlay is only discarded once the inner write succeeded, so a
    /// failed commit can still be rolled back.
    pub fn commit(&self) -> StorageResult<usize> {
        let mut guard = self.overlay.lock();
        let overlay = guard.as_ref().ok_or(StorageError::Batch(BatchStateError::NotOpen))?;
        let mut batch = WriteBatch::new();
        for (key, value) in overlay {
            match value {
                Some(value) => batch.put(key.clone(), value.clone()),
                None => batch.delete(key.clone()),
            }
        }
        let count = batch.len();
        self.inner.write(batch)?;
        *guard = None;
        debug!("Committed storage batch with {} ops", count);
        Ok(count)
    }

    /// Discard the open batch
    pub fn rollback(&self) -> StorageResult<usize> {
        let dropped = self.overlay.lock().take().ok_or(StorageError::Batch(BatchStateError::NotOpen))?;
        debug!("Rolled back storage batch with {} ops", dropped.len());
        Ok(dropped.len())
    }

    pub fn inner(&self) -> &Arc<dyn KvBackend> {
        &self.inner
    }
}

impl KvBackend for TransactionalBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if let Some(overlay) = self.overlay.lock().as_ref() {
            if let Some(value) = overlay.get(key) {
                return Ok(value.clone());
            }
        }
        self.inner.get(key)
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut guard = self.overlay.lock();
        match guard.as_mut() {
            Some(overlay) => {
                for op in batch.into_ops() {
                    match op {
                        BatchOp::Put(key, value) => {
                            overlay.insert(key, Some(value));
                        }
                        BatchOp::Delete(key) => {
                            overlay.insert(key, None);
                        }
                    }
                }
                Ok(())
            }
            None => {
                drop(guard);
                self.inner.write(batch)
            }
        }
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        // Held across the inner scan so a concurrent commit lands entirely
        // before or after it
        let guard = self.overlay.lock();
        let base = self.inner.scan_prefix(prefix)?;
        let overlay = match guard.as_ref() {
            Some(overlay) if !overlay.is_empty() => overlay,
            _ => return Ok(base),
        };

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = base.into_iter().collect();
        for (key, value) in overlay.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn is_persistent(&self) -> bool {
        self.inner.is_persistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn backend() -> (Arc<MemoryBackend>, TransactionalBackend) {
        let inner = Arc::new(MemoryBackend::new());
        let tx = TransactionalBackend::new(inner.clone());
        (inner, tx)
    }

    #[test]
    fn test_writes_pass_through_without_batch() {
        let (inner, tx) = backend();
        tx.put(b"a", b"1").unwrap();
        assert_eq!(inner.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_overlay_visible_then_committed() {
        let (inner, tx) = backend();
        inner.put(b"k/old", b"x").unwrap();

        tx.begin().unwrap();
        tx.put(b"k/new", b"y").unwrap();
        tx.delete(b"k/old").unwrap();

        // Reads through the wrapper see the overlay, the inner store does not
        assert_eq!(tx.get(b"k/new").unwrap(), Some(b"y".to_vec()));
        assert_eq!(tx.get(b"k/old").unwrap(), None);
        assert_eq!(inner.get(b"k/new").unwrap(), None);

        let scanned = tx.scan_prefix(b"k/").unwrap();
        assert_eq!(scanned, vec![(b"k/new".to_vec(), b"y".to_vec())]);

        assert_eq!(tx.commit().unwrap(), 2);
        assert_eq!(inner.get(b"k/new").unwrap(), Some(b"y".to_vec()));
        assert_eq!(inner.get(b"k/old").unwrap(), None);
        assert!(!tx.in_batch());
    }

    #[test]
    fn test_rollback_discards() {
        let (inner, tx) = backend();
        tx.begin().unwrap();
        tx.put(b"a", b"1").unwrap();
        assert_eq!(tx.rollback().unwrap(), 1);
        assert_eq!(inner.get(b"a").unwrap(), None);
        assert_eq!(tx.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_batch_state_errors() {
        let (_inner, tx) = backend();
        assert!(matches!(
            tx.rollback(),
            Err(StorageError::Batch(BatchStateError::NotOpen))
        ));
        assert!(matches!(
            tx.commit(),
            Err(StorageError::Batch(BatchStateError::NotOpen))
        ));
        tx.begin().unwrap();
        assert!(matches!(
            tx.begin(),
            Err(StorageError::Batch(BatchStateError::AlreadyOpen))
        ));
    }

    #[test]
    fn test_scan_never_loses_rows_during_commit() {
        let (_inner, tx) = backend();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0u32..200 {
                    tx.begin().unwrap();
                    tx.put(format!("row/{:04}", round).as_bytes(), b"x").unwrap();
                    tx.commit().unwrap();
                }
            });
            scope.spawn(|| {
                let mut seen = 0;
                for _ in 0..2000 {
                    let rows = tx.scan_prefix(b"row/").unwrap().len();
                    assert!(rows >= seen, "scan went from {} to {} rows", seen, rows);
                    seen = rows;
                }
            });
        });
        assert_eq!(tx.scan_prefix(b"row/").unwrap().len(), 200);
    }
}
