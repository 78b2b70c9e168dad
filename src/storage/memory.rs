//! In-memory ordered key/value backend

use super::{BatchOp, KvBackend, StorageResult, WriteBatch};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Process-lifetime backend over a `BTreeMap`
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, including internal bookkeeping records
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut data = self.data.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    data.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read();
        let range = data.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded));
        Ok(range
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let backend = MemoryBackend::new();
        backend.put(b"k1", b"v1").unwrap();
        assert_eq!(backend.get(b"k1").unwrap(), Some(b"v1".to_vec()));

        backend.delete(b"k1").unwrap();
        assert_eq!(backend.get(b"k1").unwrap(), None);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_scan_prefix_is_ordered_and_bounded() {
        let backend = MemoryBackend::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a/2".to_vec(), b"2".to_vec());
        batch.put(b"a/1".to_vec(), b"1".to_vec());
        batch.put(b"b/1".to_vec(), b"x".to_vec());
        batch.put(b"a".to_vec(), b"root".to_vec());
        backend.write(batch).unwrap();

        let keys: Vec<Vec<u8>> = backend
            .scan_prefix(b"a/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a/1".to_vec(), b"a/2".to_vec()]);
        assert_eq!(backend.len(), 4);
    }
}
