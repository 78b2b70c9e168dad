//! Per-element property bags

use super::keys;
use super::{KvBackend, StorageError, StorageResult, WriteBatch};
use crate::graph::property::PropertyValue;
use crate::graph::types::ElementKind;
use std::sync::Arc;

/// Key/value storage scoped to one element id
pub trait PropertyStore: Send + Sync {
    /// Read one property; a missing key is `Ok(None)`
    fn get(&self, kind: ElementKind, id: u64, key: &str) -> StorageResult<Option<PropertyValue>>;

    /// Write one property, returning the value it replaced
    fn set(
        &self,
        kind: ElementKind,
        id: u64,
        key: &str,
        value: &PropertyValue,
    ) -> StorageResult<Option<PropertyValue>>;

    /// Remove one property, returning the previous value
    fn delete(&self, kind: ElementKind, id: u64, key: &str) -> StorageResult<Option<PropertyValue>>;

    /// Keys currently set, excluding reserved bookkeeping keys
    fn keys(&self, kind: ElementKind, id: u64) -> StorageResult<Vec<String>>;

    /// Keys and values currently set, excluding reserved bookkeeping keys
    fn entries(&self, kind: ElementKind, id: u64) -> StorageResult<Vec<(String, PropertyValue)>>;

    /// Queue deletion of every record in the element's namespace, reserved
    /// records included
    fn clear(&self, kind: ElementKind, id: u64, batch: &mut WriteBatch) -> StorageResult<()>;
}

/// [`PropertyStore`] over any ordered key/value backend
pub struct KvPropertyStore {
    backend: Arc<dyn KvBackend>,
}

impl KvPropertyStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    fn decode(bytes: &[u8]) -> StorageResult<PropertyValue> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Visible (non-reserved) records of an element
    fn visible_records(&self, kind: ElementKind, id: u64) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let prefix = keys::element_prefix(kind, id);
        let mut records = Vec::new();
        for (key, value) in self.backend.scan_prefix(&prefix)? {
            let name = &key[prefix.len()..];
            if name.first() == Some(&(keys::RESERVED_PREFIX as u8)) {
                continue;
            }
            let name = std::str::from_utf8(name)
                .map_err(|e| StorageError::Corruption(format!("property key: {}", e)))?;
            records.push((name.to_string(), value));
        }
        Ok(records)
    }
}

impl PropertyStore for KvPropertyStore {
    fn get(&self, kind: ElementKind, id: u64, key: &str) -> StorageResult<Option<PropertyValue>> {
        match self.backend.get(&keys::property_key(kind, id, key))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(
        &self,
        kind: ElementKind,
        id: u64,
        key: &str,
        value: &PropertyValue,
    ) -> StorageResult<Option<PropertyValue>> {
        value.check_storable().map_err(StorageError::UnsupportedValue)?;
        let previous = self.get(kind, id, key)?;
        self.backend
            .put(&keys::property_key(kind, id, key), &bincode::serialize(value)?)?;
        Ok(previous)
    }

    fn delete(&self, kind: ElementKind, id: u64, key: &str) -> StorageResult<Option<PropertyValue>> {
        let previous = self.get(kind, id, key)?;
        if previous.is_some() {
            self.backend.delete(&keys::property_key(kind, id, key))?;
        }
        Ok(previous)
    }

    fn keys(&self, kind: ElementKind, id: u64) -> StorageResult<Vec<String>> {
        Ok(self
            .visible_records(kind, id)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    fn entries(&self, kind: ElementKind, id: u64) -> StorageResult<Vec<(String, PropertyValue)>> {
        self.visible_records(kind, id)?
            .into_iter()
            .map(|(name, bytes)| Ok((name, Self::decode(&bytes)?)))
            .collect()
    }

    fn clear(&self, kind: ElementKind, id: u64, batch: &mut WriteBatch) -> StorageResult<()> {
        for (key, _) in self.backend.scan_prefix(&keys::element_prefix(kind, id))? {
            batch.delete(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::Direction;
    use crate::storage::MemoryBackend;
    use std::collections::HashMap;

    fn store() -> (Arc<dyn KvBackend>, KvPropertyStore) {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        (backend.clone(), KvPropertyStore::new(backend))
    }

    #[test]
    fn test_set_returns_previous() {
        let (_backend, store) = store();
        let v = ElementKind::Vertex;
        assert_eq!(store.set(v, 1, "age", &29i32.into()).unwrap(), None);
        assert_eq!(
            store.set(v, 1, "age", &30i32.into()).unwrap(),
            Some(PropertyValue::Int32(29))
        );
        assert_eq!(store.get(v, 1, "age").unwrap(), Some(PropertyValue::Int32(30)));
    }

    #[test]
    fn test_missing_key_is_none() {
        let (_backend, store) = store();
        assert_eq!(store.get(ElementKind::Edge, 9, "nope").unwrap(), None);
        assert_eq!(store.delete(ElementKind::Edge, 9, "nope").unwrap(), None);
    }

    #[test]
    fn test_round_trip_all_types() {
        let (_backend, store) = store();
        let mut map = HashMap::new();
        map.insert("x".to_string(), PropertyValue::from(1i64));
        let values: Vec<PropertyValue> = vec![
            29i32.into(),
            29i64.into(),
            0.5f64.into(),
            0.5f32.into(),
            true.into(),
            "marko".into(),
            vec![PropertyValue::from(1i64), "a".into()].into(),
            map.into(),
            vec![1u8, 2, 3].into(),
        ];
        for (i, value) in values.iter().enumerate() {
            let key = format!("k{}", i);
            store.set(ElementKind::Edge, 1, &key, value).unwrap();
            assert_eq!(store.get(ElementKind::Edge, 1, &key).unwrap().as_ref(), Some(value));
        }
    }

    #[test]
    fn test_unsupported_value_rejected() {
        let (_backend, store) = store();
        let result = store.set(ElementKind::Vertex, 1, "k", &PropertyValue::Null);
        assert!(matches!(result, Err(StorageError::UnsupportedValue("Null"))));
        assert_eq!(store.get(ElementKind::Vertex, 1, "k").unwrap(), None);
    }

    #[test]
    fn test_keys_hide_reserved_records() {
        let (backend, store) = store();
        store.set(ElementKind::Vertex, 1, "name", &"marko".into()).unwrap();
        backend
            .put(&keys::adjacency_key(1, Direction::Out, "knows", 5), &2u64.to_be_bytes())
            .unwrap();

        assert_eq!(store.keys(ElementKind::Vertex, 1).unwrap(), vec!["name".to_string()]);
        assert_eq!(store.entries(ElementKind::Vertex, 1).unwrap().len(), 1);

        let mut batch = WriteBatch::new();
        store.clear(ElementKind::Vertex, 1, &mut batch).unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_elements_do_not_share_bags() {
        let (_backend, store) = store();
        store.set(ElementKind::Vertex, 1, "name", &"a".into()).unwrap();
        store.set(ElementKind::Edge, 1, "name", &"b".into()).unwrap();
        store.set(ElementKind::Vertex, 2, "name", &"c".into()).unwrap();
        assert_eq!(
            store.get(ElementKind::Vertex, 1, "name").unwrap(),
            Some(PropertyValue::from("a"))
        );
        assert_eq!(store.keys(ElementKind::Vertex, 1).unwrap().len(), 1);
    }
}
