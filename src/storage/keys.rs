//! Key layout shared by every store
//!
//! ```text
//! h <kind> <id:u64be>                              element header
//! p <kind> <id:u64be> <property key utf8>          property value
//! p v      <id:u64be> \0adj <dir> <label> \0 <edge:u64be>   adjacency record
//! c <name>                                         config / registry record
//! ```
//!
//! Adjacency records live inside the vertex's property namespace under the
//! reserved `\0` prefix. Property keys starting with that prefix are refused
//! at the API boundary and filtered out of key enumeration, so the two never
//! collide.

use super::{StorageError, StorageResult};
use crate::graph::types::{Direction, ElementKind};

const HEADER_TAG: u8 = b'h';
const PROPERTY_TAG: u8 = b'p';
const CONFIG_TAG: u8 = b'c';

/// Prefix reserved for internal bookkeeping inside a property namespace
pub const RESERVED_PREFIX: char = '\0';

const ADJACENCY_MARKER: &[u8] = b"\0adj";

/// Whether a property key belongs to the internal namespace
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

pub fn header_prefix(kind: ElementKind) -> Vec<u8> {
    vec![HEADER_TAG, kind.tag()]
}

pub fn header_key(kind: ElementKind, id: u64) -> Vec<u8> {
    let mut key = header_prefix(kind);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Prefix covering every property (and, for vertices, adjacency) record of an element
pub fn element_prefix(kind: ElementKind, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.push(PROPERTY_TAG);
    key.push(kind.tag());
    key.extend_from_slice(&id.to_be_bytes());
    key
}

pub fn property_key(kind: ElementKind, id: u64, name: &str) -> Vec<u8> {
    let mut key = element_prefix(kind, id);
    key.extend_from_slice(name.as_bytes());
    key
}

fn direction_byte(direction: Direction) -> u8 {
    match direction {
        Direction::Out => b'o',
        Direction::In => b'i',
        // Callers expand Both before building keys
        Direction::Both => b'b',
    }
}

/// All adjacency records of a vertex in one direction
pub fn adjacency_prefix(vertex: u64, direction: Direction) -> Vec<u8> {
    let mut key = element_prefix(ElementKind::Vertex, vertex);
    key.extend_from_slice(ADJACENCY_MARKER);
    key.push(direction_byte(direction));
    key
}

/// Adjacency records of a vertex in one direction for one label
pub fn adjacency_label_prefix(vertex: u64, direction: Direction, label: &str) -> Vec<u8> {
    let mut key = adjacency_prefix(vertex, direction);
    key.extend_from_slice(label.as_bytes());
    key.push(0);
    key
}

pub fn adjacency_key(vertex: u64, direction: Direction, label: &str, edge: u64) -> Vec<u8> {
    let mut key = adjacency_label_prefix(vertex, direction, label);
    key.extend_from_slice(&edge.to_be_bytes());
    key
}

/// Split an adjacency key produced under `prefix` (from [`adjacency_prefix`])
/// into its label and edge id.
pub fn parse_adjacency_suffix<'a>(key: &'a [u8], prefix: &[u8]) -> StorageResult<(&'a str, u64)> {
    let rest = key
        .strip_prefix(prefix)
        .ok_or_else(|| StorageError::Corruption("adjacency key outside prefix".to_string()))?;
    if rest.len() < 9 {
        return Err(StorageError::Corruption("adjacency key too short".to_string()));
    }
    let (label_part, edge_part) = rest.split_at(rest.len() - 8);
    let label_bytes = label_part
        .strip_suffix(&[0])
        .ok_or_else(|| StorageError::Corruption("adjacency label not terminated".to_string()))?;
    let label = std::str::from_utf8(label_bytes)
        .map_err(|e| StorageError::Corruption(format!("adjacency label: {}", e)))?;
    Ok((label, decode_u64(edge_part)?))
}

pub fn config_key(name: &str) -> Vec<u8> {
    let mut key = vec![CONFIG_TAG];
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn decode_u64(bytes: &[u8]) -> StorageResult<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corruption(format!("expected 8 id bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

/// Id encoded in the last 8 bytes of a header key
pub fn header_id(key: &[u8]) -> StorageResult<u64> {
    if key.len() != 10 {
        return Err(StorageError::Corruption("malformed header key".to_string()));
    }
    decode_u64(&key[2..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_sort_numerically() {
        let a = header_key(ElementKind::Vertex, 2);
        let b = header_key(ElementKind::Vertex, 10);
        assert!(a < b);
        assert_eq!(header_id(&b).unwrap(), 10);
    }

    #[test]
    fn test_adjacency_key_round_trip() {
        let prefix = adjacency_prefix(5, Direction::Out);
        let key = adjacency_key(5, Direction::Out, "knows", 42);
        assert!(key.starts_with(&prefix));
        assert!(key.starts_with(&adjacency_label_prefix(5, Direction::Out, "knows")));

        let (label, edge) = parse_adjacency_suffix(&key, &prefix).unwrap();
        assert_eq!(label, "knows");
        assert_eq!(edge, 42);
    }

    #[test]
    fn test_adjacency_inside_vertex_namespace() {
        let namespace = element_prefix(ElementKind::Vertex, 5);
        let key = adjacency_key(5, Direction::In, "created", 1);
        assert!(key.starts_with(&namespace));
        assert!(is_reserved("\0adj"));
        assert!(!is_reserved("name"));
    }

    #[test]
    fn test_label_prefix_does_not_match_longer_label() {
        let knows = adjacency_label_prefix(1, Direction::Out, "knows");
        let key = adjacency_key(1, Direction::Out, "knows_well", 3);
        assert!(!key.starts_with(&knows));
    }

    #[test]
    fn test_corrupt_suffix_rejected() {
        let prefix = adjacency_prefix(1, Direction::Out);
        let mut key = prefix.clone();
        key.extend_from_slice(b"abc");
        assert!(parse_adjacency_suffix(&key, &prefix).is_err());
    }
}
