//! Capability flags of a graph backend

use crate::config::StorageKind;
use serde::Serialize;

/// What a graph supports. Fixed per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Features {
    /// Several edges with the same label between the same ordered pair
    pub supports_duplicate_edges: bool,
    pub supports_self_loops: bool,
    /// `begin`/`commit`/`rollback` buffer writes
    pub supports_transactions: bool,
    /// Data survives a restart
    pub is_persistent: bool,
    /// Automatically maintained key indices
    pub supports_key_indices: bool,
    /// Named, manually maintained indices
    pub supports_indices: bool,
    pub supports_vertex_properties: bool,
    pub supports_edge_properties: bool,
    /// Caller-supplied ids are honoured
    pub ignores_supplied_ids: bool,
}

impl Features {
    pub fn for_storage(storage: StorageKind) -> Self {
        Self {
            supports_duplicate_edges: true,
            supports_self_loops: true,
            supports_transactions: true,
            is_persistent: storage == StorageKind::RocksDb,
            supports_key_indices: true,
            supports_indices: true,
            supports_vertex_properties: true,
            supports_edge_properties: true,
            ignores_supplied_ids: false,
        }
    }
}
