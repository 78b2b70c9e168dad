//! Graph change events
//!
//! Listeners registered on a graph receive a [`GraphEvent`] after every
//! successful mutation. With [`EventDelivery::OnCommit`] events raised inside
//! a transaction are queued and delivered on commit, or dropped on rollback.

use super::property::{PropertyMap, PropertyValue};
use super::types::{EdgeId, ElementKind, Label, VertexId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    VertexAdded {
        id: VertexId,
    },
    VertexRemoved {
        id: VertexId,
        properties: PropertyMap,
    },
    EdgeAdded {
        id: EdgeId,
        out_vertex: VertexId,
        in_vertex: VertexId,
        label: Label,
    },
    EdgeRemoved {
        id: EdgeId,
        out_vertex: VertexId,
        in_vertex: VertexId,
        label: Label,
        properties: PropertyMap,
    },
    PropertySet {
        kind: ElementKind,
        id: u64,
        key: String,
        old_value: Option<PropertyValue>,
        new_value: PropertyValue,
    },
    PropertyRemoved {
        kind: ElementKind,
        id: u64,
        key: String,
        old_value: PropertyValue,
    },
}

/// Observer of graph mutations
pub trait GraphListener: Send + Sync {
    fn on_event(&self, event: &GraphEvent);
}

impl<F> GraphListener for F
where
    F: Fn(&GraphEvent) + Send + Sync,
{
    fn on_event(&self, event: &GraphEvent) {
        self(event)
    }
}

/// When listeners see events raised inside a transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDelivery {
    /// Right after each mutation
    #[default]
    Immediate,
    /// When the enclosing transaction commits
    OnCommit,
}

/// Listener list owned by a graph
pub(crate) struct EventBus {
    delivery: EventDelivery,
    listeners: RwLock<Vec<Arc<dyn GraphListener>>>,
    queued: Mutex<Vec<GraphEvent>>,
}

impl EventBus {
    pub fn new(delivery: EventDelivery) -> Self {
        Self {
            delivery,
            listeners: RwLock::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn GraphListener>) {
        self.listeners.write().push(listener);
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.read().is_empty()
    }

    pub fn emit(&self, event: GraphEvent, in_transaction: bool) {
        if in_transaction && self.delivery == EventDelivery::OnCommit {
            self.queued.lock().push(event);
            return;
        }
        self.deliver(&event);
    }

    /// Deliver everything queued by the committed transaction
    pub fn release(&self) {
        let queued = std::mem::take(&mut *self.queued.lock());
        for event in &queued {
            self.deliver(event);
        }
    }

    pub fn discard(&self) {
        let dropped = std::mem::take(&mut *self.queued.lock());
        if !dropped.is_empty() {
            trace!("Dropped {} queued events on rollback", dropped.len());
        }
    }

    fn deliver(&self, event: &GraphEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(bus: &EventBus) -> Arc<Mutex<Vec<GraphEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.add(Arc::new(move |event: &GraphEvent| sink.lock().push(event.clone())));
        seen
    }

    #[test]
    fn test_immediate_delivery_ignores_transactions() {
        let bus = EventBus::new(EventDelivery::Immediate);
        let seen = recording(&bus);
        bus.emit(GraphEvent::VertexAdded { id: VertexId::new(1) }, true);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_on_commit_queues_until_release() {
        let bus = EventBus::new(EventDelivery::OnCommit);
        let seen = recording(&bus);
        bus.emit(GraphEvent::VertexAdded { id: VertexId::new(1) }, true);
        bus.emit(GraphEvent::VertexAdded { id: VertexId::new(2) }, true);
        assert!(seen.lock().is_empty());
        bus.release();
        assert_eq!(seen.lock().len(), 2);

        bus.emit(GraphEvent::VertexAdded { id: VertexId::new(3) }, true);
        bus.discard();
        bus.release();
        assert_eq!(seen.lock().len(), 2);

        // Outside a transaction every event is delivered at once
        bus.emit(GraphEvent::VertexAdded { id: VertexId::new(4) }, false);
        assert_eq!(seen.lock().len(), 3);
    }
}
