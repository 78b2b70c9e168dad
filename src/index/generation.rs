//! Index generations and read visibility
//!
//! Every index mutation is stamped with a generation from a [`GenerationClock`]
//! shared by all collections of a graph. Writes land in a collection's working
//! state immediately but only become visible to readers when the collection
//! publishes a new snapshot. [`Visibility`] tracks the newest written and the
//! newest published generation and lets readers block until a given
//! generation has been published, or a timeout passes.

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Position in the index write history
pub type Generation = u64;

/// Shared, monotonically increasing generation source
#[derive(Debug, Default)]
pub struct GenerationClock {
    last: AtomicU64,
}

impl GenerationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next generation
    pub fn next(&self) -> Generation {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Most recently allocated generation
    pub fn current(&self) -> Generation {
        self.last.load(Ordering::SeqCst)
    }
}

/// When working index state is published to readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Publish on demand, inside the wait of the reader that needs it
    Immediate,
    /// A background thread publishes at least every `max_stale_ms`, and
    /// `min_stale_ms` after a reader asks for a newer generation
    Background { min_stale_ms: u64, max_stale_ms: u64 },
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy::Immediate
    }
}

#[derive(Debug, Default)]
struct VisibilityState {
    written: Generation,
    visible: Generation,
    refresh_requested: bool,
    shutdown: bool,
}

impl VisibilityState {
    /// Every write stamped at or below `generation` has been published.
    /// Generations are shared between collections, so one that never saw a
    /// write at `generation` is current once its own writes are published.
    fn is_current(&self, generation: Generation) -> bool {
        self.visible >= generation || self.visible >= self.written
    }
}

/// Written/published generation pair of one collection
#[derive(Debug, Default)]
pub struct Visibility {
    state: Mutex<VisibilityState>,
    changed: Condvar,
}

impl Visibility {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, generation: Generation) {
        let mut state = self.state.lock();
        state.written = state.written.max(generation);
    }

    pub fn publish(&self, generation: Generation) {
        let mut state = self.state.lock();
        state.visible = state.visible.max(generation);
        self.changed.notify_all();
    }

    pub fn written(&self) -> Generation {
        self.state.lock().written
    }

    pub fn visible(&self) -> Generation {
        self.state.lock().visible
    }

    pub fn is_stale(&self) -> bool {
        let state = self.state.lock();
        state.visible < state.written
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.state.lock().is_current(generation)
    }

    /// Block until `generation` is visible or `timeout` passes. Asks the
    /// background refresher for an early publish. Returns `false` on timeout.
    pub fn wait(&self, generation: Generation, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_current(generation) {
            if !state.refresh_requested {
                state.refresh_requested = true;
                self.changed.notify_all();
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.is_current(generation);
            }
        }
        true
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.changed.notify_all();
    }
}

/// Something that can publish its working state
pub trait Refresh: Send + Sync {
    fn refresh(&self);
    fn visibility(&self) -> &Visibility;
}

/// Background publisher for [`RefreshPolicy::Background`]
pub struct Refresher {
    target: Arc<dyn Refresh>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    /// Spawn the refresh thread. The thread holds a weak reference to
    /// `target` and exits when the refresher is dropped.
    pub fn spawn(
        target: Arc<dyn Refresh>,
        name: &str,
        min_stale: Duration,
        max_stale: Duration,
    ) -> std::io::Result<Self> {
        let weak: Weak<dyn Refresh> = Arc::downgrade(&target);
        let handle = std::thread::Builder::new()
            .name(format!("index-refresh-{}", name))
            .spawn(move || Self::run(weak, min_stale, max_stale))?;
        Ok(Self {
            target,
            handle: Some(handle),
        })
    }

    fn run(weak: Weak<dyn Refresh>, min_stale: Duration, max_stale: Duration) {
        loop {
            let Some(target) = weak.upgrade() else {
                return;
            };
            let visibility = target.visibility();
            let mut state = visibility.state.lock();
            if !state.refresh_requested && !state.shutdown {
                visibility.changed.wait_for(&mut state, max_stale);
            }
            let requested = std::mem::take(&mut state.refresh_requested);
            if requested && !min_stale.is_zero() {
                // Let writes racing with the waiter land in the same publish
                let deadline = Instant::now() + min_stale;
                while !state.shutdown && !visibility.changed.wait_until(&mut state, deadline).timed_out() {}
            }
            if state.shutdown {
                return;
            }
            if state.visible >= state.written {
                continue;
            }
            MutexGuard::unlocked(&mut state, || {
                trace!("Background index refresh (requested: {})", requested);
                target.refresh();
            });
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        self.target.visibility().shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("Index refresh thread panicked");
            }
        }
    }
}
