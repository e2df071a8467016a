//! Event infrastructure for persist-core.
//!
//! The orchestrator never calls into rendering code directly: it emits
//! `PersistEvent`s and the UI subscribes. Platform-specific bus implementations:
//! - Native: `Arc<EventBus>` with `RwLock` for multi-threaded Tokio runtime
//! - WASM: `Rc<EventBus>` with `RefCell` for single-threaded browser environment

use serde::Serialize;
use web_time::{SystemTime, UNIX_EPOCH};

use crate::channel::RequestId;
use crate::persistence::{Feature, FileStatus, Operation, SaveTarget, SavingIndicator};

/// Milliseconds since the Unix epoch, as carried by every event.
pub fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PersistEvent {
    /// Source, dirty or busy state changed; re-render.
    StateChanged { status: FileStatus, timestamp: f64 },
    /// Saving indicator for a save target.
    SavingIndicator {
        target: SaveTarget,
        state: SavingIndicator,
        timestamp: f64,
    },
    /// Result of probing an optional feature during bootstrap.
    FeatureAvailable {
        feature: Feature,
        available: bool,
        timestamp: f64,
    },
    /// An operation was refused because another load or save held the busy flag.
    OperationRejected { operation: Operation, timestamp: f64 },
    /// Draft backup written.
    DraftSaved { bytes: usize, timestamp: f64 },
    /// A background save never completed and the busy flag was force-released.
    SafetyTimeout {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        timestamp: f64,
    },
}

// ============================================================================
// Native (multi-threaded) implementation
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod platform {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, RwLock, Weak};

    type Callback = Arc<dyn Fn(PersistEvent) + Send + Sync>;

    /// Shared handle to a bus.
    pub type SharedBus = Arc<EventBus>;

    /// Subscription handle; dropping it unsubscribes.
    pub struct Subscription {
        bus: Weak<EventBus>,
        id: usize,
    }

    impl Drop for Subscription {
        fn drop(&mut self) {
            if let Some(bus) = self.bus.upgrade() {
                bus.unsubscribe(self.id);
            }
        }
    }

    /// Event bus for publishing persistence events to subscribers.
    pub struct EventBus {
        callbacks: RwLock<Vec<(usize, Callback)>>,
        next_id: AtomicUsize,
    }

    impl Default for EventBus {
        fn default() -> Self {
            Self {
                callbacks: RwLock::new(Vec::new()),
                next_id: AtomicUsize::new(0),
            }
        }
    }

    impl EventBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn shared() -> SharedBus {
            Arc::new(Self::new())
        }

        /// Subscribe to events. Requires `self` to be wrapped in `Arc`.
        pub fn subscribe(
            self: &Arc<Self>,
            callback: impl Fn(PersistEvent) + Send + Sync + 'static,
        ) -> Subscription {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.callbacks
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push((id, Arc::new(callback)));
            Subscription {
                bus: Arc::downgrade(self),
                id,
            }
        }

        fn unsubscribe(&self, id: usize) {
            // try_write: Drop may run while `emit` holds the read lock.
            if let Ok(mut guard) = self.callbacks.try_write() {
                guard.retain(|(i, _)| *i != id);
            }
        }

        pub fn emit(&self, event: PersistEvent) {
            let callbacks: Vec<_> = self
                .callbacks
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect();

            for callback in callbacks {
                callback(event.clone());
            }
        }
    }
}

// ============================================================================
// WASM (single-threaded) implementation
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod platform {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::{Rc, Weak};

    type Callback = Rc<dyn Fn(PersistEvent)>;

    /// Shared handle to a bus.
    pub type SharedBus = Rc<EventBus>;

    /// Subscription handle; dropping it unsubscribes.
    pub struct Subscription {
        bus: Weak<EventBus>,
        id: usize,
    }

    impl Drop for Subscription {
        fn drop(&mut self) {
            if let Some(bus) = self.bus.upgrade() {
                bus.unsubscribe(self.id);
            }
        }
    }

    /// Event bus for publishing persistence events to subscribers.
    pub struct EventBus {
        callbacks: RefCell<Vec<(usize, Callback)>>,
        next_id: Cell<usize>,
    }

    impl Default for EventBus {
        fn default() -> Self {
            Self {
                callbacks: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }
        }
    }

    impl EventBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn shared() -> SharedBus {
            Rc::new(Self::new())
        }

        /// Subscribe to events. Requires `self` to be wrapped in `Rc`.
        pub fn subscribe(
            self: &Rc<Self>,
            callback: impl Fn(PersistEvent) + 'static,
        ) -> Subscription {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            self.callbacks.borrow_mut().push((id, Rc::new(callback)));
            Subscription {
                bus: Rc::downgrade(self),
                id,
            }
        }

        fn unsubscribe(&self, id: usize) {
            if let Ok(mut callbacks) = self.callbacks.try_borrow_mut() {
                callbacks.retain(|(i, _)| *i != id);
            }
        }

        pub fn emit(&self, event: PersistEvent) {
            let callbacks: Vec<_> = self
                .callbacks
                .borrow()
                .iter()
                .map(|(_, cb)| Rc::clone(cb))
                .collect();

            for callback in callbacks {
                callback(event.clone());
            }
        }
    }
}

pub use platform::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_arch = "wasm32"))]
    use std::sync::Arc;
    #[cfg(not(target_arch = "wasm32"))]
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rejected() -> PersistEvent {
        PersistEvent::OperationRejected {
            operation: Operation::SaveDirect,
            timestamp: 1000.0,
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = EventBus::shared();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let sub = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });
        bus.emit(rejected());
        drop(sub);
        bus.emit(rejected());

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_subscribe_from_callback_does_not_deadlock() {
        let bus = EventBus::shared();
        let inner_bus = Arc::clone(&bus);
        let held = Arc::new(std::sync::Mutex::new(Vec::new()));
        let held_clone = Arc::clone(&held);

        let _sub = bus.subscribe(move |_| {
            let sub = inner_bus.subscribe(|_| {});
            held_clone.lock().unwrap().push(sub);
        });
        bus.emit(rejected());

        assert_eq!(held.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&rejected()).unwrap();
        assert!(json.contains("\"type\":\"operationRejected\""));
        assert!(json.contains("\"operation\":\"saveDirect\""));
        assert!(json.contains("\"timestamp\":1000"));

        let json = serde_json::to_string(&PersistEvent::SavingIndicator {
            target: SaveTarget::Sandbox,
            state: SavingIndicator::Saving,
            timestamp: 1.0,
        })
        .unwrap();
        assert!(json.contains("\"target\":\"sandbox\""));
        assert!(json.contains("\"state\":\"saving\""));
    }

    #[test]
    fn test_now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000.0);
    }
}
