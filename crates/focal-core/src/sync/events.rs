//! Typed sync event stream
//!
//! Lets the UI react to applied changes without polling engine internals.
//! One misbehaving listener must never break emission to the others, so
//! each callback runs behind a panic guard.

use crate::models::{Booking, StaffUser};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Events emitted by the sync engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    BookingCreated(Booking),
    BookingUpdated(Booking),
    BookingDeleted { id: String },
    UserCreated(StaffUser),
    UserUpdated(StaffUser),
    /// A drain pass finished; counts are for toast/badge rendering
    SyncComplete { processed: usize, failed: usize },
}

impl SyncEvent {
    /// Stable tag for logging and filtering
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BookingCreated(_) => "booking:created",
            Self::BookingUpdated(_) => "booking:updated",
            Self::BookingDeleted { .. } => "booking:deleted",
            Self::UserCreated(_) => "user:created",
            Self::UserUpdated(_) => "user:updated",
            Self::SyncComplete { .. } => "sync-complete",
        }
    }
}

/// Handle returned from `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Listener registry for sync events
#[derive(Default)]
pub struct SyncEventHub {
    listeners: RwLock<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
}

impl SyncEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns a handle for `unsubscribe`
    pub fn subscribe(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener. Returns false when the handle is unknown.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .remove(&id)
            .is_some()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().expect("listener lock poisoned").len()
    }

    /// Deliver `event` to every listener, isolating panics per listener.
    ///
    /// Listeners are snapshotted before invocation so a callback may
    /// subscribe or unsubscribe without deadlocking on the registry lock.
    pub fn emit(&self, event: &SyncEvent) {
        let listeners: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .expect("listener lock poisoned")
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(
                    listener = id.0,
                    event = event.kind(),
                    "Sync event listener panicked"
                );
            }
        }
    }
}
