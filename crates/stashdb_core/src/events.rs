//! Change notification bus.
//!
//! Every [`Store`](crate::Store) owns one [`EventBus`]. Mutations publish a
//! [`StoreEvent::Change`] after they succeed and a [`StoreEvent::Error`]
//! when they fail. Delivery is synchronous, in registration order, with no
//! buffering or replay: a listener only sees events published while it is
//! registered.

use crate::error::CoreError;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// The two event channels of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A mutation succeeded.
    Change,
    /// An operation failed.
    Error,
}

/// What a successful mutation did.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A record was inserted.
    Add {
        /// Record key.
        key: String,
        /// Stored value.
        value: Value,
    },
    /// A record was inserted or replaced.
    Upsert {
        /// Record key.
        key: String,
        /// Stored value.
        value: Value,
    },
    /// A record was merged with a partial value.
    Update {
        /// Record key.
        key: String,
    },
    /// A record was removed (or was already absent).
    Delete {
        /// Record key.
        key: String,
    },
    /// Every record was removed.
    Clear,
    /// The collection was dropped.
    Destroy,
}

/// An event published on a store's bus.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A mutation succeeded.
    Change(Change),
    /// An operation failed.
    Error(CoreError),
}

impl StoreEvent {
    /// Returns the channel this event is published on.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Change(_) => EventKind::Change,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// A subscriber callback.
///
/// Listeners are compared by pointer, so keep the `Arc` to unsubscribe.
pub type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Wraps a closure into a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&StoreEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Typed publish/subscribe for one store.
#[derive(Default)]
pub struct EventBus {
    change: RwLock<Vec<Listener>>,
    error: RwLock<Vec<Listener>>,
}

impl EventBus {
    /// Creates a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self, kind: EventKind) -> &RwLock<Vec<Listener>> {
        match kind {
            EventKind::Change => &self.change,
            EventKind::Error => &self.error,
        }
    }

    /// Registers a listener for one kind of event.
    ///
    /// The same listener may be registered more than once; it is then
    /// invoked once per registration.
    pub fn subscribe(&self, kind: EventKind, listener: Listener) {
        self.listeners(kind).write().push(listener);
    }

    /// Removes the first registration of `listener` for `kind`.
    ///
    /// Returns false if it was not registered.
    pub fn unsubscribe(&self, kind: EventKind, listener: &Listener) -> bool {
        let mut listeners = self.listeners(kind).write();
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Invokes every listener registered for the event's kind.
    ///
    /// Listeners run on the caller's thread, in registration order. The
    /// listener list is captured before dispatch, so callbacks may
    /// subscribe or unsubscribe freely.
    pub fn publish(&self, event: &StoreEvent) {
        let listeners = self.listeners(event.kind()).read().clone();
        trace!(kind = ?event.kind(), listeners = listeners.len(), "publishing store event");
        for listener in &listeners {
            listener(event);
        }
    }

    /// Returns the number of registrations for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners(kind).read().len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("change", &self.listener_count(EventKind::Change))
            .field("error", &self.listener_count(EventKind::Error))
            .finish()
    }
}
