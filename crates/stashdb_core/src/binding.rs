//! Framework-neutral live view of a store.
//!
//! A [`LiveStore`] keeps a snapshot of a collection in sync with its change
//! events. UI layers read [`values`](LiveStore::values) and the status
//! flags, and re-render whenever the [`revision`](LiveStore::revision)
//! channel ticks.

use crate::convention::{safe_call, safe_void_call};
use crate::error::CoreError;
use crate::events::{listener, EventKind, Listener, StoreEvent};
use crate::store::Store;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Snapshot {
    values: BTreeMap<String, Value>,
    is_loading: bool,
    is_ready: bool,
    error: Option<CoreError>,
}

struct LiveShared {
    store: Store,
    snapshot: RwLock<Snapshot>,
    latest_load: AtomicU64,
    revision: watch::Sender<u64>,
    runtime: Option<Handle>,
}

impl LiveShared {
    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Schedules a reload. Only the most recently scheduled load may
    /// publish its result.
    fn schedule_load(self: &Arc<Self>) {
        let seq = self.latest_load.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut snapshot = self.snapshot.write();
            snapshot.is_loading = true;
            snapshot.error = None;
        }
        self.bump();

        let Some(runtime) = &self.runtime else {
            warn!(store = %self.store.name(), "no Tokio runtime; live view cannot reload");
            return;
        };
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let values = shared.store.list().await;
            shared.finish_load(seq, values);
        });
    }

    fn finish_load(&self, seq: u64, values: BTreeMap<String, Value>) {
        if self.latest_load.load(Ordering::Acquire) != seq {
            debug!(store = %self.store.name(), seq, "discarding stale load");
            return;
        }
        {
            let mut snapshot = self.snapshot.write();
            snapshot.values = values;
            snapshot.is_loading = false;
            snapshot.is_ready = true;
        }
        self.bump();
    }

    fn record_error(&self, err: &CoreError) {
        {
            let mut snapshot = self.snapshot.write();
            snapshot.error = Some(err.clone());
            snapshot.is_loading = false;
        }
        self.bump();
    }
}

/// A self-updating snapshot of one store.
///
/// Attaching loads the whole collection once, then reloads it after every
/// change event. Errors published by the store are surfaced through
/// [`error`](LiveStore::error). Dropping the view unsubscribes it.
pub struct LiveStore {
    shared: Arc<LiveShared>,
    on_change: Listener,
    on_error: Listener,
}

impl LiveStore {
    /// Attaches a live view to `store` and starts the initial load.
    ///
    /// Loads run on the current Tokio runtime; without one the view stays
    /// empty and loading.
    #[must_use]
    pub fn attach(store: Store) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(LiveShared {
            store,
            snapshot: RwLock::new(Snapshot::default()),
            latest_load: AtomicU64::new(0),
            revision,
            runtime: Handle::try_current().ok(),
        });

        let on_change = {
            let weak: Weak<LiveShared> = Arc::downgrade(&shared);
            listener(move |_| {
                if let Some(shared) = weak.upgrade() {
                    shared.schedule_load();
                }
            })
        };
        let on_error = {
            let weak: Weak<LiveShared> = Arc::downgrade(&shared);
            listener(move |event| {
                if let (Some(shared), StoreEvent::Error(err)) = (weak.upgrade(), event) {
                    shared.record_error(err);
                }
            })
        };
        shared.store.subscribe(EventKind::Change, Arc::clone(&on_change));
        shared.store.subscribe(EventKind::Error, Arc::clone(&on_error));
        shared.schedule_load();

        Self {
            shared,
            on_change,
            on_error,
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.shared.store
    }

    /// Returns a copy of the current records.
    #[must_use]
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.shared.snapshot.read().values.clone()
    }

    /// Returns true while a load is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.shared.snapshot.read().is_loading
    }

    /// Returns true once the first load has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.snapshot.read().is_ready
    }

    /// Returns the last error reported by the store, if any.
    #[must_use]
    pub fn error(&self) -> Option<CoreError> {
        self.shared.snapshot.read().error.clone()
    }

    /// Returns a receiver that ticks on every snapshot change.
    #[must_use]
    pub fn revision(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Waits until the view is ready and no load is outstanding.
    pub async fn settled(&self) {
        let mut revision = self.revision();
        loop {
            {
                let snapshot = self.shared.snapshot.read();
                if snapshot.is_ready && !snapshot.is_loading {
                    return;
                }
            }
            if revision.changed().await.is_err() {
                return;
            }
        }
    }

    /// Returns the soft-failing mutation surface.
    #[must_use]
    pub fn mutations(&self) -> Mutations<'_> {
        Mutations { live: self }
    }
}

impl Drop for LiveStore {
    fn drop(&mut self) {
        let store = &self.shared.store;
        store.unsubscribe(EventKind::Change, &self.on_change);
        store.unsubscribe(EventKind::Error, &self.on_error);
    }
}

impl std::fmt::Debug for LiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.shared.snapshot.read();
        f.debug_struct("LiveStore")
            .field("store", &self.shared.store.name())
            .field("records", &snapshot.values.len())
            .field("is_loading", &snapshot.is_loading)
            .field("is_ready", &snapshot.is_ready)
            .field("error", &snapshot.error)
            .finish()
    }
}

/// Mutations that never fail.
///
/// Failures are still published on the store's error channel and so show
/// up in [`LiveStore::error`].
#[derive(Debug, Clone, Copy)]
pub struct Mutations<'a> {
    live: &'a LiveStore,
}

impl Mutations<'_> {
    /// Reads a record, falling back to the last snapshot.
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        let store = self.live.store();
        let fresh = safe_call(async { Ok(store.get(key).await) }).await.flatten();
        fresh.or_else(|| self.live.shared.snapshot.read().values.get(key).cloned())
    }

    /// Inserts a record.
    pub async fn add_value(&self, key: &str, value: Value) {
        safe_void_call(self.live.store().add(key, value)).await;
    }

    /// Removes a record.
    pub async fn delete_value(&self, key: &str) {
        safe_void_call(self.live.store().delete(key)).await;
    }

    /// Merges a partial value into a record.
    pub async fn update_value(&self, key: &str, partial: Value) {
        safe_void_call(self.live.store().update(key, partial)).await;
    }

    /// Inserts or replaces a record.
    pub async fn add_or_update_value(&self, key: &str, value: Value) {
        safe_void_call(self.live.store().add_or_update(key, value)).await;
    }
}
