//! Test fixtures and storage helpers.
//!
//! Provides throwaway storage domains, registries bound to them and an
//! event recorder for asserting on notifications.

use parking_lot::Mutex;
use stashdb_core::{listener, Config, EventKind, Listener, Registry, RetryConfig, Store, StoreEvent};
use stashdb_storage::Factory;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

/// Retry settings that keep conflict tests fast.
#[must_use]
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new().delay(Duration::from_millis(1))
}

/// A storage domain with automatic cleanup.
pub struct TestDomain {
    /// The factory every context shares.
    pub factory: Factory,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDomain {
    /// Creates a new in-memory domain.
    pub fn memory() -> Self {
        Self {
            factory: Factory::in_memory(),
            temp_dir: None,
        }
    }

    /// Creates a new on-disk domain in a temporary directory.
    pub fn on_disk() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            factory: Factory::on_disk(temp_dir.path()),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the directory if on disk, None if in memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Simulates a process restart.
    ///
    /// Every registry and store built on the old factory must be dropped
    /// first so the database files are unlocked. In-memory domains come
    /// back empty.
    pub fn restart(self) -> Self {
        let Self { factory, temp_dir } = self;
        drop(factory);
        let factory = match &temp_dir {
            Some(dir) => Factory::on_disk(dir.path()),
            None => Factory::in_memory(),
        };
        Self { factory, temp_dir }
    }

    /// Creates a context for the default database with fast retries.
    pub fn registry(&self) -> Registry {
        self.registry_with(Config::default().retry(fast_retry()))
    }

    /// Creates a context with an explicit configuration.
    pub fn registry_with(&self, config: Config) -> Registry {
        Registry::new(self.factory.clone(), config)
    }
}

/// Records every event a store publishes.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<StoreEvent>>>,
    listeners: Vec<(EventKind, Listener)>,
    store: Store,
}

impl EventRecorder {
    /// Subscribes to both channels of `store`.
    pub fn attach(store: &Store) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Vec::new();
        for kind in [EventKind::Change, EventKind::Error] {
            let sink = Arc::clone(&events);
            let l = listener(move |event| sink.lock().push(event.clone()));
            store.subscribe(kind, Arc::clone(&l));
            listeners.push((kind, l));
        }
        Self {
            events,
            listeners,
            store: store.clone(),
        }
    }

    /// Returns the events seen so far.
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    /// Returns the number of events of `kind` seen so far.
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Forgets the events seen so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        for (kind, l) in &self.listeners {
            self.store.unsubscribe(*kind, l);
        }
    }
}

/// Installs a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_domain_registry() {
        let domain = TestDomain::memory();
        assert!(domain.path().is_none());

        let store = domain.registry().store("test", None);
        store.add("k", json!(1)).await.unwrap();
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn recorder_sees_both_channels() {
        init_tracing();
        let domain = TestDomain::memory();
        let store = domain.registry().store("test", None);
        let recorder = EventRecorder::attach(&store);

        store.add("k", json!(1)).await.unwrap();
        assert!(store.add("k", json!(2)).await.is_err());

        assert_eq!(recorder.count(EventKind::Change), 1);
        assert_eq!(recorder.count(EventKind::Error), 1);
        recorder.clear();
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn recorder_unsubscribes_on_drop() {
        let domain = TestDomain::memory();
        let store = domain.registry().store("test", None);
        drop(EventRecorder::attach(&store));
        assert_eq!(store.bus().listener_count(EventKind::Change), 0);
    }

    #[tokio::test]
    async fn on_disk_domain_survives_restart() {
        let domain = TestDomain::on_disk();
        {
            let registry = domain.registry();
            registry.store("test", None).add("k", json!("v")).await.unwrap();
            registry.reset();
        }
        let domain = domain.restart();
        let store = domain.registry().store("test", None);
        assert_eq!(store.get("k").await, Some(json!("v")));
    }
}
