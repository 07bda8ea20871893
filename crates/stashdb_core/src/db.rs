//! Connection manager.
//!
//! A [`Db`] owns the single connection to the physical database and the
//! registry of declared collections. Whenever the open connection lacks a
//! registered collection, the manager closes it and reopens at the next
//! version with an upgrade that creates every missing collection.
//!
//! Only one open or upgrade runs at a time. Callers arriving while one is
//! in flight await the same shared future. Version changes requested by
//! other connections to the database make the manager drop its connection;
//! the next caller reopens at whatever version is current.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::request::settle;
use crate::stats::{DbStats, StatsSnapshot};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use stashdb_storage::{
    Connection, Factory, ObjectStore, StoreSchema, TransactionMode, VersionChange,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Times a caller re-runs the open sequence when the registry changed or
/// the fresh connection was invalidated before it could be used.
const MAX_OPEN_ROUNDS: usize = 4;

type OpenFuture = Shared<BoxFuture<'static, CoreResult<Connection>>>;

struct PendingOpen {
    id: u64,
    future: OpenFuture,
}

#[derive(Default)]
struct HandleState {
    connection: Option<Connection>,
    version: Option<u32>,
    pending: Option<PendingOpen>,
    next_open_id: u64,
}

struct DbInner {
    factory: Factory,
    config: Config,
    registry: Mutex<BTreeMap<String, Option<StoreSchema>>>,
    state: Mutex<HandleState>,
    stats: DbStats,
}

/// Connection manager for one physical database.
///
/// Clones share the connection and the registry.
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

impl Db {
    /// Creates a manager for `config.database_name` inside `factory`.
    ///
    /// Nothing is opened until the first collection is requested.
    #[must_use]
    pub fn new(factory: Factory, config: Config) -> Self {
        Self {
            inner: Arc::new(DbInner {
                factory,
                config,
                registry: Mutex::new(BTreeMap::new()),
                state: Mutex::new(HandleState::default()),
                stats: DbStats::new(),
            }),
        }
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.database_name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the storage domain.
    #[must_use]
    pub fn factory(&self) -> &Factory {
        &self.inner.factory
    }

    /// Returns the version of the open connection, if any.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        self.inner.state.lock().version
    }

    /// Returns true while a usable connection is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner
            .state
            .lock()
            .connection
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// Returns the registered collection names, sorted.
    #[must_use]
    pub fn registered_stores(&self) -> Vec<String> {
        self.inner.registry.lock().keys().cloned().collect()
    }

    /// Returns a snapshot of the lifecycle counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Registers a collection and makes sure the database contains it.
    ///
    /// Registering a known name again is a no-op apart from replacing its
    /// schema for future upgrades.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or upgraded.
    pub async fn create_store(&self, name: &str, schema: Option<StoreSchema>) -> CoreResult<()> {
        if name.is_empty() {
            return Err(CoreError::validation("collection name must not be empty"));
        }
        self.inner.registry.lock().insert(name.to_string(), schema);
        let conn = self.connection().await?;
        if conn.contains_store(name) {
            Ok(())
        } else {
            Err(self.missing_store(&conn, name))
        }
    }

    /// Returns a read-write handle to a collection, scoped to a fresh
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] listing the available collections if
    /// `name` does not exist.
    pub async fn store_handle(&self, name: &str) -> CoreResult<ObjectStore> {
        let conn = self.connection().await?;
        if !conn.contains_store(name) {
            return Err(self.missing_store(&conn, name));
        }
        let tx = conn.transaction(&[name], TransactionMode::ReadWrite)?;
        Ok(tx.object_store(name)?)
    }

    /// Removes every record from a collection.
    ///
    /// # Errors
    ///
    /// Fails if the collection does not exist or the request fails.
    pub async fn clear_store(&self, name: &str) -> CoreResult<()> {
        let handle = self.store_handle(name).await?;
        settle(handle.clear()).await
    }

    /// Unregisters a collection and drops it from the database.
    ///
    /// The connection is closed and reopened at the next version with an
    /// upgrade that drops `name` and recreates any other registered
    /// collection that is missing.
    ///
    /// # Errors
    ///
    /// Fails if the upgrade fails.
    pub async fn delete_store(&self, name: &str) -> CoreResult<()> {
        self.inner.registry.lock().remove(name);
        loop {
            let next = {
                let mut state = self.inner.state.lock();
                match &state.pending {
                    Some(pending) => Err(pending.future.clone()),
                    None => Ok(DbInner::start(&self.inner, &mut state, Some(name.to_string()))),
                }
            };
            match next {
                Ok(future) => {
                    future.await?;
                    return Ok(());
                }
                // Let the in-flight open finish before replacing its connection.
                Err(in_flight) => {
                    if let Err(err) = in_flight.await {
                        debug!(database = %self.name(), error = %err, "in-flight open failed before dropping collection");
                    }
                }
            }
        }
    }

    /// Closes the connection.
    ///
    /// The next operation reopens it.
    pub fn close(&self) {
        let conn = {
            let mut state = self.inner.state.lock();
            state.version = None;
            state.connection.take()
        };
        if let Some(conn) = conn {
            debug!(database = %self.name(), connection = conn.id(), "closing connection");
            conn.close();
        }
    }

    /// Returns an open connection containing every registered collection.
    async fn connection(&self) -> CoreResult<Connection> {
        let blocked_before = self.inner.stats.snapshot().blocked;
        for _ in 0..MAX_OPEN_ROUNDS {
            let future = {
                let mut state = self.inner.state.lock();
                if let Some(pending) = &state.pending {
                    pending.future.clone()
                } else if let Some(conn) = state
                    .connection
                    .as_ref()
                    .filter(|c| !c.is_closed() && self.inner.has_registered(c))
                {
                    return Ok(conn.clone());
                } else {
                    DbInner::start(&self.inner, &mut state, None)
                }
            };

            let conn = future.await?;
            if !conn.is_closed() && self.inner.has_registered(&conn) {
                return Ok(conn);
            }
            debug!(database = %self.name(), "connection outdated after open; reopening");
        }
        Err(self.open_rounds_exhausted(blocked_before))
    }

    /// Error for a caller whose open rounds all ended with an outdated
    /// connection. Upgrades that waited on other connections during those
    /// rounds point at a context that keeps the database open.
    fn open_rounds_exhausted(&self, blocked_before: u64) -> CoreError {
        let blocked = self.inner.stats.snapshot().blocked - blocked_before;
        if blocked > 0 {
            return CoreError::Blocked {
                message: format!(
                    "upgrade of \"{}\" waited on other connections {blocked} time(s) and the connection kept being invalidated",
                    self.name()
                ),
            };
        }
        CoreError::Conflict {
            name: "InvalidStateError".into(),
            message: format!(
                "connection to \"{}\" kept being invalidated while opening",
                self.name()
            ),
        }
    }

    fn missing_store(&self, conn: &Connection, name: &str) -> CoreError {
        CoreError::not_found(format!(
            "Store \"{name}\" not found in database. Available stores: {}",
            conn.store_names().join(", ")
        ))
    }
}

impl DbInner {
    fn has_registered(&self, conn: &Connection) -> bool {
        self.registry.lock().keys().all(|name| conn.contains_store(name))
    }

    fn registered(&self) -> Vec<(String, StoreSchema)> {
        self.registry
            .lock()
            .iter()
            .map(|(name, schema)| (name.clone(), schema.clone().unwrap_or_default()))
            .collect()
    }

    /// Installs a new shared open future. The caller holds the state lock.
    fn start(this: &Arc<Self>, state: &mut HandleState, drop_store: Option<String>) -> OpenFuture {
        state.next_open_id += 1;
        let id = state.next_open_id;
        let future = Self::initialize(Arc::clone(this), id, drop_store)
            .boxed()
            .shared();
        state.pending = Some(PendingOpen {
            id,
            future: future.clone(),
        });
        future
    }

    async fn initialize(this: Arc<Self>, id: u64, drop_store: Option<String>) -> CoreResult<Connection> {
        let result = this.reconcile(drop_store).await;

        let mut state = this.state.lock();
        if state.pending.as_ref().map(|p| p.id) == Some(id) {
            state.pending = None;
        }
        match &result {
            Ok(conn) if !conn.is_closed() => {
                state.version = Some(conn.version());
                state.connection = Some(conn.clone());
            }
            Ok(_) => state.version = None,
            Err(err) => {
                state.version = None;
                warn!(database = %this.config.database_name, error = %err, "database open failed");
            }
        }
        result
    }

    /// Closes the current connection, looks up the stored database and
    /// reopens it at the version that holds every registered collection.
    async fn reconcile(self: &Arc<Self>, drop_store: Option<String>) -> CoreResult<Connection> {
        let previous = self.state.lock().connection.take();
        if let Some(conn) = previous {
            conn.close();
        }

        let name = &self.config.database_name;
        let info = self
            .factory
            .describe(name)
            .await
            .map_err(CoreError::from_open)?;
        let (current, on_disk) = match info {
            Some(info) => (info.version, info.store_names),
            None => (0, Vec::new()),
        };

        let registered = self.registered();
        let missing = registered
            .iter()
            .any(|(store, _)| !on_disk.iter().any(|s| s == store));
        let dropping = drop_store
            .as_ref()
            .is_some_and(|store| on_disk.iter().any(|s| s == store));
        let target = if current == 0 {
            // A fresh database gets its collections in the first upgrade
            // past the empty version 1.
            if registered.is_empty() {
                1
            } else {
                2
            }
        } else if missing || dropping {
            current + 1
        } else {
            current
        };

        debug!(database = %name, current, target, stores = registered.len(), "opening database");
        self.open_at(target, registered, drop_store).await
    }

    async fn open_at(
        self: &Arc<Self>,
        target: u32,
        registered: Vec<(String, StoreSchema)>,
        drop_store: Option<String>,
    ) -> CoreResult<Connection> {
        let name = self.config.database_name.clone();
        let upgraded = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(self);

        let request = self
            .factory
            .open(&name, Some(target))
            .on_upgrade_needed({
                let upgraded = Arc::clone(&upgraded);
                let name = name.clone();
                move |tx, change| {
                    upgraded.store(true, Ordering::Relaxed);
                    if let Some(store) = drop_store.as_deref() {
                        if tx.contains_store(store) {
                            tx.delete_object_store(store)?;
                            info!(database = %name, store, "collection dropped");
                        }
                    }
                    for (store, schema) in registered {
                        if !tx.contains_store(&store) {
                            tx.create_object_store(&store, schema)?;
                            info!(database = %name, store = %store, version = ?change.new_version, "collection created");
                        }
                    }
                    Ok(())
                }
            })
            .on_blocked({
                let weak = weak.clone();
                let name = name.clone();
                move |change| {
                    if let Some(inner) = weak.upgrade() {
                        inner.stats.record_blocked();
                    }
                    warn!(
                        database = %name,
                        from = change.old_version,
                        to = ?change.new_version,
                        "database upgrade blocked; close other contexts using this database"
                    );
                }
            })
            .on_version_change({
                let weak = weak.clone();
                move |conn, change| match weak.upgrade() {
                    Some(inner) => inner.on_version_change(conn, change),
                    None => conn.close(),
                }
            })
            .on_close(move |conn| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_unexpected_close(conn);
                }
            });

        let conn = request.send().await.map_err(CoreError::from_open)?;
        let upgraded = upgraded.load(Ordering::Relaxed);
        self.stats.record_open(upgraded);
        debug!(database = %name, connection = conn.id(), version = conn.version(), upgraded, "database opened");
        Ok(conn)
    }

    fn on_version_change(&self, conn: &Connection, change: VersionChange) {
        self.stats.record_version_change();
        debug!(
            database = %self.config.database_name,
            connection = conn.id(),
            from = change.old_version,
            to = ?change.new_version,
            "version change requested elsewhere; closing connection"
        );
        conn.close();
        self.invalidate(conn);
    }

    fn on_unexpected_close(&self, conn: &Connection) {
        self.stats.record_unexpected_close();
        warn!(database = %self.config.database_name, connection = conn.id(), "connection closed unexpectedly");
        self.invalidate(conn);
    }

    /// Forgets `conn` if it is still the current connection.
    fn invalidate(&self, conn: &Connection) {
        let mut state = self.state.lock();
        if state.connection.as_ref().is_some_and(|c| c.id() == conn.id()) {
            state.connection = None;
            state.version = None;
        }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("stores", &self.registered_stores())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn db(factory: &Factory) -> Db {
        Db::new(factory.clone(), Config::default())
    }

    #[tokio::test]
    async fn first_store_creates_database_at_version_two() {
        let factory = Factory::in_memory();
        let db = db(&factory);
        assert!(!db.is_open());

        db.create_store("users", None).await.unwrap();
        assert_eq!(db.version(), Some(2));
        assert!(db.is_open());
        assert_eq!(db.registered_stores(), vec!["users".to_string()]);

        let stats = db.stats();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.upgrades, 1);
    }

    #[tokio::test]
    async fn new_store_bumps_version() {
        let factory = Factory::in_memory();
        let db = db(&factory);
        db.create_store("a", None).await.unwrap();
        db.create_store("a", None).await.unwrap();
        assert_eq!(db.version(), Some(2));

        db.create_store("b", None).await.unwrap();
        assert_eq!(db.version(), Some(3));

        let info = factory.describe("stashdb").await.unwrap().unwrap();
        assert_eq!(info.store_names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn existing_database_opens_without_bump() {
        let factory = Factory::in_memory();
        let first = db(&factory);
        first.create_store("a", None).await.unwrap();
        first.create_store("b", None).await.unwrap();
        first.close();

        let second = db(&factory);
        second.create_store("b", None).await.unwrap();
        assert_eq!(second.version(), Some(3));
        assert_eq!(second.stats().upgrades, 0);
    }

    #[tokio::test]
    async fn store_handle_reports_available_stores() {
        let factory = Factory::in_memory();
        let db = db(&factory);
        db.create_store("a", None).await.unwrap();

        let err = db.store_handle("zzz").await.unwrap_err();
        match err {
            CoreError::NotFound { message } => {
                assert!(message.contains("\"zzz\""));
                assert!(message.contains("Available stores: a"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_store_erases_records() {
        let factory = Factory::in_memory();
        let db = db(&factory);
        db.create_store("a", None).await.unwrap();
        let handle = db.store_handle("a").await.unwrap();
        settle(handle.put(json!(1), Some("k"))).await.unwrap();

        db.clear_store("a").await.unwrap();
        let handle = db.store_handle("a").await.unwrap();
        assert_eq!(settle(handle.count()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_store_drops_and_bumps() {
        let factory = Factory::in_memory();
        let db = db(&factory);
        db.create_store("a", None).await.unwrap();
        db.create_store("b", None).await.unwrap();
        assert_eq!(db.version(), Some(3));

        db.delete_store("a").await.unwrap();
        assert_eq!(db.version(), Some(4));
        assert_eq!(db.registered_stores(), vec!["b".to_string()]);
        assert!(matches!(
            db.store_handle("a").await.unwrap_err(),
            CoreError::NotFound { .. }
        ));
        db.store_handle("b").await.unwrap();
    }

    #[tokio::test]
    async fn external_upgrade_invalidates_connection() {
        let factory = Factory::in_memory();
        let a = db(&factory);
        let b = db(&factory);
        a.create_store("x", None).await.unwrap();
        assert!(a.is_open());

        b.create_store("y", None).await.unwrap();
        assert!(!a.is_open());
        assert_eq!(a.version(), None);
        assert_eq!(b.version(), Some(3));
        assert_eq!(a.stats().version_changes, 1);

        // The next request reopens at the current version.
        a.store_handle("x").await.unwrap();
        assert_eq!(a.version(), Some(3));
    }

    #[tokio::test]
    async fn forced_close_is_recorded() {
        let factory = Factory::in_memory();
        let db = db(&factory);
        db.create_store("x", None).await.unwrap();

        factory.force_close("stashdb");
        assert!(!db.is_open());
        assert_eq!(db.stats().unexpected_closes, 1);

        db.store_handle("x").await.unwrap();
        assert!(db.is_open());
    }

    #[tokio::test]
    async fn blocked_upgrade_completes_once_other_connection_closes() {
        let factory = Factory::in_memory();
        // A connection without a version change handler holds the upgrade.
        let other = factory.open("stashdb", None).send().await.unwrap();
        let db = db(&factory);

        let task = tokio::spawn({
            let db = db.clone();
            async move { db.create_store("a", None).await }
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while db.stats().blocked == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!task.is_finished());
        assert_eq!(db.stats().blocked, 1);

        other.close();
        task.await.unwrap().unwrap();
        assert_eq!(db.version(), Some(2));
        assert_eq!(db.stats().upgrades, 1);
    }

    /// Starts an upgrade to version 5 from another context and waits until
    /// it is held up by a second connection, which is returned. The
    /// manager still sees version 1 until that connection closes. The
    /// upgraded connection is closed as soon as it opens.
    async fn upgrade_held_at_five(
        factory: &Factory,
    ) -> (Connection, tokio::task::JoinHandle<stashdb_storage::StorageResult<u32>>) {
        let other = factory.open("stashdb", None).send().await.unwrap();
        let waiting = Arc::new(AtomicBool::new(false));
        let upgrade = tokio::spawn({
            let factory = factory.clone();
            let waiting = Arc::clone(&waiting);
            async move {
                let conn = factory
                    .open("stashdb", Some(5))
                    .on_blocked(move |_| waiting.store(true, Ordering::SeqCst))
                    .send()
                    .await?;
                conn.close();
                Ok(conn.version())
            }
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while !waiting.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        (other, upgrade)
    }

    #[tokio::test]
    async fn failed_open_reaches_every_waiter_and_is_not_reused() {
        let factory = Factory::in_memory();
        let (other, upgrade) = upgrade_held_at_five(&factory).await;

        let db = db(&factory);
        let (first, second, ()) = tokio::join!(
            db.create_store("a", None),
            db.create_store("a", None),
            async {
                tokio::task::yield_now().await;
                other.close();
            }
        );
        let first = first.unwrap_err();
        assert!(first.is_conflict(), "{first:?}");
        assert_eq!(second.unwrap_err(), first);
        assert_eq!(db.stats().opens, 0);
        assert_eq!(db.version(), None);
        assert_eq!(upgrade.await.unwrap().unwrap(), 5);

        db.create_store("a", None).await.unwrap();
        assert_eq!(db.version(), Some(6));
        assert_eq!(db.stats().opens, 1);
    }

    #[tokio::test]
    async fn delete_store_recovers_from_failed_in_flight_open() {
        let factory = Factory::in_memory();
        let (other, upgrade) = upgrade_held_at_five(&factory).await;

        let db = db(&factory);
        let (created, deleted, ()) = tokio::join!(
            db.create_store("a", None),
            db.delete_store("b"),
            async {
                tokio::task::yield_now().await;
                other.close();
            }
        );
        assert!(created.unwrap_err().is_conflict());
        // The delete outlived the failed open and ran its own upgrade.
        deleted.unwrap();
        assert_eq!(upgrade.await.unwrap().unwrap(), 5);
        assert_eq!(db.version(), Some(6));
        assert_eq!(db.stats().opens, 1);
        db.store_handle("a").await.unwrap();
    }

    #[test]
    fn exhausted_open_rounds_report_blocking() {
        let db = db(&Factory::in_memory());
        let before = db.stats().blocked;
        assert!(db.open_rounds_exhausted(before).is_conflict());

        db.inner.stats.record_blocked();
        let err = db.open_rounds_exhausted(before);
        assert!(matches!(err, CoreError::Blocked { .. }), "{err:?}");
        assert!(!err.is_conflict());
    }
}
