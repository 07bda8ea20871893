//! The storage domain: named databases, opening and version upgrades.

use crate::backend::StorageBackend;
use crate::connection::{
    CloseHandler, Connection, ConnectionShared, Handlers, VersionChange, VersionChangeHandler,
};
use crate::error::{StorageError, StorageResult};
use crate::fault::{FaultHook, Operation, OperationKind};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use crate::record::{decode_frames, encode_frames, LogRecord};
use crate::request::Request;
use crate::state::DatabaseState;
use crate::transaction::VersionChangeTransaction;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// File extension of database logs in an on-disk factory.
pub const DATABASE_EXTENSION: &str = "stashdb";

/// Callback run when an open request moves a database to a newer version.
pub type UpgradeCallback =
    Box<dyn FnOnce(&mut VersionChangeTransaction, VersionChange) -> StorageResult<()> + Send>;

/// Called once when an upgrade has to wait for open connections to close.
pub type BlockedHandler = Arc<dyn Fn(VersionChange) + Send + Sync>;

/// Name, version and stores of an existing database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Current version (at least 1).
    pub version: u32,
    /// Object store names, sorted.
    pub store_names: Vec<String>,
}

enum Location {
    Memory,
    Directory(PathBuf),
}

struct FactoryInner {
    location: Location,
    slots: Mutex<HashMap<String, Arc<DatabaseSlot>>>,
    fault_hook: RwLock<Option<FaultHook>>,
    next_connection_id: AtomicU64,
}

/// A storage domain holding named databases.
///
/// Every handle cloned from one factory sees the same databases, the same
/// open connections and the same version-change traffic. Separate
/// execution contexts of one application share a factory.
///
/// # Example
///
/// ```rust
/// use stashdb_storage::{Factory, StoreSchema, TransactionMode};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let factory = Factory::in_memory();
/// let conn = factory
///     .open("app", Some(1))
///     .on_upgrade_needed(|tx, _| tx.create_object_store("notes", StoreSchema::new()))
///     .send()
///     .await
///     .unwrap();
///
/// let tx = conn.transaction(&["notes"], TransactionMode::ReadWrite).unwrap();
/// let notes = tx.object_store("notes").unwrap();
/// notes.put(json!({"text": "hi"}), Some("n1")).await.unwrap();
/// assert_eq!(notes.count().await.unwrap(), 1);
/// # }
/// ```
#[derive(Clone)]
pub struct Factory {
    inner: Arc<FactoryInner>,
}

impl Factory {
    /// Creates a factory whose databases live in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_location(Location::Memory)
    }

    /// Creates a factory storing one log file per database in `dir`.
    ///
    /// The directory is created on first use.
    #[must_use]
    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self::with_location(Location::Directory(dir.into()))
    }

    fn with_location(location: Location) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                location,
                slots: Mutex::new(HashMap::new()),
                fault_hook: RwLock::new(None),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the directory of an on-disk factory.
    #[must_use]
    pub fn directory(&self) -> Option<&Path> {
        match &self.inner.location {
            Location::Memory => None,
            Location::Directory(dir) => Some(dir.as_path()),
        }
    }

    /// Installs or removes the fault hook consulted before every request.
    pub fn set_fault_hook(&self, hook: Option<FaultHook>) {
        *self.inner.fault_hook.write() = hook;
    }

    pub(crate) fn injected_fault(&self, op: &Operation<'_>) -> Option<StorageError> {
        let hook = self.inner.fault_hook.read().clone();
        let err = hook.and_then(|hook| hook(op))?;
        tracing::trace!(database = op.database, store = ?op.store, kind = ?op.kind, error = %err, "injected fault");
        Some(err)
    }

    fn check_fault(&self, database: &str, kind: OperationKind) -> StorageResult<()> {
        match self.injected_fault(&Operation {
            database,
            store: None,
            kind,
        }) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Reports the version and stores of a database without opening it.
    ///
    /// Resolves with `None` if the database does not exist.
    pub fn describe(&self, name: &str) -> Request<Option<DatabaseInfo>> {
        Request::ready(self.describe_now(name))
    }

    fn describe_now(&self, name: &str) -> StorageResult<Option<DatabaseInfo>> {
        self.check_fault(name, OperationKind::Describe)?;
        let Some(slot) = self.slot(name, false)? else {
            return Ok(None);
        };
        let inner = slot.inner.lock();
        if !inner.state.exists() {
            return Ok(None);
        }
        Ok(Some(DatabaseInfo {
            name: slot.name.clone(),
            version: inner.state.version,
            store_names: inner.state.store_names(),
        }))
    }

    /// Lists every existing database, sorted by name.
    pub fn databases(&self) -> Request<Vec<DatabaseInfo>> {
        Request::ready(self.databases_now())
    }

    fn databases_now(&self) -> StorageResult<Vec<DatabaseInfo>> {
        let mut names: BTreeSet<String> = self.inner.slots.lock().keys().cloned().collect();
        if let Location::Directory(dir) = &self.inner.location {
            if dir.exists() {
                for entry in std::fs::read_dir(dir)? {
                    let path = entry?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(DATABASE_EXTENSION) {
                        continue;
                    }
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.insert(stem.to_string());
                    }
                }
            }
        }

        let mut infos = Vec::new();
        for name in names {
            if let Some(info) = self.describe_now(&name)? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    /// Starts building an open request.
    ///
    /// With `version` unset the database opens at its current version, or
    /// at version 1 if it does not exist yet.
    pub fn open(&self, name: &str, version: Option<u32>) -> OpenRequest {
        OpenRequest {
            factory: self.clone(),
            name: name.to_string(),
            version,
            upgrade: None,
            blocked: None,
            handlers: Handlers::default(),
        }
    }

    /// Deletes a database.
    ///
    /// Open connections receive a version change with no new version and
    /// the request waits until they have all closed.
    pub fn delete_database(&self, name: &str) -> Request<()> {
        let factory = self.clone();
        let name = name.to_string();
        Request::deferred(async move {
            let Some(slot) = factory.slot(&name, false)? else {
                return Ok(());
            };
            let _gate = slot.upgrade_gate.lock().await;
            let old_version = slot.inner.lock().state.version;
            if old_version == 0 {
                return Ok(());
            }
            let change = VersionChange {
                old_version,
                new_version: None,
            };
            slot.announce(change, None);
            slot.wait_for_close().await;
            slot.install(DatabaseState::default())?;
            tracing::info!(database = %name, version = old_version, "database deleted");
            Ok(())
        })
    }

    /// Closes every connection to a database abnormally.
    ///
    /// Each connection's close handler runs. This mirrors the platform
    /// reclaiming storage out from under its owners.
    pub fn force_close(&self, name: &str) {
        let Ok(Some(slot)) = self.slot(name, false) else {
            return;
        };
        let victims = slot.take_open_connections();
        tracing::warn!(database = %name, connections = victims.len(), "forcing connections closed");
        for conn in &victims {
            conn.fire_close();
        }
        drop(victims);
        slot.closed.notify_waiters();
    }

    /// Rewrites a database log as a compact snapshot of its current content.
    pub fn compact(&self, name: &str) -> Request<()> {
        let factory = self.clone();
        let name = name.to_string();
        Request::deferred(async move {
            let Some(slot) = factory.slot(&name, false)? else {
                return Err(StorageError::NotFound(format!("database \"{name}\" does not exist")));
            };
            let _gate = slot.upgrade_gate.lock().await;
            slot.compact()
        })
    }

    fn next_connection_id(&self) -> u64 {
        self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the slot for `name`, loading it on first access.
    ///
    /// With `create` unset, a database that was never written to disk is
    /// reported as absent rather than created.
    fn slot(&self, name: &str, create: bool) -> StorageResult<Option<Arc<DatabaseSlot>>> {
        validate_name(name)?;
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get(name) {
            return Ok(Some(Arc::clone(slot)));
        }

        let backend: Box<dyn StorageBackend> = match &self.inner.location {
            Location::Memory => {
                if !create {
                    return Ok(None);
                }
                Box::new(InMemoryBackend::new())
            }
            Location::Directory(dir) => {
                let path = dir.join(format!("{name}.{DATABASE_EXTENSION}"));
                if !create && !path.exists() {
                    return Ok(None);
                }
                Box::new(FileBackend::open(&path)?)
            }
        };

        let slot = Arc::new(DatabaseSlot::load(name, backend)?);
        slots.insert(name.to_string(), Arc::clone(&slot));
        Ok(Some(slot))
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = match &self.inner.location {
            Location::Memory => "memory".to_string(),
            Location::Directory(dir) => dir.display().to_string(),
        };
        f.debug_struct("Factory").field("location", &location).finish()
    }
}

fn validate_name(name: &str) -> StorageResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::Data(format!("invalid database name \"{name}\"")));
    }
    Ok(())
}

/// A pending open request.
///
/// Nothing happens until [`send`](OpenRequest::send) is called and the
/// returned request is awaited.
#[must_use = "open requests do nothing until sent"]
pub struct OpenRequest {
    factory: Factory,
    name: String,
    version: Option<u32>,
    upgrade: Option<UpgradeCallback>,
    blocked: Option<BlockedHandler>,
    handlers: Handlers,
}

impl OpenRequest {
    /// Sets the callback that creates or drops stores during an upgrade.
    ///
    /// Returning an error aborts the upgrade and leaves the database as it
    /// was; the open request fails with that error.
    pub fn on_upgrade_needed<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut VersionChangeTransaction, VersionChange) -> StorageResult<()> + Send + 'static,
    {
        self.upgrade = Some(Box::new(f));
        self
    }

    /// Sets the callback run when the upgrade waits on other connections.
    pub fn on_blocked<F>(mut self, f: F) -> Self
    where
        F: Fn(VersionChange) + Send + Sync + 'static,
    {
        self.blocked = Some(Arc::new(f));
        self
    }

    /// Sets the version change handler of the resulting connection.
    pub fn on_version_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection, VersionChange) + Send + Sync + 'static,
    {
        let handler: VersionChangeHandler = Arc::new(f);
        self.handlers.version_change = Some(handler);
        self
    }

    /// Sets the close handler of the resulting connection.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        let handler: CloseHandler = Arc::new(f);
        self.handlers.close = Some(handler);
        self
    }

    /// Submits the request.
    pub fn send(self) -> Request<Connection> {
        Request::deferred(self.run())
    }

    async fn run(self) -> StorageResult<Connection> {
        let Self {
            factory,
            name,
            version,
            upgrade,
            blocked,
            handlers,
        } = self;

        factory.check_fault(&name, OperationKind::Open)?;
        if version == Some(0) {
            return Err(StorageError::Data("version must be at least 1".into()));
        }
        let slot = factory
            .slot(&name, true)?
            .ok_or_else(|| StorageError::NotFound(format!("database \"{name}\" does not exist")))?;

        let _gate = slot.upgrade_gate.lock().await;
        let current = slot.inner.lock().state.version;
        let target = version.unwrap_or(current.max(1));
        if target < current {
            return Err(StorageError::Version {
                requested: target,
                existing: current,
            });
        }

        if target > current {
            let change = VersionChange {
                old_version: current,
                new_version: Some(target),
            };
            slot.announce(change, blocked.as_ref());
            slot.wait_for_close().await;

            let staged = slot.inner.lock().state.clone();
            let mut tx = VersionChangeTransaction::new(staged, target);
            if let Some(upgrade) = upgrade {
                if let Err(err) = upgrade(&mut tx, change) {
                    tracing::warn!(database = %name, from = current, to = target, error = %err, "upgrade aborted");
                    return Err(err);
                }
            }
            slot.install(tx.into_state())?;
            tracing::info!(database = %name, from = current, to = target, "database upgraded");
        }

        let conn = slot.connect(&factory, handlers);
        tracing::debug!(database = %name, connection = conn.id(), version = conn.version(), "connection opened");
        Ok(conn)
    }
}

/// One named database shared by every connection to it.
pub(crate) struct DatabaseSlot {
    pub name: String,
    pub inner: Mutex<SlotInner>,
    /// Signalled whenever a connection to this database closes.
    pub closed: Notify,
    /// Serializes open, delete and compaction requests.
    upgrade_gate: tokio::sync::Mutex<()>,
}

pub(crate) struct SlotInner {
    pub state: DatabaseState,
    backend: Box<dyn StorageBackend>,
    connections: Vec<Weak<ConnectionShared>>,
}

impl SlotInner {
    /// Appends records to the log and applies them.
    pub fn commit(&mut self, records: &[LogRecord]) -> StorageResult<()> {
        let frames = encode_frames(records)?;
        self.backend.append(&frames)?;
        self.backend.sync()?;
        for record in records {
            self.state.apply(record);
        }
        Ok(())
    }

    fn open_connections(&self) -> Vec<Arc<ConnectionShared>> {
        self.connections
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.is_closed())
            .collect()
    }
}

impl DatabaseSlot {
    fn load(name: &str, mut backend: Box<dyn StorageBackend>) -> StorageResult<Self> {
        let data = backend.read_all()?;
        let records = decode_frames(&data)?;
        let state = DatabaseState::replay(&records);

        // Cut a torn tail off so later appends start on a frame boundary.
        let valid = encode_frames(&records)?;
        if valid.len() != data.len() {
            backend.rewrite(&encode_frames(&state.snapshot_records())?)?;
        }

        tracing::debug!(database = %name, version = state.version, stores = state.stores.len(), "database loaded");
        Ok(Self {
            name: name.to_string(),
            inner: Mutex::new(SlotInner {
                state,
                backend,
                connections: Vec::new(),
            }),
            closed: Notify::new(),
            upgrade_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Drops a connection from the open set and wakes waiting upgrades.
    pub fn release(&self, id: u64) {
        self.inner
            .lock()
            .connections
            .retain(|w| w.upgrade().is_some_and(|c| c.id != id));
        self.closed.notify_waiters();
    }

    fn open_count(&self) -> usize {
        self.inner.lock().open_connections().len()
    }

    fn take_open_connections(&self) -> Vec<Arc<ConnectionShared>> {
        let mut inner = self.inner.lock();
        let open = inner.open_connections();
        for conn in &open {
            conn.mark_closed();
        }
        inner.connections.clear();
        open
    }

    fn connect(self: &Arc<Self>, factory: &Factory, handlers: Handlers) -> Connection {
        let id = factory.next_connection_id();
        let mut inner = self.inner.lock();
        let shared = Arc::new(ConnectionShared::new(
            id,
            &inner.state,
            factory.clone(),
            Arc::clone(self),
            handlers,
        ));
        inner.connections.retain(|w| w.strong_count() > 0);
        inner.connections.push(Arc::downgrade(&shared));
        Connection::from_shared(shared)
    }

    /// Fires a version change at every open connection, then `blocked` once
    /// if any of them stayed open.
    fn announce(&self, change: VersionChange, blocked: Option<&BlockedHandler>) {
        let open = self.inner.lock().open_connections();
        if open.is_empty() {
            return;
        }
        tracing::debug!(database = %self.name, connections = open.len(), ?change, "announcing version change");
        for conn in &open {
            conn.fire_version_change(change);
        }
        drop(open);

        let remaining = self.open_count();
        if remaining > 0 {
            tracing::debug!(database = %self.name, connections = remaining, "version change blocked");
            if let Some(blocked) = blocked {
                blocked(change);
            }
        }
    }

    async fn wait_for_close(&self) {
        loop {
            let notified = self.closed.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            if self.open_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Replaces the whole database with `state`, rewriting the log.
    fn install(&self, state: DatabaseState) -> StorageResult<()> {
        let bytes = if state.exists() {
            encode_frames(&state.snapshot_records())?
        } else {
            Vec::new()
        };
        let mut inner = self.inner.lock();
        inner.backend.rewrite(&bytes)?;
        inner.state = state;
        Ok(())
    }

    fn compact(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let before = inner.backend.size()?;
        let bytes = encode_frames(&inner.state.snapshot_records())?;
        inner.backend.rewrite(&bytes)?;
        tracing::debug!(database = %self.name, before, after = bytes.len(), "log compacted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultPlan;
    use crate::schema::StoreSchema;
    use crate::transaction::TransactionMode;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    async fn open_with(factory: &Factory, name: &str, version: u32, stores: &[&str]) -> Connection {
        let stores: Vec<String> = stores.iter().map(|s| (*s).to_string()).collect();
        factory
            .open(name, Some(version))
            .on_upgrade_needed(move |tx, _| {
                for store in &stores {
                    if !tx.contains_store(store) {
                        tx.create_object_store(store, StoreSchema::new())?;
                    }
                }
                Ok(())
            })
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_creates_database_at_version_one() {
        let factory = Factory::in_memory();
        assert!(factory.describe("app").await.unwrap().is_none());

        let conn = factory.open("app", None).send().await.unwrap();
        assert_eq!(conn.version(), 1);
        assert!(conn.store_names().is_empty());

        let info = factory.describe("app").await.unwrap().unwrap();
        assert_eq!(info.version, 1);
    }

    #[tokio::test]
    async fn lower_version_is_rejected() {
        let factory = Factory::in_memory();
        let conn = open_with(&factory, "app", 3, &["a"]).await;
        conn.close();

        let err = factory.open("app", Some(2)).send().await.unwrap_err();
        assert_eq!(err.name(), "VersionError");
    }

    #[tokio::test]
    async fn failed_upgrade_leaves_database_untouched() {
        let factory = Factory::in_memory();
        open_with(&factory, "app", 1, &["a"]).await.close();

        let err = factory
            .open("app", Some(2))
            .on_upgrade_needed(|tx, _| {
                tx.create_object_store("b", StoreSchema::new())?;
                tx.create_object_store("a", StoreSchema::new())
            })
            .send()
            .await
            .unwrap_err();
        assert_eq!(err.name(), "ConstraintError");

        let info = factory.describe("app").await.unwrap().unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.store_names, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn upgrade_notifies_and_waits_for_open_connections() {
        let factory = Factory::in_memory();
        let changes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&changes);
        let old = factory
            .open("app", Some(1))
            .on_version_change(move |conn, change| {
                assert_eq!(change.new_version, Some(2));
                seen.fetch_add(1, Ordering::SeqCst);
                conn.close();
            })
            .send()
            .await
            .unwrap();

        let new = open_with(&factory, "app", 2, &["a"]).await;
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert!(old.is_closed());
        assert_eq!(new.version(), 2);

        let err = old.transaction(&["a"], TransactionMode::ReadOnly).unwrap_err();
        assert_eq!(err.name(), "InvalidStateError");
    }

    #[tokio::test]
    async fn blocked_fires_once_then_upgrade_completes_on_close() {
        let factory = Factory::in_memory();
        let old = factory.open("app", Some(1)).send().await.unwrap();

        let blocked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&blocked);
        let upgrade = tokio::spawn({
            let factory = factory.clone();
            async move {
                factory
                    .open("app", Some(2))
                    .on_blocked(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .send()
                    .await
            }
        });

        while blocked.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!upgrade.is_finished());
        old.close();

        let conn = upgrade.await.unwrap().unwrap();
        assert_eq!(conn.version(), 2);
        assert_eq!(blocked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_connection_unblocks_upgrade() {
        let factory = Factory::in_memory();
        let old = factory.open("app", Some(1)).send().await.unwrap();
        let upgrade = tokio::spawn({
            let factory = factory.clone();
            async move { factory.open("app", Some(2)).send().await }
        });
        tokio::task::yield_now().await;
        drop(old);

        assert_eq!(upgrade.await.unwrap().unwrap().version(), 2);
    }

    #[tokio::test]
    async fn closed_connection_rejects_requests() {
        let factory = Factory::in_memory();
        let old = open_with(&factory, "app", 1, &["a"]).await;
        let tx = old.transaction(&["a"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("a").unwrap();

        let opener = factory.clone();
        let upgrade = tokio::spawn(async move { opener.open("app", Some(2)).send().await });
        tokio::task::yield_now().await;
        old.close();
        upgrade.await.unwrap().unwrap();

        let err = store.put(json!(1), Some("k")).await.unwrap_err();
        assert_eq!(err.name(), "InvalidStateError");
    }

    #[tokio::test]
    async fn force_close_runs_close_handlers() {
        let factory = Factory::in_memory();
        let closes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closes);
        let conn = factory
            .open("app", None)
            .on_close(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .send()
            .await
            .unwrap();

        factory.force_close("app");
        assert!(conn.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        conn.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_database_resets_version() {
        let factory = Factory::in_memory();
        open_with(&factory, "app", 4, &["a"]).await.close();

        factory.delete_database("app").await.unwrap();
        assert!(factory.describe("app").await.unwrap().is_none());
        assert!(factory.databases().await.unwrap().is_empty());

        let conn = factory.open("app", None).send().await.unwrap();
        assert_eq!(conn.version(), 1);
        assert!(conn.store_names().is_empty());
    }

    #[tokio::test]
    async fn fault_hook_fails_open() {
        let factory = Factory::in_memory();
        let plan = FaultPlan::new()
            .fail_times(OperationKind::Open, StorageError::Io("disk gone".into()), 1)
            .shared();
        factory.set_fault_hook(Some(plan.hook()));

        assert_eq!(factory.open("app", None).send().await.unwrap_err().name(), "IoError");
        assert!(factory.open("app", None).send().await.is_ok());
        assert_eq!(plan.attempts(OperationKind::Open), 2);
    }

    #[tokio::test]
    async fn disk_database_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let factory = Factory::on_disk(dir.path());
            let conn = open_with(&factory, "app", 2, &["notes"]).await;
            let tx = conn.transaction(&["notes"], TransactionMode::ReadWrite).unwrap();
            let notes = tx.object_store("notes").unwrap();
            notes.put(json!({"text": "a"}), Some("n1")).await.unwrap();
            notes.put(json!({"text": "b"}), Some("n2")).await.unwrap();
            notes.delete("n1").await.unwrap();
        }

        let factory = Factory::on_disk(dir.path());
        let infos = factory.databases().await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].version, 2);

        let conn = factory.open("app", None).send().await.unwrap();
        let tx = conn.transaction(&["notes"], TransactionMode::ReadOnly).unwrap();
        let notes = tx.object_store("notes").unwrap();
        assert_eq!(notes.count().await.unwrap(), 1);
        assert_eq!(notes.get("n2").await.unwrap(), Some(json!({"text": "b"})));

        factory.compact("app").await.unwrap();
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(validate_name("").is_err());
        assert!(validate_name("../up").is_err());
        assert!(validate_name("ok-name").is_ok());
    }
}
