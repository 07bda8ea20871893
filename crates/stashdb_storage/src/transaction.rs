//! Transactions, object store handles and cursors.

use crate::connection::ConnectionShared;
use crate::error::{StorageError, StorageResult};
use crate::factory::SlotInner;
use crate::fault::{Operation, OperationKind};
use crate::record::LogRecord;
use crate::request::Request;
use crate::schema::StoreSchema;
use crate::state::{DatabaseState, StoreData};
use serde_json::Value;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
}

struct TxShared {
    conn: Arc<ConnectionShared>,
    scope: Vec<String>,
    mode: TransactionMode,
    finished: AtomicBool,
}

/// A transaction scoped to a set of object stores of one connection.
///
/// Each write is durable as soon as its request resolves. Calling
/// [`commit`](Transaction::commit) ends the transaction; requests through
/// its store handles then fail with `TransactionInactiveError`.
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<TxShared>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("scope", &self.shared.scope)
            .field("mode", &self.shared.mode)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(conn: Arc<ConnectionShared>, scope: Vec<String>, mode: TransactionMode) -> Self {
        Self {
            shared: Arc::new(TxShared {
                conn,
                scope,
                mode,
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the transaction mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.shared.mode
    }

    /// Returns a handle to one of the stores in scope.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError` if the store is outside the transaction scope.
    pub fn object_store(&self, name: &str) -> StorageResult<ObjectStore> {
        if !self.shared.scope.iter().any(|s| s == name) {
            return Err(StorageError::NotFound(format!(
                "object store \"{name}\" is not in the transaction scope"
            )));
        }
        Ok(ObjectStore {
            tx: Arc::clone(&self.shared),
            name: name.to_string(),
        })
    }

    /// Ends the transaction.
    pub fn commit(&self) {
        self.shared.finished.store(true, Ordering::Release);
    }

    /// Returns true while requests may be issued.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.shared.finished.load(Ordering::Acquire)
    }
}

/// A transaction-scoped handle to one object store.
#[derive(Clone)]
pub struct ObjectStore {
    tx: Arc<TxShared>,
    name: String,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ObjectStore {
    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the record stored under `key`.
    pub fn get(&self, key: &str) -> Request<Option<Value>> {
        Request::ready(self.execute(OperationKind::Get, |data| Ok(data.records.get(key).cloned())))
    }

    /// Inserts a record; fails with `ConstraintError` if the key exists.
    ///
    /// Resolves with the key the record was stored under.
    pub fn add(&self, value: Value, key: Option<&str>) -> Request<String> {
        Request::ready(self.write(OperationKind::Add, value, key, true))
    }

    /// Inserts or replaces a record.
    ///
    /// Resolves with the key the record was stored under.
    pub fn put(&self, value: Value, key: Option<&str>) -> Request<String> {
        Request::ready(self.write(OperationKind::Put, value, key, false))
    }

    /// Removes the record stored under `key`, if any.
    pub fn delete(&self, key: &str) -> Request<()> {
        let store = self.name.clone();
        Request::ready(self.execute_mut(OperationKind::Delete, |inner| {
            let present = inner
                .state
                .stores
                .get(&store)
                .is_some_and(|data| data.records.contains_key(key));
            if present {
                inner.commit(&[LogRecord::Delete {
                    store,
                    key: key.to_string(),
                }])?;
            }
            Ok(())
        }))
    }

    /// Removes every record of the store.
    pub fn clear(&self) -> Request<()> {
        let store = self.name.clone();
        Request::ready(self.execute_mut(OperationKind::Clear, |inner| {
            inner.commit(&[LogRecord::Clear { store }])
        }))
    }

    /// Counts the records of the store.
    pub fn count(&self) -> Request<usize> {
        Request::ready(self.execute(OperationKind::Count, |data| Ok(data.records.len())))
    }

    /// Opens a cursor over the records in `range`, in key order.
    ///
    /// Resolves with `None` if the range holds no record.
    pub fn open_cursor(&self, range: KeyRange) -> Request<Option<Cursor>> {
        Request::ready(self.seek(range, None))
    }

    fn seek(&self, range: KeyRange, after: Option<&str>) -> StorageResult<Option<Cursor>> {
        let found = self.execute(OperationKind::Cursor, |data| {
            let lower = match after {
                Some(key) => Bound::Excluded(key),
                None => range.lower_str(),
            };
            Ok(data
                .records
                .range::<str, _>((lower, Bound::Unbounded))
                .find(|(key, _)| range.contains(key))
                .map(|(key, value)| (key.clone(), value.clone())))
        })?;

        Ok(found.map(|(key, value)| Cursor {
            store: self.clone(),
            range,
            key,
            value,
        }))
    }

    fn write(&self, kind: OperationKind, mut value: Value, key: Option<&str>, insert_only: bool) -> StorageResult<String> {
        let store = self.name.clone();
        self.execute_mut(kind, |inner| {
            let data = inner.state.stores.get(&store).ok_or_else(|| missing_store(&store))?;
            let key = data.resolve_key(key, &mut value)?;
            if insert_only && data.records.contains_key(&key) {
                return Err(StorageError::Constraint(format!(
                    "key \"{key}\" already exists in object store \"{store}\""
                )));
            }
            inner.commit(&[LogRecord::Put {
                store,
                key: key.clone(),
                value,
            }])?;
            Ok(key)
        })
    }

    /// Runs a read against the store's data.
    fn execute<R>(&self, kind: OperationKind, f: impl FnOnce(&StoreData) -> StorageResult<R>) -> StorageResult<R> {
        self.preflight(kind, false)?;
        let inner = self.tx.conn.slot.inner.lock();
        self.tx.conn.ensure_usable(&inner.state)?;
        let data = inner
            .state
            .stores
            .get(&self.name)
            .ok_or_else(|| missing_store(&self.name))?;
        f(data)
    }

    /// Runs a write with exclusive access to the database slot.
    fn execute_mut<R>(&self, kind: OperationKind, f: impl FnOnce(&mut SlotInner) -> StorageResult<R>) -> StorageResult<R> {
        self.preflight(kind, true)?;
        let mut inner = self.tx.conn.slot.inner.lock();
        self.tx.conn.ensure_usable(&inner.state)?;
        if !inner.state.stores.contains_key(&self.name) {
            return Err(missing_store(&self.name));
        }
        f(&mut inner)
    }

    fn preflight(&self, kind: OperationKind, write: bool) -> StorageResult<()> {
        let conn = &self.tx.conn;
        let op = Operation {
            database: &conn.slot.name,
            store: Some(&self.name),
            kind,
        };
        if let Some(err) = conn.factory.injected_fault(&op) {
            return Err(err);
        }
        if self.tx.finished.load(Ordering::Acquire) {
            return Err(StorageError::TransactionInactive(
                "the transaction has finished".into(),
            ));
        }
        if write && self.tx.mode == TransactionMode::ReadOnly {
            return Err(StorageError::ReadOnly(format!(
                "cannot write to \"{}\" in a read-only transaction",
                self.name
            )));
        }
        Ok(())
    }
}

fn missing_store(name: &str) -> StorageError {
    StorageError::NotFound(format!("object store \"{name}\" does not exist"))
}

/// A position inside an object store.
///
/// The cursor holds a copy of the current record. Advancing looks up the
/// next key in the live store, so records written behind the cursor are
/// visible to later steps.
pub struct Cursor {
    store: ObjectStore,
    range: KeyRange,
    key: String,
    value: Value,
}

impl Cursor {
    /// Returns the current key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the current value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the cursor and returns its record.
    #[must_use]
    pub fn into_record(self) -> (String, Value) {
        (self.key, self.value)
    }

    /// Replaces the record at the cursor position.
    pub fn update(&self, value: Value) -> Request<String> {
        Request::ready(self.store.write(OperationKind::Put, value, Some(&self.key), false))
    }

    /// Removes the record at the cursor position.
    pub fn delete(&self) -> Request<()> {
        self.store.delete(&self.key)
    }

    /// Moves to the next record in the range.
    ///
    /// Resolves with `None` once the range is exhausted.
    pub fn advance(self) -> Request<Option<Cursor>> {
        Request::ready(self.store.seek(self.range.clone(), Some(&self.key)))
    }
}

/// A range of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<String>,
    upper: Bound<String>,
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

impl KeyRange {
    /// Every key.
    #[must_use]
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// Exactly one key.
    #[must_use]
    pub fn only(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Keys from `lower` up.
    #[must_use]
    pub fn lower_bound(key: impl Into<String>, open: bool) -> Self {
        Self {
            lower: bound(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Keys up to `upper`.
    #[must_use]
    pub fn upper_bound(key: impl Into<String>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound(key.into(), open),
        }
    }

    /// Keys between `lower` and `upper`.
    #[must_use]
    pub fn bound(lower: impl Into<String>, upper: impl Into<String>, lower_open: bool, upper_open: bool) -> Self {
        Self {
            lower: bound(lower.into(), lower_open),
            upper: bound(upper.into(), upper_open),
        }
    }

    /// Returns true if `key` lies inside the range.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => key >= l.as_str(),
            Bound::Excluded(l) => key > l.as_str(),
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => key <= u.as_str(),
            Bound::Excluded(u) => key < u.as_str(),
            Bound::Unbounded => true,
        };
        above && below
    }

    fn lower_str(&self) -> Bound<&str> {
        match &self.lower {
            Bound::Included(l) => Bound::Included(l.as_str()),
            Bound::Excluded(l) => Bound::Excluded(l.as_str()),
            Bound::Unbounded => Bound::Unbounded,
        }
    }
}

fn bound(key: String, open: bool) -> Bound<String> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

/// The privileged transaction run while a database changes version.
///
/// Changes are staged and committed together once the upgrade callback
/// returns `Ok`; an error leaves the database untouched.
pub struct VersionChangeTransaction {
    staged: DatabaseState,
    old_version: u32,
}

impl VersionChangeTransaction {
    pub(crate) fn new(mut staged: DatabaseState, new_version: u32) -> Self {
        let old_version = staged.version;
        staged.version = new_version;
        Self {
            staged,
            old_version,
        }
    }

    pub(crate) fn into_state(self) -> DatabaseState {
        self.staged
    }

    /// Returns the version being upgraded from (0 for a new database).
    #[must_use]
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    /// Returns the version being upgraded to.
    #[must_use]
    pub fn new_version(&self) -> u32 {
        self.staged.version
    }

    /// Returns the object store names, sorted.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.staged.store_names()
    }

    /// Returns true if the named store exists.
    #[must_use]
    pub fn contains_store(&self, name: &str) -> bool {
        self.staged.stores.contains_key(name)
    }

    /// Creates an empty object store.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintError` if the store exists and `DataError` if the
    /// name is empty.
    pub fn create_object_store(&mut self, name: &str, schema: StoreSchema) -> StorageResult<()> {
        if name.is_empty() {
            return Err(StorageError::Data("object store name must not be empty".into()));
        }
        if self.contains_store(name) {
            return Err(StorageError::Constraint(format!(
                "object store \"{name}\" already exists"
            )));
        }
        self.staged.apply(&LogRecord::CreateStore {
            name: name.to_string(),
            schema,
        });
        Ok(())
    }

    /// Drops an object store with all its records.
    ///
    /// # Errors
    ///
    /// Returns `NotFoundError` if the store does not exist.
    pub fn delete_object_store(&mut self, name: &str) -> StorageResult<()> {
        if !self.contains_store(name) {
            return Err(missing_store(name));
        }
        self.staged.apply(&LogRecord::DeleteStore {
            name: name.to_string(),
        });
        Ok(())
    }
}
