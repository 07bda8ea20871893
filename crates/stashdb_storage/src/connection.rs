//! Open connections to a database.

use crate::error::{StorageError, StorageResult};
use crate::factory::{DatabaseSlot, Factory};
use crate::state::DatabaseState;
use crate::transaction::{Transaction, TransactionMode};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A version transition announced to open connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    /// Version before the change.
    pub old_version: u32,
    /// Version after the change; `None` when the database is being deleted.
    pub new_version: Option<u32>,
}

/// Called on a connection when another open request needs a newer version.
pub type VersionChangeHandler = Arc<dyn Fn(&Connection, VersionChange) + Send + Sync>;

/// Called on a connection that was closed by the platform rather than by
/// its owner.
pub type CloseHandler = Arc<dyn Fn(&Connection) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Handlers {
    pub version_change: Option<VersionChangeHandler>,
    pub close: Option<CloseHandler>,
}

pub(crate) struct ConnectionShared {
    pub id: u64,
    pub version: u32,
    pub store_names: Vec<String>,
    pub factory: Factory,
    pub slot: Arc<DatabaseSlot>,
    closed: AtomicBool,
    handlers: Handlers,
}

impl ConnectionShared {
    pub fn new(
        id: u64,
        state: &DatabaseState,
        factory: Factory,
        slot: Arc<DatabaseSlot>,
        handlers: Handlers,
    ) -> Self {
        Self {
            id,
            version: state.version,
            store_names: state.store_names(),
            factory,
            slot,
            closed: AtomicBool::new(false),
            handlers,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the connection closed. Returns false if it already was.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Fails unless requests may run on this connection against `state`.
    pub fn ensure_usable(&self, state: &DatabaseState) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::connection_closing());
        }
        if state.version != self.version {
            return Err(StorageError::InvalidState(format!(
                "database version changed from {} to {}; the connection must be reopened",
                self.version, state.version
            )));
        }
        Ok(())
    }

    pub fn fire_version_change(self: &Arc<Self>, change: VersionChange) {
        let handler = self.handlers.version_change.clone();
        if let Some(handler) = handler {
            handler(&Connection::from_shared(Arc::clone(self)), change);
        }
    }

    pub fn fire_close(self: &Arc<Self>) {
        let handler = self.handlers.close.clone();
        if let Some(handler) = handler {
            handler(&Connection::from_shared(Arc::clone(self)));
        }
    }
}

impl Drop for ConnectionShared {
    fn drop(&mut self) {
        // An upgrade may be waiting for this connection to go away.
        if !self.is_closed() {
            self.slot.closed.notify_waiters();
        }
    }
}

/// An open connection to one database version.
///
/// The set of object stores is fixed for the lifetime of the connection.
/// Once another open request moves the database to a newer version, every
/// request on this connection fails with `InvalidStateError`.
///
/// Clones refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    pub(crate) fn from_shared(shared: Arc<ConnectionShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<ConnectionShared> {
        &self.shared
    }

    /// Returns the identifier of this connection, unique per factory.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Returns the database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.slot.name
    }

    /// Returns the version this connection was opened at.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.shared.version
    }

    /// Returns the object store names, sorted.
    #[must_use]
    pub fn store_names(&self) -> &[String] {
        &self.shared.store_names
    }

    /// Returns true if the connection contains the named object store.
    #[must_use]
    pub fn contains_store(&self, name: &str) -> bool {
        self.shared.store_names.binary_search_by(|s| s.as_str().cmp(name)).is_ok()
    }

    /// Returns true once the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Starts a transaction over the given object stores.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateError` if the connection is closed and
    /// `NotFoundError` if a store is not part of this connection.
    pub fn transaction(&self, stores: &[&str], mode: TransactionMode) -> StorageResult<Transaction> {
        if self.is_closed() {
            return Err(StorageError::connection_closing());
        }
        if stores.is_empty() {
            return Err(StorageError::InvalidState(
                "a transaction needs at least one object store".into(),
            ));
        }
        if let Some(missing) = stores.iter().find(|s| !self.contains_store(s)) {
            return Err(StorageError::NotFound(format!(
                "object store \"{missing}\" is not part of database \"{}\"",
                self.name()
            )));
        }
        Ok(Transaction::new(
            Arc::clone(&self.shared),
            stores.iter().map(|s| (*s).to_string()).collect(),
            mode,
        ))
    }

    /// Closes the connection.
    ///
    /// Pending upgrades waiting on this connection proceed. Closing twice is
    /// a no-op. The close handler is not invoked for owner-initiated closes.
    pub fn close(&self) {
        if self.shared.mark_closed() {
            tracing::debug!(
                database = %self.name(),
                connection = self.id(),
                version = self.version(),
                "connection closed"
            );
            self.shared.slot.release(self.shared.id);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("version", &self.version())
            .field("stores", &self.store_names())
            .field("closed", &self.is_closed())
            .finish()
    }
}
