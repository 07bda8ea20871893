//! Per-context store registry.

use crate::config::Config;
use crate::db::Db;
use crate::store::Store;
use parking_lot::Mutex;
use stashdb_storage::{Factory, StoreSchema};
use std::collections::HashMap;

/// Owns one [`Db`] and at most one [`Store`] per collection name.
///
/// An application holds one registry per execution context. Contexts that
/// share a [`Factory`] see each other's schema upgrades.
///
/// # Example
///
/// ```rust
/// use stashdb_core::Registry;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let registry = Registry::in_memory();
/// let todos = registry.store("todos", None);
/// todos.add("t1", json!({"title": "write docs"})).await.unwrap();
/// assert_eq!(todos.count().await, 1);
/// # }
/// ```
#[derive(Debug)]
pub struct Registry {
    db: Db,
    stores: Mutex<HashMap<String, Store>>,
}

impl Registry {
    /// Creates a registry for a database in `factory`.
    #[must_use]
    pub fn new(factory: Factory, config: Config) -> Self {
        Self {
            db: Db::new(factory, config),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a registry over a fresh in-memory storage domain.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Factory::in_memory(), Config::default())
    }

    /// Returns the connection manager.
    #[must_use]
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Returns the engine for `name`, creating it on first request.
    ///
    /// The schema only matters the first time a name is requested.
    pub fn store(&self, name: &str, schema: Option<StoreSchema>) -> Store {
        self.stores
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Store::new(self.db.clone(), name, schema))
            .clone()
    }

    /// Returns the names of the engines created so far, sorted.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Forgets every engine and closes the connection.
    ///
    /// Engines handed out earlier keep working against the same manager;
    /// later calls to [`store`](Registry::store) create new ones.
    pub fn reset(&self) {
        self.stores.lock().clear();
        self.db.close();
    }
}
