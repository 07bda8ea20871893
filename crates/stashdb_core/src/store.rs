//! Collection engine.
//!
//! A [`Store`] is the per-collection CRUD surface. Each operation:
//!
//! 1. waits for the collection to be registered with the [`Db`],
//! 2. obtains a fresh transaction-scoped handle,
//! 3. runs the request, retrying version conflicts with a fixed backoff,
//! 4. publishes exactly one change or error event.

use crate::config::RetryConfig;
use crate::convention::{lenient, strict};
use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::events::{Change, EventBus, EventKind, Listener};
use crate::request::settle;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use stashdb_storage::{KeyRange, StoreSchema};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::debug;

type InitFuture = Shared<BoxFuture<'static, CoreResult<()>>>;

#[derive(Default)]
struct InitState {
    ready: bool,
    generation: u64,
    future: Option<InitFuture>,
}

struct StoreInner {
    name: String,
    schema: Option<StoreSchema>,
    db: Db,
    retry: RetryConfig,
    bus: EventBus,
    init: Mutex<InitState>,
}

/// One named collection.
///
/// Clones share the same collection state and event bus. Use a
/// [`Registry`](crate::Registry) to get at most one engine per name.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Creates the engine for `name` and starts registering it.
    ///
    /// Registration is driven in the background when a Tokio runtime is
    /// available; otherwise it runs with the first operation.
    #[must_use]
    pub fn new(db: Db, name: impl Into<String>, schema: Option<StoreSchema>) -> Self {
        let retry = db.config().retry;
        let store = Self {
            inner: Arc::new(StoreInner {
                name: name.into(),
                schema,
                db,
                retry,
                bus: EventBus::new(),
                init: Mutex::new(InitState::default()),
            }),
        };

        let future = {
            let mut init = store.inner.init.lock();
            StoreInner::start_init(&store.inner, &mut init)
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = future.await;
            });
        }
        store
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the declared schema.
    #[must_use]
    pub fn schema(&self) -> Option<&StoreSchema> {
        self.inner.schema.as_ref()
    }

    /// Returns the connection manager.
    #[must_use]
    pub fn db(&self) -> &Db {
        &self.inner.db
    }

    /// Returns the event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Registers a listener; see [`EventBus::subscribe`].
    pub fn subscribe(&self, kind: EventKind, listener: Listener) {
        self.inner.bus.subscribe(kind, listener);
    }

    /// Removes a listener; see [`EventBus::unsubscribe`].
    pub fn unsubscribe(&self, kind: EventKind, listener: &Listener) -> bool {
        self.inner.bus.unsubscribe(kind, listener)
    }

    /// Reads one record. Lenient: failures yield `None`.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let result = self
            .with_retry("get", || async move {
                let handle = self.handle().await?;
                settle(handle.get(key)).await
            })
            .await;
        lenient(self.name(), "get", &self.inner.bus, result)
    }

    /// Reads every record, keyed by record key. Lenient: failures yield an
    /// empty map.
    pub async fn list(&self) -> BTreeMap<String, Value> {
        let result = self.with_retry("list", || self.scan()).await;
        lenient(self.name(), "list", &self.inner.bus, result)
    }

    /// Counts the records. Lenient: failures yield 0.
    pub async fn count(&self) -> usize {
        let result = self
            .with_retry("count", || async move {
                let handle = self.handle().await?;
                settle(handle.count()).await
            })
            .await;
        lenient(self.name(), "count", &self.inner.bus, result)
    }

    /// Returns true if a record is stored under `key`. Lenient: failures
    /// yield false.
    pub async fn contains(&self, key: &str) -> bool {
        let result = self
            .with_retry("contains", || async move {
                let handle = self.handle().await?;
                Ok(settle(handle.get(key)).await?.is_some())
            })
            .await;
        lenient(self.name(), "contains", &self.inner.bus, result)
    }

    /// Inserts a record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if `key` already exists.
    pub async fn add(&self, key: &str, value: Value) -> CoreResult<String> {
        let result = self
            .with_retry("add", || {
                let value = value.clone();
                async move {
                    let handle = self.handle().await?;
                    settle(handle.add(value, Some(key))).await
                }
            })
            .await;
        strict(self.name(), "add", &self.inner.bus, result, |key| Change::Add {
            key: key.clone(),
            value: value.clone(),
        })
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// Fails if the value is rejected or the request fails.
    pub async fn add_or_update(&self, key: &str, value: Value) -> CoreResult<String> {
        let result = self
            .with_retry("add_or_update", || {
                let value = value.clone();
                async move {
                    let handle = self.handle().await?;
                    settle(handle.put(value, Some(key))).await
                }
            })
            .await;
        strict(self.name(), "add_or_update", &self.inner.bus, result, |key| Change::Upsert {
            key: key.clone(),
            value: value.clone(),
        })
    }

    /// Merges `partial` into the record under `key`, one level deep.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no record exists and
    /// [`CoreError::Validation`] if `partial` is not an object.
    pub async fn update(&self, key: &str, partial: Value) -> CoreResult<String> {
        let result = self
            .with_retry("update", || self.merge_into(key, &partial))
            .await;
        strict(self.name(), "update", &self.inner.bus, result, |key| Change::Update {
            key: key.clone(),
        })
    }

    /// Removes a record. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Fails if the request fails.
    pub async fn delete(&self, key: &str) -> CoreResult<()> {
        let result = self
            .with_retry("delete", || async move {
                let handle = self.handle().await?;
                settle(handle.delete(key)).await
            })
            .await;
        strict(self.name(), "delete", &self.inner.bus, result, |_| Change::Delete {
            key: key.to_string(),
        })
    }

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Fails if the request fails.
    pub async fn clear(&self) -> CoreResult<()> {
        let result = self
            .with_retry("clear", || async move {
                self.inner.ensure_initialized().await?;
                self.inner.db.clear_store(self.name()).await
            })
            .await;
        strict(self.name(), "clear", &self.inner.bus, result, |_| Change::Clear)
    }

    /// Drops the collection from the database.
    ///
    /// A later operation on this engine recreates the collection, empty.
    ///
    /// # Errors
    ///
    /// Fails if the upgrade dropping the collection fails.
    pub async fn destroy(&self) -> CoreResult<()> {
        let result = self
            .with_retry("destroy", || self.inner.db.delete_store(self.name()))
            .await;
        if result.is_ok() {
            self.inner.reset_init();
        }
        strict(self.name(), "destroy", &self.inner.bus, result, |_| Change::Destroy)
    }

    async fn handle(&self) -> CoreResult<stashdb_storage::ObjectStore> {
        self.inner.ensure_initialized().await?;
        self.inner.db.store_handle(self.name()).await
    }

    async fn scan(&self) -> CoreResult<BTreeMap<String, Value>> {
        let handle = self.handle().await?;
        let mut records = BTreeMap::new();
        let mut cursor = settle(handle.open_cursor(KeyRange::all())).await?;
        while let Some(current) = cursor {
            records.insert(current.key().to_string(), current.value().clone());
            cursor = settle(current.advance()).await?;
        }
        Ok(records)
    }

    async fn merge_into(&self, key: &str, partial: &Value) -> CoreResult<String> {
        let handle = self.handle().await?;
        let Some(cursor) = settle(handle.open_cursor(KeyRange::only(key))).await? else {
            return Err(CoreError::not_found(format!(
                "Item with key {key} not found in store {}",
                self.name()
            )));
        };
        let merged = merge_shallow(cursor.value(), partial)?;
        settle(cursor.update(merged)).await?;
        Ok(key.to_string())
    }

    /// Runs `operation`, retrying version conflicts.
    ///
    /// Each retry waits the configured delay and forces the collection to be
    /// registered again, which reopens the connection.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut operation: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Err(err) if err.is_conflict() && retries < self.inner.retry.max_retries => {
                    retries += 1;
                    debug!(
                        store = %self.name(),
                        op,
                        retry = retries,
                        error = %err,
                        "version conflict; retrying"
                    );
                    tokio::time::sleep(self.inner.retry.delay).await;
                    self.inner.reset_init();
                }
                result => return result,
            }
        }
    }
}

impl StoreInner {
    /// Installs a fresh registration future. The caller holds the init lock.
    fn start_init(this: &Arc<Self>, init: &mut InitState) -> InitFuture {
        init.generation += 1;
        let generation = init.generation;
        let db = this.db.clone();
        let name = this.name.clone();
        let schema = this.schema.clone();
        let weak: Weak<Self> = Arc::downgrade(this);

        let future = async move {
            let result = db.create_store(&name, schema).await;
            if let Some(inner) = weak.upgrade() {
                let mut init = inner.init.lock();
                if init.generation == generation {
                    init.future = None;
                    init.ready = result.is_ok();
                }
            }
            result
        }
        .boxed()
        .shared();
        init.future = Some(future.clone());
        future
    }

    async fn ensure_initialized(self: &Arc<Self>) -> CoreResult<()> {
        let future = {
            let mut init = self.init.lock();
            if init.ready {
                return Ok(());
            }
            match &init.future {
                Some(future) => future.clone(),
                None => Self::start_init(self, &mut init),
            }
        };
        future.await
    }

    fn reset_init(&self) {
        let mut init = self.init.lock();
        init.generation += 1;
        init.ready = false;
        init.future = None;
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("schema", &self.inner.schema)
            .field("bus", &self.inner.bus)
            .finish()
    }
}

/// Merges the top-level fields of `partial` over `existing`.
///
/// A non-object record is replaced by `partial` as a whole.
///
/// # Errors
///
/// Returns [`CoreError::Validation`] if `partial` is not an object.
pub fn merge_shallow(existing: &Value, partial: &Value) -> CoreResult<Value> {
    let Some(fields) = partial.as_object() else {
        return Err(CoreError::validation("partial update must be a JSON object"));
    };
    let mut merged = match existing {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    for (field, value) in fields {
        merged.insert(field.clone(), value.clone());
    }
    Ok(Value::Object(merged))
}
