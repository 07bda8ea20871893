//! Fault injection for exercising failure paths.
//!
//! A [`FaultHook`] installed on a [`Factory`](crate::Factory) is consulted
//! before every request. Returning an error fails the request with it
//! without touching any state.

use crate::error::StorageError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The kind of request being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Probing a database's version and stores.
    Describe,
    /// Opening a connection.
    Open,
    /// Reading a record.
    Get,
    /// Inserting a record.
    Add,
    /// Inserting or replacing a record.
    Put,
    /// Removing a record.
    Delete,
    /// Removing all records of a store.
    Clear,
    /// Counting records.
    Count,
    /// Opening or advancing a cursor.
    Cursor,
}

/// A request about to be executed.
#[derive(Debug, Clone, Copy)]
pub struct Operation<'a> {
    /// Database name.
    pub database: &'a str,
    /// Object store, for data requests.
    pub store: Option<&'a str>,
    /// Request kind.
    pub kind: OperationKind,
}

/// Callback deciding whether a request fails.
pub type FaultHook = Arc<dyn Fn(&Operation<'_>) -> Option<StorageError> + Send + Sync>;

#[derive(Debug)]
struct Rule {
    kind: OperationKind,
    error: StorageError,
    remaining: Option<usize>,
}

/// A scripted set of failures.
///
/// # Example
///
/// ```rust
/// use stashdb_storage::{Factory, FaultPlan, OperationKind, StorageError};
///
/// let plan = FaultPlan::new()
///     .fail_times(OperationKind::Put, StorageError::InvalidState("closing".into()), 2)
///     .shared();
/// let factory = Factory::in_memory();
/// factory.set_fault_hook(Some(plan.hook()));
/// ```
#[derive(Debug, Default)]
pub struct FaultPlan {
    store: Option<String>,
    rules: Mutex<Vec<Rule>>,
    attempts: Mutex<HashMap<OperationKind, usize>>,
}

impl FaultPlan {
    /// Creates an empty plan that fails nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the plan to data requests on one store.
    #[must_use]
    pub fn in_store(mut self, store: impl Into<String>) -> Self {
        self.store = Some(store.into());
        self
    }

    /// Fails the next `times` requests of `kind` with `error`.
    #[must_use]
    pub fn fail_times(self, kind: OperationKind, error: StorageError, times: usize) -> Self {
        self.rules.lock().push(Rule {
            kind,
            error,
            remaining: Some(times),
        });
        self
    }

    /// Fails every request of `kind` with `error`.
    #[must_use]
    pub fn fail_always(self, kind: OperationKind, error: StorageError) -> Self {
        self.rules.lock().push(Rule {
            kind,
            error,
            remaining: None,
        });
        self
    }

    /// Wraps the plan for sharing between the hook and the test.
    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Returns a hook that applies this plan.
    #[must_use]
    pub fn hook(self: &Arc<Self>) -> FaultHook {
        let plan = Arc::clone(self);
        Arc::new(move |op: &Operation<'_>| plan.check(op))
    }

    /// Returns how many matching requests of `kind` were attempted.
    #[must_use]
    pub fn attempts(&self, kind: OperationKind) -> usize {
        self.attempts.lock().get(&kind).copied().unwrap_or(0)
    }

    fn check(&self, op: &Operation<'_>) -> Option<StorageError> {
        if let Some(store) = &self.store {
            if op.store != Some(store.as_str()) {
                return None;
            }
        }
        *self.attempts.lock().entry(op.kind).or_insert(0) += 1;

        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .find(|r| r.kind == op.kind && r.remaining != Some(0))?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.error.clone())
    }
}
