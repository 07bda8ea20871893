//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, record values and operation sequences,
//! plus a [`ModelStore`] that predicts what a [`Store`] should hold after
//! any sequence.

use proptest::prelude::*;
use serde_json::{Map, Value};
use stashdb_core::{merge_shallow, Store};
use std::collections::BTreeMap;

/// Strategy for generating record keys from a small alphabet, so that
/// sequences revisit keys often.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_string)
}

/// Strategy for generating valid collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for generating flat JSON objects.
pub fn record_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::sample::select(vec!["title", "done", "rank", "tag"]).prop_map(str::to_string),
        prop_oneof![
            any::<bool>().prop_map(Value::from),
            any::<i32>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
        ],
        0..4,
    )
    .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>()))
}

/// An operation against a store.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Insert a record
    Add {
        /// Record key
        key: String,
        /// Record value
        value: Value,
    },
    /// Insert or replace a record
    AddOrUpdate {
        /// Record key
        key: String,
        /// Record value
        value: Value,
    },
    /// Merge fields into a record
    Update {
        /// Record key
        key: String,
        /// Fields to merge
        partial: Value,
    },
    /// Remove a record
    Delete {
        /// Record key
        key: String,
    },
    /// Remove every record
    Clear,
    /// Read a record
    Get {
        /// Record key
        key: String,
    },
}

/// Strategy for generating store operations.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => (key_strategy(), record_strategy()).prop_map(|(key, value)| StoreOp::Add { key, value }),
        2 => (key_strategy(), record_strategy())
            .prop_map(|(key, value)| StoreOp::AddOrUpdate { key, value }),
        2 => (key_strategy(), record_strategy())
            .prop_map(|(key, partial)| StoreOp::Update { key, partial }),
        2 => key_strategy().prop_map(|key| StoreOp::Delete { key }),
        1 => Just(StoreOp::Clear),
        2 => key_strategy().prop_map(|key| StoreOp::Get { key }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op_strategy(), min_ops..max_ops)
}

/// What an operation is expected to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    /// The mutation succeeds.
    Ok,
    /// The mutation fails and leaves the store unchanged.
    Err,
    /// The read returns this value.
    Read(Option<Value>),
}

/// Reference model of a single collection.
#[derive(Debug, Clone, Default)]
pub struct ModelStore {
    records: BTreeMap<String, Value>,
}

impl ModelStore {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the records the model holds.
    pub fn records(&self) -> &BTreeMap<String, Value> {
        &self.records
    }

    /// Applies `op` and returns its expected outcome.
    pub fn apply(&mut self, op: &StoreOp) -> Expected {
        match op {
            StoreOp::Add { key, value } => {
                if self.records.contains_key(key) {
                    return Expected::Err;
                }
                self.records.insert(key.clone(), value.clone());
                Expected::Ok
            }
            StoreOp::AddOrUpdate { key, value } => {
                self.records.insert(key.clone(), value.clone());
                Expected::Ok
            }
            StoreOp::Update { key, partial } => match self.records.get_mut(key) {
                Some(existing) => match merge_shallow(existing, partial) {
                    Ok(merged) => {
                        *existing = merged;
                        Expected::Ok
                    }
                    Err(_) => Expected::Err,
                },
                None => Expected::Err,
            },
            StoreOp::Delete { key } => {
                self.records.remove(key);
                Expected::Ok
            }
            StoreOp::Clear => {
                self.records.clear();
                Expected::Ok
            }
            StoreOp::Get { key } => Expected::Read(self.records.get(key).cloned()),
        }
    }
}

/// Runs `op` against a real store and reports the observed outcome.
pub async fn execute(store: &Store, op: &StoreOp) -> Expected {
    fn outcome<T, E>(result: Result<T, E>) -> Expected {
        if result.is_ok() {
            Expected::Ok
        } else {
            Expected::Err
        }
    }

    match op {
        StoreOp::Add { key, value } => outcome(store.add(key, value.clone()).await),
        StoreOp::AddOrUpdate { key, value } => {
            outcome(store.add_or_update(key, value.clone()).await)
        }
        StoreOp::Update { key, partial } => outcome(store.update(key, partial.clone()).await),
        StoreOp::Delete { key } => outcome(store.delete(key).await),
        StoreOp::Clear => outcome(store.clear().await),
        StoreOp::Get { key } => Expected::Read(store.get(key).await),
    }
}

/// Replays `ops` against `store` and a fresh model, asserting that every
/// outcome and the final contents agree.
///
/// Returns the model for further checks.
pub async fn replay(store: &Store, ops: &[StoreOp]) -> ModelStore {
    let mut model = ModelStore::new();
    for (i, op) in ops.iter().enumerate() {
        let expected = model.apply(op);
        let actual = execute(store, op).await;
        assert_eq!(actual, expected, "operation {i} ({op:?}) diverged from the model");
    }
    assert_eq!(&store.list().await, model.records(), "final contents diverged");
    model
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
