//! # StashDB Core
//!
//! Named document collections on top of [`stashdb_storage`].
//!
//! This crate provides:
//! - A connection manager ([`Db`]) that upgrades the schema on demand
//! - Collection engines ([`Store`]) with retry-on-conflict
//! - Per-collection change and error notifications ([`EventBus`])
//! - A per-context [`Registry`] and a self-updating [`LiveStore`] view
//!
//! Collections are declared lazily. The first time a collection is used,
//! the manager reopens the database at the next version and creates it.
//! Other connections to the same database are asked to close first and
//! reconnect on their next operation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binding;
mod config;
mod convention;
mod db;
mod error;
mod events;
mod registry;
mod request;
mod stats;
mod store;

pub use binding::{LiveStore, Mutations};
pub use config::{Config, RetryConfig, DEFAULT_DATABASE_NAME};
pub use convention::{safe_call, safe_void_call};
pub use db::Db;
pub use error::{CoreError, CoreResult};
pub use events::{listener, Change, EventBus, EventKind, Listener, StoreEvent};
pub use registry::Registry;
pub use request::settle;
pub use stats::{DbStats, StatsSnapshot};
pub use store::{merge_shallow, Store};

pub use stashdb_storage::{Factory, FaultPlan, KeyRange, StoreSchema};
