//! # StashDB Storage
//!
//! The versioned, multi-store document database that StashDB runs on.
//!
//! A [`Factory`] is a storage domain holding named databases. Each database
//! has a version and a set of object stores; stores can only be created or
//! dropped while an [`OpenRequest`] moves the database to a higher version.
//! Open connections are told about such upgrades and must close before the
//! upgrade proceeds.
//!
//! Every committed change is appended to a per-database log held by a
//! [`StorageBackend`]. Backends are **opaque byte stores**; this crate owns
//! the log format and rebuilds each database by replaying it.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Requests
//!
//! Operations return a [`Request`], a future resolving exactly once with
//! the result or a [`StorageError`] naming the failure class.
//!
//! ## Example
//!
//! ```rust
//! use stashdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! assert_eq!(offset, 0);
//! assert_eq!(backend.read_all().unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod connection;
mod error;
mod factory;
mod fault;
mod file;
mod memory;
mod record;
mod request;
mod schema;
mod state;
mod transaction;

pub use backend::StorageBackend;
pub use connection::{CloseHandler, Connection, VersionChange, VersionChangeHandler};
pub use error::{StorageError, StorageResult};
pub use factory::{
    BlockedHandler, DatabaseInfo, Factory, OpenRequest, UpgradeCallback, DATABASE_EXTENSION,
};
pub use fault::{FaultHook, FaultPlan, Operation, OperationKind};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use record::{compute_crc32, decode_frames, encode_frames, LogRecord, FRAME_HEADER_SIZE};
pub use request::Request;
pub use schema::StoreSchema;
pub use transaction::{
    Cursor, KeyRange, ObjectStore, Transaction, TransactionMode, VersionChangeTransaction,
};
