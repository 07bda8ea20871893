//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store holding one database's log.
///
/// Backends are **opaque byte stores**. They know nothing about log records,
/// versions or object stores; the engine owns all interpretation of the
/// bytes.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte appended or rewritten so far
/// - `sync` makes all appended data durable
/// - `rewrite` atomically replaces the whole content
/// - Backends must be `Send + Sync` so the engine can share them across tasks
pub trait StorageBackend: Send + Sync {
    /// Reads the complete content of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Replaces the whole content with `data`.
    ///
    /// Used to compact the log into a snapshot after a version change.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be replaced. On error the
    /// previous content must still be readable.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
