//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryLog {
    bytes: Vec<u8>,
    /// Prefix of `bytes` covered by the last `sync` or `rewrite`.
    durable: usize,
}

/// A database log kept in memory.
///
/// Clones share the same log. The backend remembers how much of the log
/// was synced, so [`durable_copy`](InMemoryBackend::durable_copy) can model
/// what a crash would leave behind.
///
/// # Example
///
/// ```rust
/// use stashdb_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.append(b"synced").unwrap();
/// backend.sync().unwrap();
/// backend.append(b" lost").unwrap();
///
/// assert_eq!(backend.durable_copy().read_all().unwrap(), b"synced");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    log: Arc<Mutex<MemoryLog>>,
}

impl InMemoryBackend {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log that starts out holding `bytes`, all of them durable.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        let durable = bytes.len();
        Self {
            log: Arc::new(Mutex::new(MemoryLog { bytes, durable })),
        }
    }

    /// Returns a copy of the whole log, synced or not.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.log.lock().bytes.clone()
    }

    /// Returns an independent backend holding only the synced prefix.
    #[must_use]
    pub fn durable_copy(&self) -> Self {
        let log = self.log.lock();
        Self::with_data(log.bytes[..log.durable].to_vec())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut log = self.log.lock();
        let offset = log.bytes.len() as u64;
        log.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut log = self.log.lock();
        log.durable = log.bytes.len();
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.log.lock().bytes.len() as u64)
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        let mut log = self.log.lock();
        log.bytes = data.to_vec();
        log.durable = data.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_report_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.append(b"ab").unwrap(), 0);
        assert_eq!(backend.append(b"cde").unwrap(), 2);
        assert_eq!(backend.read_all().unwrap(), b"abcde");
    }

    #[test]
    fn unsynced_tail_is_not_durable() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"one").unwrap();
        backend.sync().unwrap();
        backend.append(b"two").unwrap();

        let survivor = backend.durable_copy();
        assert_eq!(survivor.read_all().unwrap(), b"one");
        assert_eq!(backend.size().unwrap(), 6);
    }

    #[test]
    fn rewrite_is_durable() {
        let mut backend = InMemoryBackend::with_data(b"old log".to_vec());
        backend.append(b"+").unwrap();
        backend.rewrite(b"snap").unwrap();
        assert_eq!(backend.durable_copy().read_all().unwrap(), b"snap");
    }

    #[test]
    fn clones_share_the_log() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.clone();
        writer.append(b"shared").unwrap();
        assert_eq!(reader.data(), b"shared");
    }
}
