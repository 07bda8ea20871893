//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Extension of the snapshot written next to the log during a rewrite.
const SNAPSHOT_EXTENSION: &str = "snapshot";

#[derive(Debug)]
struct LogFile {
    file: File,
    len: u64,
}

/// A database log stored in one file.
///
/// The file is created together with its parent directories and is held
/// under an exclusive `fs2` lock while the backend lives. A second backend
/// on the same path fails with [`StorageError::Locked`].
///
/// `sync` calls `File::sync_all`. `rewrite` writes and syncs a snapshot
/// file, then renames it over the log, so a crash leaves either the old or
/// the new log.
///
/// # Example
///
/// ```no_run
/// use stashdb_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("data/app.stashdb")).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    log: Mutex<LogFile>,
}

impl FileBackend {
    /// Opens the log at `path`, creating it and its directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if the file is already held, or an
    /// I/O error if it cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = lock(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            log: Mutex::new(LogFile { file, len }),
        })
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock(path: &Path) -> StorageResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.try_lock_exclusive()
        .map_err(|_| StorageError::Locked(format!("{} is in use", path.display())))?;
    Ok(file)
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut log = self.log.lock();
        let mut bytes = Vec::with_capacity(usize::try_from(log.len).unwrap_or_default());
        log.file.seek(SeekFrom::Start(0))?;
        log.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let log = self.log.get_mut();
        let offset = log.len;
        if !data.is_empty() {
            log.file.seek(SeekFrom::End(0))?;
            log.file.write_all(data)?;
            log.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.log.get_mut().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.log.lock().len)
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        let snapshot = self.path.with_extension(SNAPSHOT_EXTENSION);
        let mut staged = File::create(&snapshot)?;
        staged.write_all(data)?;
        staged.sync_all()?;
        drop(staged);

        let log = self.log.get_mut();
        // The lock belongs to the open handle; release it for the rename and
        // take it again on the replacement.
        let _ = FileExt::unlock(&log.file);
        if let Err(err) = fs::rename(&snapshot, &self.path) {
            log.file.try_lock_exclusive()?;
            let _ = fs::remove_file(&snapshot);
            return Err(err.into());
        }
        *log = LogFile {
            file: lock(&self.path)?,
            len: data.len() as u64,
        };
        Ok(())
    }
}
