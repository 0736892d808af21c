//! File-backed local slot.

use super::LocalStore;
use crate::error::PersistenceError;
use crate::types::Record;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Default slot name.
pub const DEFAULT_SLOT: &str = "expenses";

/// Stores the record set as `<dir>/<slot>.json`.
///
/// Writes go to a temporary sibling that is then renamed over the slot, so a
/// reader never sees a half-written file. An exclusive lock on
/// `<dir>/<slot>.lock` is held while the store is open.
pub struct FileLocalStore {
    /// Path of the slot file.
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl FileLocalStore {
    /// Open (or create) the slot `slot` under `dir`.
    pub fn open(dir: impl AsRef<Path>, slot: &str) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let lock_file = Self::acquire_lock(&dir.join(format!("{slot}.lock")))?;

        Ok(Self {
            path: dir.join(format!("{slot}.json")),
            _lock_file: lock_file,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the slot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_lock(path: &Path) -> Result<File, PersistenceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| PersistenceError::Locked)?;

        Ok(file)
    }

    fn read_slot(&self) -> Result<Vec<Record>, PersistenceError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&content).map_err(|e| PersistenceError::Decode(e.to_string()))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LocalStore for FileLocalStore {
    fn load(&self) -> Vec<Record> {
        self.read_slot().unwrap_or_else(|e| {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "local slot unreadable, starting empty"
            );
            Vec::new()
        })
    }

    fn save(&self, records: &[Record]) -> Result<(), PersistenceError> {
        let _lock = self.write_lock.lock();

        let encoded =
            serde_json::to_vec(records).map_err(|e| PersistenceError::Encode(e.to_string()))?;

        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(count = records.len(), "local slot written");
        Ok(())
    }
}
