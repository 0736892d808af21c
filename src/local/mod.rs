//! Device-local persistence of the full record set.
//!
//! The local store holds exactly one slot: the serialized record set. It is
//! read once at startup and overwritten after every change to the in-memory
//! set. Anything unreadable is treated as "no data".

mod file;

pub use file::{FileLocalStore, DEFAULT_SLOT};

use crate::error::PersistenceError;
use crate::types::Record;
use parking_lot::Mutex;

/// Synchronous key-value persistence of the record set.
pub trait LocalStore: Send + Sync {
    /// Read the persisted set. Returns an empty vector when nothing is stored
    /// or the content cannot be parsed.
    fn load(&self) -> Vec<Record>;

    /// Replace the persisted set.
    fn save(&self, records: &[Record]) -> Result<(), PersistenceError>;
}

/// Volatile local store, for tests and for hosts without a writable disk.
#[derive(Default)]
pub struct MemoryLocalStore {
    slot: Mutex<Option<String>>,
    fail_saves: Mutex<bool>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given records already persisted.
    pub fn with_records(records: &[Record]) -> Self {
        let store = Self::new();
        *store.slot.lock() = serde_json::to_string(records).ok();
        store
    }

    /// Start with raw slot content (which may be malformed).
    pub fn with_raw(content: impl Into<String>) -> Self {
        let store = Self::new();
        *store.slot.lock() = Some(content.into());
        store
    }

    /// Make subsequent saves fail, simulating storage exhaustion.
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock() = fail;
    }

    /// Raw slot content, if any.
    pub fn raw(&self) -> Option<String> {
        self.slot.lock().clone()
    }
}

impl LocalStore for MemoryLocalStore {
    fn load(&self) -> Vec<Record> {
        let slot = self.slot.lock();
        match slot.as_deref() {
            None => Vec::new(),
            Some(content) => serde_json::from_str(content).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "local slot unparsable, starting empty");
                Vec::new()
            }),
        }
    }

    fn save(&self, records: &[Record]) -> Result<(), PersistenceError> {
        if *self.fail_saves.lock() {
            return Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated storage failure",
            )));
        }
        let encoded =
            serde_json::to_string(records).map_err(|e| PersistenceError::Encode(e.to_string()))?;
        *self.slot.lock() = Some(encoded);
        Ok(())
    }
}
