//! On-disk journal for outbox intents.
//!
//! Layout: 4 magic bytes, a version byte, then entries. Each entry is a
//! little-endian `u32` length, a MessagePack body, and a CRC32 of the body.
//! Completion is recorded by appending a `Completed` marker rather than
//! rewriting in place. On open the journal is compacted to its pending
//! entries, which also discards a torn tail left by a crash.

use super::Intent;
use crate::error::{Result, SyncError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"OBX\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Upper bound on a single entry.
const MAX_ENTRY_BYTES: usize = 16 * 1024 * 1024;

/// Journal entry status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Intent is waiting for delivery.
    Pending,
    /// Intent was delivered or abandoned.
    Completed,
}

/// A single journal entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub status: EntryStatus,
    /// Present on `Pending` entries only.
    pub intent: Option<Intent>,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

impl JournalEntry {
    pub fn pending(seq: u64, intent: Intent) -> Self {
        Self {
            seq,
            status: EntryStatus::Pending,
            intent: Some(intent),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn completed(seq: u64) -> Self {
        Self {
            seq,
            status: EntryStatus::Completed,
            intent: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Append-only intent journal.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl Journal {
    /// Open or create the journal, returning it with the intents still
    /// pending, ordered by sequence number.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<(u64, Intent)>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pending = if path.exists() {
            Self::replay(&path)?
        } else {
            Vec::new()
        };

        Self::rewrite(&path, &pending)?;
        let writer = BufWriter::new(OpenOptions::new().append(true).open(&path)?);

        Ok((
            Self {
                path,
                writer: Mutex::new(Some(writer)),
            },
            pending,
        ))
    }

    /// Append an entry and fsync.
    ///
    /// A write that fails part way is cut off again, so the file always ends
    /// on a whole frame.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let frame = Self::frame(entry)?;

        let mut writer = self.writer.lock();
        let w = writer
            .as_mut()
            .ok_or_else(|| SyncError::Corruption("Outbox journal is not writable".into()))?;

        let good_len = w.get_ref().metadata()?.len();
        if let Err(e) = write_synced(w, &frame) {
            tracing::error!(error = %e, "outbox append failed, truncating torn entry");
            self.truncate_to(&mut writer, good_len)?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop every entry (called once nothing is pending).
    pub fn reset(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        *writer = None;

        Self::rewrite(&self.path, &[])?;

        *writer = Some(BufWriter::new(
            OpenOptions::new().append(true).open(&self.path)?,
        ));
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cut the file back to `len` bytes and reopen the writer at the end.
    fn truncate_to(&self, writer: &mut Option<BufWriter<File>>, len: u64) -> Result<()> {
        // Dropping the writer may push out more of the torn frame; the
        // truncate below removes it as well.
        *writer = None;

        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()?;

        *writer = Some(BufWriter::new(
            OpenOptions::new().append(true).open(&self.path)?,
        ));
        Ok(())
    }

    /// Read all entries, stopping at the first unreadable one.
    fn replay(path: &Path) -> Result<Vec<(u64, Intent)>> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != JOURNAL_MAGIC {
            return Err(SyncError::InvalidFormat("Invalid outbox journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(SyncError::InvalidFormat(format!(
                "Unsupported outbox journal version: {}",
                version[0]
            )));
        }

        let mut pending = BTreeMap::new();
        let mut completed = HashSet::new();

        loop {
            match Self::read_entry(&mut reader) {
                Ok(entry) => match (entry.status, entry.intent) {
                    (EntryStatus::Pending, Some(intent)) => {
                        pending.insert(entry.seq, intent);
                    }
                    (EntryStatus::Completed, _) => {
                        completed.insert(entry.seq);
                    }
                    (EntryStatus::Pending, None) => {
                        tracing::warn!(seq = entry.seq, "pending journal entry without intent");
                    }
                },
                Err(SyncError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    tracing::warn!(error = %e, "outbox journal has a damaged tail, ignoring it");
                    break;
                }
            }
        }

        Ok(pending
            .into_iter()
            .filter(|(seq, _)| !completed.contains(seq))
            .collect())
    }

    /// Replace the file with a header plus the given pending intents.
    fn rewrite(path: &Path, pending: &[(u64, Intent)]) -> Result<()> {
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            w.write_all(JOURNAL_MAGIC)?;
            w.write_all(&[JOURNAL_VERSION])?;
            for (seq, intent) in pending {
                Self::write_entry(&mut w, &JournalEntry::pending(*seq, intent.clone()))?;
            }
            w.flush()?;
            w.get_ref().sync_all()?;
        }

        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_entry<W: Write>(writer: &mut W, entry: &JournalEntry) -> Result<()> {
        writer.write_all(&Self::frame(entry)?)?;
        Ok(())
    }

    /// Length prefix, MessagePack body, CRC32 of the body.
    fn frame(entry: &JournalEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec_named(entry)?;
        let checksum = crc32fast::hash(&encoded);

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&checksum.to_le_bytes());
        Ok(frame)
    }

    fn read_entry<R: Read>(reader: &mut R) -> Result<JournalEntry> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_BYTES {
            return Err(SyncError::Corruption("Journal entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(SyncError::Corruption("Journal checksum mismatch".into()));
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }
}

fn write_synced(w: &mut BufWriter<File>, frame: &[u8]) -> std::io::Result<()> {
    w.write_all(frame)?;
    w.flush()?;
    w.get_ref().sync_all()
}
