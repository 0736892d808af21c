//! Durable outbox of remote mutations.
//!
//! Every local mutation made while a session exists enqueues an [`Intent`].
//! A drainer task delivers intents to the remote store, retrying transient
//! failures with exponential backoff, and removes each intent once it is
//! delivered or abandoned. Intents survive restarts when the outbox is backed
//! by a journal file.

mod drainer;
mod journal;

pub use drainer::{DrainReport, RetryPolicy};
pub(crate) use drainer::Drainer;
pub use journal::{EntryStatus, Journal, JournalEntry};

use crate::codec::RemoteRow;
use crate::error::Result;
use crate::types::{MutationOp, OwnerId, RecordId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

/// A remote mutation waiting to be delivered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Intent {
    Insert { row: RemoteRow },
    Update { row: RemoteRow },
    Delete { id: RecordId, owner: OwnerId },
}

impl Intent {
    pub fn record_id(&self) -> RecordId {
        match self {
            Intent::Insert { row } | Intent::Update { row } => row.id,
            Intent::Delete { id, .. } => *id,
        }
    }

    pub fn owner(&self) -> &OwnerId {
        match self {
            Intent::Insert { row } | Intent::Update { row } => &row.user_id,
            Intent::Delete { owner, .. } => owner,
        }
    }

    pub fn op(&self) -> MutationOp {
        match self {
            Intent::Insert { .. } => MutationOp::Create,
            Intent::Update { .. } => MutationOp::Update,
            Intent::Delete { .. } => MutationOp::Delete,
        }
    }
}

/// An intent plus its delivery bookkeeping.
///
/// Attempt counts and retry deadlines live in memory only; after a restart
/// every replayed intent is due immediately.
#[derive(Clone, Debug)]
pub struct PendingIntent {
    pub seq: u64,
    pub intent: Intent,
    pub attempts: u32,
    pub not_before: Option<Instant>,
    /// The row may already be on the remote (an earlier attempt, a crash
    /// before completion was journaled, or a reconciliation uploaded it).
    /// Inserts are then delivered as upserts.
    pub may_exist: bool,
}

impl PendingIntent {
    pub fn is_due(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }
}

#[derive(Default)]
struct OutboxState {
    next_seq: u64,
    pending: BTreeMap<u64, PendingIntent>,
}

/// Ordered queue of pending intents, optionally journaled to disk.
pub struct Outbox {
    journal: Option<Journal>,
    state: Mutex<OutboxState>,
}

impl Outbox {
    /// Open a journaled outbox, replaying whatever is still pending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (journal, replayed) = Journal::open(path)?;

        let mut state = OutboxState {
            next_seq: 1,
            pending: BTreeMap::new(),
        };
        for (seq, intent) in replayed {
            state.next_seq = state.next_seq.max(seq + 1);
            state.pending.insert(
                seq,
                PendingIntent {
                    seq,
                    intent,
                    attempts: 0,
                    not_before: None,
                    may_exist: true,
                },
            );
        }

        if !state.pending.is_empty() {
            tracing::info!(pending = state.pending.len(), "replayed outbox intents");
        }

        Ok(Self {
            journal: Some(journal),
            state: Mutex::new(state),
        })
    }

    /// An outbox that forgets everything on drop.
    pub fn in_memory() -> Self {
        Self {
            journal: None,
            state: Mutex::new(OutboxState {
                next_seq: 1,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// Queue an intent (returns its sequence number).
    pub fn enqueue(&self, intent: Intent) -> Result<u64> {
        let mut state = self.state.lock();
        let seq = state.next_seq;

        if let Some(journal) = &self.journal {
            journal.append(&JournalEntry::pending(seq, intent.clone()))?;
        }

        state.next_seq += 1;
        state.pending.insert(
            seq,
            PendingIntent {
                seq,
                intent,
                attempts: 0,
                not_before: None,
                may_exist: false,
            },
        );
        Ok(seq)
    }

    /// Remove a delivered or abandoned intent.
    pub fn complete(&self, seq: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.pending.remove(&seq).is_none() {
            return Ok(());
        }

        if let Some(journal) = &self.journal {
            if state.pending.is_empty() {
                journal.reset()?;
            } else {
                journal.append(&JournalEntry::completed(seq))?;
            }
        }
        Ok(())
    }

    /// Record a failed attempt and when to try again. Returns the attempt count.
    pub fn defer(&self, seq: u64, retry_at: Instant) -> u32 {
        let mut state = self.state.lock();
        match state.pending.get_mut(&seq) {
            Some(entry) => {
                entry.attempts += 1;
                entry.not_before = Some(retry_at);
                entry.may_exist = true;
                entry.attempts
            }
            None => 0,
        }
    }

    /// Flag every pending intent of `owner` as possibly already applied.
    pub fn mark_may_exist(&self, owner: &OwnerId) {
        let mut state = self.state.lock();
        for entry in state.pending.values_mut() {
            if entry.intent.owner() == owner {
                entry.may_exist = true;
            }
        }
    }

    /// All pending intents in sequence order.
    pub fn pending(&self) -> Vec<PendingIntent> {
        self.state.lock().pending.values().cloned().collect()
    }

    /// Pending intents owned by `owner`, in sequence order.
    pub fn pending_for(&self, owner: &OwnerId) -> Vec<PendingIntent> {
        self.state
            .lock()
            .pending
            .values()
            .filter(|p| p.intent.owner() == owner)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Whether intents are written to disk.
    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::to_remote;
    use crate::types::{Category, Record};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tempfile::TempDir;

    fn insert_intent(owner: &str) -> Intent {
        let record = Record {
            id: RecordId::new(),
            name: "Socks".into(),
            amount: 4.0,
            category: Category::Clothes,
            location: None,
            occurred_at: Utc.with_ymd_and_hms(2024, 9, 9, 9, 0, 0).unwrap(),
        };
        Intent::Insert {
            row: to_remote(&record, &OwnerId::new(owner)),
        }
    }

    #[test]
    fn test_enqueue_and_complete() {
        let outbox = Outbox::in_memory();
        let a = outbox.enqueue(insert_intent("alice")).unwrap();
        let b = outbox.enqueue(insert_intent("alice")).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(outbox.len(), 2);

        outbox.complete(a).unwrap();
        let pending = outbox.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, b);

        // Completing twice is harmless.
        outbox.complete(a).unwrap();
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn test_pending_for_filters_owner() {
        let outbox = Outbox::in_memory();
        outbox.enqueue(insert_intent("alice")).unwrap();
        outbox.enqueue(insert_intent("bob")).unwrap();

        let alice = outbox.pending_for(&OwnerId::new("alice"));
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].intent.owner().as_str(), "alice");
    }

    #[test]
    fn test_defer_tracks_attempts() {
        let outbox = Outbox::in_memory();
        let seq = outbox.enqueue(insert_intent("alice")).unwrap();
        let later = Instant::now() + Duration::from_secs(60);

        assert_eq!(outbox.defer(seq, later), 1);
        assert_eq!(outbox.defer(seq, later), 2);

        let pending = &outbox.pending()[0];
        assert!(!pending.is_due(Instant::now()));
        assert!(pending.is_due(later));
        assert!(pending.may_exist);
    }

    #[test]
    fn test_mark_may_exist_is_per_owner() {
        let outbox = Outbox::in_memory();
        outbox.enqueue(insert_intent("alice")).unwrap();
        outbox.enqueue(insert_intent("bob")).unwrap();

        outbox.mark_may_exist(&OwnerId::new("alice"));

        let flags: Vec<bool> = outbox.pending().iter().map(|p| p.may_exist).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn test_durable_outbox_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outbox.log");
        let kept = insert_intent("alice");

        {
            let outbox = Outbox::open(&path).unwrap();
            assert!(outbox.is_durable());
            let done = outbox.enqueue(insert_intent("alice")).unwrap();
            outbox.enqueue(kept.clone()).unwrap();
            outbox.complete(done).unwrap();
        }

        let outbox = Outbox::open(&path).unwrap();
        let pending = outbox.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].intent, kept);
        assert_eq!(pending[0].attempts, 0);
        assert!(pending[0].may_exist);

        // Sequence numbers continue after the replayed ones.
        assert_eq!(outbox.enqueue(insert_intent("alice")).unwrap(), 3);
    }
}
