//! Pure merge planning.

use crate::codec::{to_remote, RemoteRow};
use crate::types::{OwnerId, Record, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How to settle an id present on both sides with different contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keep the remote copy. Local edits to the record are discarded.
    #[default]
    RemoteWins,
    /// Keep the local copy and upload it over the remote one.
    LocalWins,
    /// Keep the remote copy, but fill fields the remote left empty from the
    /// local copy. Only `location` is optional, so only it can be filled.
    FieldMerge,
}

/// What a reconciliation pass will upload and why.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Rows for a single `upsert_many` batch.
    pub upserts: Vec<RemoteRow>,
    /// Local-only ids promoted to the remote.
    pub migrated: Vec<RecordId>,
    /// Shared ids whose two copies differed, so one side's fields were lost.
    pub overridden: Vec<RecordId>,
    /// Ids present on both sides.
    pub shared: Vec<RecordId>,
    /// Remote-only ids, left untouched.
    pub remote_only: Vec<RecordId>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.upserts.is_empty()
    }
}

/// Decide what to upload, given both sets.
///
/// Remote-only records are never deleted or rewritten. Output order follows
/// the local set for migrated and shared ids and the remote set for remote-only
/// ids.
pub fn plan(
    owner: &OwnerId,
    local: &[Record],
    remote: &[Record],
    strategy: MergeStrategy,
) -> ReconcilePlan {
    let remote_by_id: HashMap<RecordId, &Record> = remote.iter().map(|r| (r.id, r)).collect();
    let mut out = ReconcilePlan::default();

    for record in local {
        let Some(theirs) = remote_by_id.get(&record.id) else {
            out.migrated.push(record.id);
            out.upserts.push(to_remote(record, owner));
            continue;
        };

        out.shared.push(record.id);
        if record == *theirs {
            continue;
        }

        match strategy {
            MergeStrategy::RemoteWins => {
                out.overridden.push(record.id);
            }
            MergeStrategy::LocalWins => {
                out.overridden.push(record.id);
                out.upserts.push(to_remote(record, owner));
            }
            MergeStrategy::FieldMerge => {
                let merged = field_merge(record, theirs);
                if merged != *record {
                    out.overridden.push(record.id);
                }
                if merged != **theirs {
                    out.upserts.push(to_remote(&merged, owner));
                }
            }
        }
    }

    let local_ids: HashSet<RecordId> = local.iter().map(|r| r.id).collect();
    out.remote_only = remote
        .iter()
        .filter(|r| !local_ids.contains(&r.id))
        .map(|r| r.id)
        .collect();

    out
}

fn field_merge(local: &Record, remote: &Record) -> Record {
    let mut merged = remote.clone();
    if merged.location.is_none() {
        merged.location = local.location.clone();
    }
    merged
}
