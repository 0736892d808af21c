//! Remote, owner-scoped record collection.
//!
//! The engine only talks to the remote through [`RemoteStore`]. Every call is
//! asynchronous and fails independently; nothing here retries.

mod memory;

pub use memory::MemoryRemote;

use crate::codec::RemoteRow;
use crate::error::RemoteError;
use crate::types::{OwnerId, RecordId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// CRUD contract against the remote collection.
///
/// Implementations handle the network and query language of the backing
/// store. Rows carry their owner in `user_id`; reads and deletes are scoped
/// by the owner passed in.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All rows belonging to `owner`.
    async fn fetch_all(&self, owner: &OwnerId) -> Result<Vec<RemoteRow>, RemoteError>;

    /// Insert a new row. Fails if the id already exists.
    async fn insert(&self, row: RemoteRow) -> Result<(), RemoteError>;

    /// Replace the row with the same id and owner. Matching nothing is not an
    /// error.
    async fn update(&self, row: RemoteRow) -> Result<(), RemoteError>;

    /// Delete the row with this id and owner. Matching nothing is not an
    /// error.
    async fn delete(&self, id: &RecordId, owner: &OwnerId) -> Result<(), RemoteError>;

    /// Insert or replace by id. Must be idempotent.
    async fn upsert_many(&self, rows: Vec<RemoteRow>) -> Result<(), RemoteError>;
}

/// Remote operation names, used for logging and failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOp {
    FetchAll,
    Insert,
    Update,
    Delete,
    UpsertMany,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteOp::FetchAll => "fetch_all",
            RemoteOp::Insert => "insert",
            RemoteOp::Update => "update",
            RemoteOp::Delete => "delete",
            RemoteOp::UpsertMany => "upsert_many",
        };
        f.write_str(name)
    }
}
