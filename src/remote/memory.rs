//! In-memory remote collection with failure injection.

use super::{RemoteOp, RemoteStore};
use crate::codec::RemoteRow;
use crate::error::RemoteError;
use crate::types::{OwnerId, RecordId};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// A remote collection held in memory.
///
/// Behaves like a single table keyed by record id with a `user_id` column.
/// Failures can be scripted per operation, and every call is counted
/// (including failed ones).
#[derive(Default)]
pub struct MemoryRemote {
    /// Rows in insertion order.
    rows: Mutex<Vec<RemoteRow>>,
    /// Scripted failures, consumed one per call.
    failures: Mutex<HashMap<RemoteOp, VecDeque<RemoteError>>>,
    /// When set, every call fails with this error.
    outage: Mutex<Option<RemoteError>>,
    calls: Mutex<HashMap<RemoteOp, usize>>,
    latency: Duration,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Put rows in place without going through the counted operations.
    pub fn seed(&self, rows: impl IntoIterator<Item = RemoteRow>) {
        let mut stored = self.rows.lock();
        for row in rows {
            Self::put(&mut stored, row);
        }
    }

    /// Snapshot of the rows owned by `owner`, in insertion order.
    pub fn rows_for(&self, owner: &OwnerId) -> Vec<RemoteRow> {
        self.rows
            .lock()
            .iter()
            .filter(|r| &r.user_id == owner)
            .cloned()
            .collect()
    }

    /// Row with this id, regardless of owner.
    pub fn get(&self, id: &RecordId) -> Option<RemoteRow> {
        self.rows.lock().iter().find(|r| &r.id == id).cloned()
    }

    /// Fail the next call to `op` with `error`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.fail_times(op, error, 1);
    }

    /// Fail the next `times` calls to `op` with `error`.
    pub fn fail_times(&self, op: RemoteOp, error: RemoteError, times: usize) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Fail every call until cleared with `None`.
    pub fn set_outage(&self, error: Option<RemoteError>) {
        *self.outage.lock() = error;
    }

    /// Number of calls made to `op`.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Total number of calls across all operations.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    async fn enter(&self, op: RemoteOp) -> Result<(), RemoteError> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(err) = self.outage.lock().clone() {
            return Err(err);
        }
        if let Some(err) = self
            .failures
            .lock()
            .get_mut(&op)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }
        Ok(())
    }

    fn put(rows: &mut Vec<RemoteRow>, mut row: RemoteRow) {
        match rows.iter_mut().find(|r| r.id == row.id) {
            Some(existing) => {
                row.created_at = existing.created_at;
                *existing = row;
            }
            None => {
                row.created_at.get_or_insert_with(Utc::now);
                rows.push(row);
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch_all(&self, owner: &OwnerId) -> Result<Vec<RemoteRow>, RemoteError> {
        self.enter(RemoteOp::FetchAll).await?;
        Ok(self.rows_for(owner))
    }

    async fn insert(&self, row: RemoteRow) -> Result<(), RemoteError> {
        self.enter(RemoteOp::Insert).await?;
        let mut rows = self.rows.lock();
        if rows.iter().any(|r| r.id == row.id) {
            return Err(RemoteError::permanent(format!(
                "duplicate key value violates unique constraint on id {}",
                row.id
            ))
            .with_code("23505"));
        }
        Self::put(&mut rows, row);
        Ok(())
    }

    async fn update(&self, row: RemoteRow) -> Result<(), RemoteError> {
        self.enter(RemoteOp::Update).await?;
        let mut rows = self.rows.lock();
        if let Some(existing) = rows
            .iter_mut()
            .find(|r| r.id == row.id && r.user_id == row.user_id)
        {
            let created_at = existing.created_at;
            *existing = row;
            existing.created_at = created_at;
        }
        Ok(())
    }

    async fn delete(&self, id: &RecordId, owner: &OwnerId) -> Result<(), RemoteError> {
        self.enter(RemoteOp::Delete).await?;
        self.rows
            .lock()
            .retain(|r| !(&r.id == id && &r.user_id == owner));
        Ok(())
    }

    async fn upsert_many(&self, rows: Vec<RemoteRow>) -> Result<(), RemoteError> {
        self.enter(RemoteOp::UpsertMany).await?;
        let mut stored = self.rows.lock();
        // The batch is all or nothing: one foreign id rejects every row.
        if let Some(row) = rows.iter().find(|row| {
            stored
                .iter()
                .any(|r| r.id == row.id && r.user_id != row.user_id)
        }) {
            return Err(RemoteError::permanent(format!(
                "new row violates row-level security policy for id {}",
                row.id
            ))
            .with_code("42501"));
        }
        for row in rows {
            Self::put(&mut stored, row);
        }
        Ok(())
    }
}
