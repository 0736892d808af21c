//! Session-start merge of the local and remote record sets.
//!
//! A pass fetches the owner's remote rows, reads the local set, uploads
//! whatever [`plan`] says is missing remotely, and re-fetches. The re-fetched
//! set is the new authoritative set. Any remote failure aborts the pass;
//! uploads that already landed stay.
//!
//! Concurrent passes for the same owner share one run.

mod plan;
mod single_flight;

pub use plan::{plan, MergeStrategy, ReconcilePlan};
pub use single_flight::SingleFlight;

use crate::codec::records_from_rows;
use crate::error::RemoteError;
use crate::remote::RemoteStore;
use crate::types::{OwnerId, Record, RecordId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Summary of one reconciliation pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub owner: OwnerId,
    /// Local-only records uploaded during the pass.
    pub migrated: Vec<RecordId>,
    /// Shared records whose local fields were discarded or whose remote copy
    /// was replaced, depending on the strategy.
    pub overridden: Vec<RecordId>,
    /// Records that existed only remotely.
    pub remote_only: Vec<RecordId>,
    /// Size of the resulting authoritative set.
    pub total: usize,
    /// Whether the result replaced local state. False when the session changed
    /// or the engine shut down while the pass was running.
    pub applied: bool,
}

/// Outcome of a successful pass: the authoritative set and its report.
#[derive(Clone, Debug)]
pub struct Reconciled {
    pub records: Vec<Record>,
    pub report: ReconcileReport,
}

/// Runs reconciliation passes against one remote store.
pub struct Reconciler {
    remote: Arc<dyn RemoteStore>,
    strategy: MergeStrategy,
    flights: SingleFlight<OwnerId, Result<Reconciled, RemoteError>>,
}

impl Reconciler {
    pub fn new(remote: Arc<dyn RemoteStore>, strategy: MergeStrategy) -> Self {
        Self {
            remote,
            strategy,
            flights: SingleFlight::new(),
        }
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Reconcile `owner`, joining a pass already running for them.
    ///
    /// `read_local` is called once the remote fetch has succeeded, so the
    /// local snapshot is as fresh as possible. Joiners do not call it.
    pub async fn run<F>(&self, owner: &OwnerId, read_local: F) -> Result<Reconciled, RemoteError>
    where
        F: FnOnce() -> Vec<Record>,
    {
        self.flights
            .run(owner.clone(), || self.pass(owner, read_local))
            .await
    }

    async fn pass<F>(&self, owner: &OwnerId, read_local: F) -> Result<Reconciled, RemoteError>
    where
        F: FnOnce() -> Vec<Record>,
    {
        tracing::info!(owner = %owner, strategy = ?self.strategy, "reconciliation started");

        let remote = records_from_rows(self.remote.fetch_all(owner).await?);
        let local = read_local();

        let plan = plan(owner, &local, &remote, self.strategy);
        tracing::debug!(
            owner = %owner,
            local = local.len(),
            remote = remote.len(),
            migrating = plan.migrated.len(),
            uploads = plan.upserts.len(),
            "reconciliation planned"
        );

        if !plan.is_noop() {
            self.remote.upsert_many(plan.upserts).await?;
        }

        let records = records_from_rows(self.remote.fetch_all(owner).await?);

        let report = ReconcileReport {
            owner: owner.clone(),
            migrated: plan.migrated,
            overridden: plan.overridden,
            remote_only: plan.remote_only,
            total: records.len(),
            applied: false,
        };
        tracing::info!(
            owner = %owner,
            migrated = report.migrated.len(),
            overridden = report.overridden.len(),
            total = report.total,
            "reconciliation finished"
        );

        Ok(Reconciled { records, report })
    }
}
