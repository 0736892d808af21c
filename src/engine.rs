//! The sync engine: local-first mutations, outbox propagation, and
//! session-driven reconciliation.

use crate::codec::{from_remote, records_from_rows, to_remote, RemoteRow};
use crate::error::{RemoteError, Result, SyncError};
use crate::local::{FileLocalStore, LocalStore, DEFAULT_SLOT};
use crate::notifications::{
    DropReason, Notification, NotificationConfig, NotificationFilter, NotificationHandle,
    NotificationHub, SubscriptionId,
};
use crate::outbox::{DrainReport, Drainer, Intent, Outbox, PendingIntent, RetryPolicy};
use crate::reconcile::{MergeStrategy, ReconcileReport, Reconciled, Reconciler};
use crate::records::{ExpenseDraft, RecordSet, Summary};
use crate::remote::RemoteStore;
use crate::session::{SessionEvent, SessionTracker, Transition};
use crate::types::{OwnerId, Record, RecordId};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Directory holding the local slot and the outbox journal.
    pub data_dir: PathBuf,

    /// Name of the local slot.
    pub slot: String,

    /// How reconciliation settles records present on both sides.
    pub merge_strategy: MergeStrategy,

    /// Backoff for failed remote mutations.
    pub retry: RetryPolicy,

    /// Buffer size for subscriptions made with [`SyncEngine::subscribe`].
    pub notification_buffer: usize,

    /// Spawn the background drainer on the first sign-in. When false, the
    /// outbox only drains through [`SyncEngine::drain_outbox`].
    pub auto_drain: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./expenses"),
            slot: DEFAULT_SLOT.to_string(),
            merge_strategy: MergeStrategy::default(),
            retry: RetryPolicy::default(),
            notification_buffer: 256,
            auto_drain: true,
        }
    }
}

/// Result of a session event.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    /// The event repeated the current state.
    Unchanged,
    /// The owner signed out. Local records are kept.
    Cleared,
    /// An owner signed in and reconciliation completed.
    Reconciled(ReconcileReport),
    /// An owner signed in but reconciliation failed. Local state is untouched.
    ReconcileFailed(RemoteError),
}

/// Result of [`SyncEngine::upload_all`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BulkOutcome {
    /// The local set was empty; nothing was sent.
    NothingToUpload,
    /// `uploaded` local records were sent; the remote now holds `total`.
    Uploaded { uploaded: usize, total: usize },
}

/// Offline-first record store kept in step with an owner-scoped remote.
///
/// Every mutation commits locally first. While an owner is signed in it also
/// queues a remote intent, delivered in the background; remote failures are
/// reported through notifications and never undo the local change.
pub struct SyncEngine {
    config: EngineConfig,

    /// In-memory set, most recent first.
    records: RwLock<RecordSet>,

    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    outbox: Arc<Outbox>,
    session: Arc<SessionTracker>,
    notifications: Arc<NotificationHub>,
    reconciler: Reconciler,
    drainer: Arc<Drainer>,
    drainer_started: AtomicBool,

    /// Cleared by shutdown; late async results check it before applying.
    alive: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Open the on-disk engine under `config.data_dir`.
    pub fn open(config: EngineConfig, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let local = FileLocalStore::open(&config.data_dir, &config.slot)?;
        let outbox = Outbox::open(config.data_dir.join("outbox.log"))?;

        Ok(Self::from_parts(config, Arc::new(local), outbox, remote))
    }

    /// Assemble an engine from its collaborators.
    pub fn from_parts(
        config: EngineConfig,
        local: Arc<dyn LocalStore>,
        outbox: Outbox,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let records = RecordSet::from_records(local.load());
        let outbox = Arc::new(outbox);
        let session = Arc::new(SessionTracker::new());
        let notifications = Arc::new(NotificationHub::new());
        let alive = Arc::new(AtomicBool::new(true));

        let drainer = Arc::new(Drainer::new(
            outbox.clone(),
            remote.clone(),
            session.clone(),
            notifications.clone(),
            alive.clone(),
            config.retry.clone(),
        ));

        tracing::info!(
            records = records.len(),
            pending = outbox.len(),
            durable = outbox.is_durable(),
            "sync engine opened"
        );

        Self {
            reconciler: Reconciler::new(remote.clone(), config.merge_strategy),
            config,
            records: RwLock::new(records),
            local,
            remote,
            outbox,
            session,
            notifications,
            drainer,
            drainer_started: AtomicBool::new(false),
            alive,
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Validate and add a record at the front of the set.
    pub fn create(&self, draft: ExpenseDraft) -> Result<Record> {
        self.ensure_alive()?;
        let record = draft.validate()?.into_record(RecordId::new());

        {
            let mut records = self.records.write();
            records.prepend(record.clone())?;
            self.persist(&records);
        }

        self.propagate(|owner| Intent::Insert {
            row: to_remote(&record, owner),
        });
        Ok(record)
    }

    /// Replace every field of record `id`, keeping its position.
    pub fn update(&self, id: RecordId, draft: ExpenseDraft) -> Result<Record> {
        self.ensure_alive()?;
        let record = draft.validate()?.into_record(id);

        {
            let mut records = self.records.write();
            records.replace(record.clone())?;
            self.persist(&records);
        }

        self.propagate(|owner| Intent::Update {
            row: to_remote(&record, owner),
        });
        Ok(record)
    }

    /// Remove record `id`, returning it.
    pub fn delete(&self, id: RecordId) -> Result<Record> {
        self.ensure_alive()?;

        let removed = {
            let mut records = self.records.write();
            let removed = records.remove(&id)?;
            self.persist(&records);
            removed
        };

        self.propagate(|owner| Intent::Delete {
            id,
            owner: owner.clone(),
        });
        Ok(removed)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Snapshot of the set, most recent first.
    pub fn records(&self) -> Vec<Record> {
        self.records.read().as_slice().to_vec()
    }

    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.records.read().get(id).cloned()
    }

    pub fn summary(&self) -> Summary {
        Summary::of(&self.records.read())
    }

    pub fn session_owner(&self) -> Option<OwnerId> {
        self.session.owner()
    }

    /// Remote mutations not yet delivered, for every owner.
    pub fn pending_intents(&self) -> Vec<PendingIntent> {
        self.outbox.pending()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Subscribe with the configured buffer size.
    pub fn subscribe(&self, filter: NotificationFilter) -> NotificationHandle {
        self.notifications.subscribe(NotificationConfig {
            buffer_size: self.config.notification_buffer,
            filter,
        })
    }

    pub fn subscribe_with(&self, config: NotificationConfig) -> NotificationHandle {
        self.notifications.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.notifications.unsubscribe(id);
    }

    // =========================================================================
    // Session and reconciliation
    // =========================================================================

    /// React to a sign-in, restore, or sign-out.
    ///
    /// Establishing a session reconciles once. A reconciliation failure is
    /// reported in the outcome, not as an error.
    pub async fn handle_session(&self, event: SessionEvent) -> Result<SessionOutcome> {
        self.ensure_alive()?;

        match self.session.apply(event) {
            Transition::Unchanged => Ok(SessionOutcome::Unchanged),
            Transition::Cleared { previous, epoch } => {
                tracing::info!(owner = %previous, epoch, "session cleared");
                Ok(SessionOutcome::Cleared)
            }
            Transition::Established {
                owner,
                previous,
                epoch,
            } => {
                tracing::info!(
                    owner = %owner,
                    previous = ?previous,
                    epoch,
                    "session established"
                );
                self.start_drainer();

                match self.reconcile_for(owner, epoch).await {
                    Ok(report) => Ok(SessionOutcome::Reconciled(report)),
                    Err(error) => Ok(SessionOutcome::ReconcileFailed(error)),
                }
            }
        }
    }

    /// Reconcile the current owner again on demand.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.ensure_alive()?;
        let (owner, epoch) = self.current_session()?;
        Ok(self.reconcile_for(owner, epoch).await?)
    }

    async fn reconcile_for(
        &self,
        owner: OwnerId,
        epoch: u64,
    ) -> std::result::Result<ReconcileReport, RemoteError> {
        let result = self
            .reconciler
            .run(&owner, || self.records.read().as_slice().to_vec())
            .await;
        // Pending inserts may have been migrated by the pass.
        self.outbox.mark_may_exist(&owner);

        match result {
            Ok(Reconciled {
                records,
                mut report,
            }) => {
                report.applied = self.apply_if_current(epoch, &owner, records);
                if report.applied {
                    self.notifications.broadcast(Notification::Reconciled {
                        owner: owner.clone(),
                        migrated: report.migrated.len(),
                        overridden: report.overridden.len(),
                        total: report.total,
                    });
                    self.drainer.wake();
                } else {
                    tracing::info!(owner = %owner, "session changed during reconciliation, result discarded");
                }
                Ok(report)
            }
            Err(error) => {
                tracing::warn!(owner = %owner, error = %error, "reconciliation failed");
                self.notifications.broadcast(Notification::ReconcileFailed {
                    owner,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    // =========================================================================
    // Bulk upload
    // =========================================================================

    /// Upload the whole local set, then replace it with what the remote holds.
    ///
    /// On failure local state is left as it was.
    pub async fn upload_all(&self) -> Result<BulkOutcome> {
        self.ensure_alive()?;
        let (owner, epoch) = self.current_session()?;

        let rows: Vec<RemoteRow> = self
            .records
            .read()
            .iter()
            .map(|r| to_remote(r, &owner))
            .collect();

        if rows.is_empty() {
            tracing::info!(owner = %owner, "bulk upload skipped, nothing stored locally");
            self.notifications.broadcast(Notification::BulkUploadSkipped);
            return Ok(BulkOutcome::NothingToUpload);
        }

        let uploaded = rows.len();
        let result = self.upload_and_fetch(&owner, rows).await;
        self.outbox.mark_may_exist(&owner);

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(error) => {
                tracing::error!(owner = %owner, error = %error, "bulk upload failed");
                self.notifications.broadcast(Notification::BulkUploadFailed {
                    error: error.clone(),
                });
                return Err(error.into());
            }
        };

        let records = records_from_rows(fetched);
        let total = records.len();
        if !self.apply_if_current(epoch, &owner, records) {
            tracing::warn!(owner = %owner, "session changed during bulk upload, result discarded");
            self.ensure_alive()?;
            return Err(SyncError::SessionChanged);
        }

        tracing::info!(owner = %owner, uploaded, total, "bulk upload finished");
        self.notifications
            .broadcast(Notification::BulkUploaded { uploaded, total });
        Ok(BulkOutcome::Uploaded { uploaded, total })
    }

    async fn upload_and_fetch(
        &self,
        owner: &OwnerId,
        rows: Vec<RemoteRow>,
    ) -> std::result::Result<Vec<RemoteRow>, RemoteError> {
        self.remote.upsert_many(rows).await?;
        self.remote.fetch_all(owner).await
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    /// Run one delivery pass now, regardless of the background drainer.
    pub async fn drain_outbox(&self) -> DrainReport {
        self.drainer.drain_once().await.0
    }

    /// Stop background work and close every subscription.
    ///
    /// Mutations and session events fail with [`SyncError::ShutDown`]
    /// afterwards; remote results still in flight are discarded.
    pub fn shutdown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.drainer.wake();
            self.notifications.close_all(DropReason::Shutdown);
            tracing::info!(pending = self.outbox.len(), "sync engine shut down");
        }
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(SyncError::ShutDown)
        }
    }

    fn current_session(&self) -> Result<(OwnerId, u64)> {
        match self.session.snapshot() {
            (Some(owner), epoch) => Ok((owner, epoch)),
            (None, _) => Err(SyncError::NoSession),
        }
    }

    fn start_drainer(&self) {
        if self.config.auto_drain && !self.drainer_started.swap(true, Ordering::SeqCst) {
            tokio::spawn(self.drainer.clone().run());
        }
    }

    /// Queue the remote echo of a local change, if anyone is signed in.
    fn propagate(&self, intent: impl FnOnce(&OwnerId) -> Intent) {
        let Some(owner) = self.session.owner() else {
            tracing::debug!("no session, change kept local");
            return;
        };

        match self.outbox.enqueue(intent(&owner)) {
            Ok(seq) => {
                tracing::debug!(seq, owner = %owner, "remote intent queued");
                self.drainer.wake();
            }
            Err(e) => {
                tracing::error!(owner = %owner, error = %e, "cannot queue remote intent");
                self.notifications.broadcast(Notification::PersistenceFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Replace the set wholesale if the session that started the work is
    /// still current.
    ///
    /// The owner's undelivered intents are replayed over the fetched set, so
    /// a local change still waiting for the remote is not undone.
    fn apply_if_current(&self, epoch: u64, owner: &OwnerId, records: Vec<Record>) -> bool {
        let mut current = self.records.write();
        if !self.is_alive() || !self.session.is_current(epoch) {
            return false;
        }
        let mut fetched = RecordSet::from_records(records);
        overlay_pending(&mut fetched, &self.outbox.pending_for(owner));
        *current = fetched;
        self.persist(&current);
        true
    }

    /// Save the set. Failures are reported, never returned: the in-memory
    /// change is the commit point.
    fn persist(&self, records: &RecordSet) {
        if let Err(e) = self.local.save(records.as_slice()) {
            tracing::error!(error = %e, "cannot save local records");
            self.notifications.broadcast(Notification::PersistenceFailed {
                message: e.to_string(),
            });
        }
    }
}

/// Apply pending intents, oldest first, on top of a remote snapshot.
fn overlay_pending(records: &mut RecordSet, pending: &[PendingIntent]) {
    for p in pending {
        match &p.intent {
            Intent::Insert { row } | Intent::Update { row } => {
                let record = from_remote(row.clone());
                if records.contains(&record.id) {
                    let _ = records.replace(record);
                } else {
                    let _ = records.prepend(record);
                }
            }
            Intent::Delete { id, .. } => {
                let _ = records.remove(id);
            }
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        // Let the drainer task exit.
        self.alive.store(false, Ordering::SeqCst);
        self.drainer.wake();
    }
}
