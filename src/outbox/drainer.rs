//! Background delivery of outbox intents.

use super::{Intent, Outbox, PendingIntent};
use crate::error::RemoteError;
use crate::notifications::{Notification, NotificationHub};
use crate::remote::RemoteStore;
use crate::session::SessionTracker;
use crate::types::RecordId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as TokioMutex, Notify};

/// Backoff schedule for failed deliveries.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Attempts before a transient failure is abandoned.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempts + 1`, given `attempts` failures so far.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Outcome of one pass over the outbox.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Intents the remote accepted.
    pub delivered: usize,
    /// Intents that failed and will be retried.
    pub deferred: usize,
    /// Intents abandoned after a permanent error or too many attempts.
    pub abandoned: usize,
    /// Intents skipped because they were not yet due or queued behind an
    /// earlier intent for the same record.
    pub waiting: usize,
}

pub(crate) struct Drainer {
    outbox: Arc<Outbox>,
    remote: Arc<dyn RemoteStore>,
    session: Arc<SessionTracker>,
    notifications: Arc<NotificationHub>,
    alive: Arc<AtomicBool>,
    signal: Notify,
    policy: RetryPolicy,
    /// One pass at a time, whether from the background task or on demand.
    pass_lock: TokioMutex<()>,
}

impl Drainer {
    pub(crate) fn new(
        outbox: Arc<Outbox>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<SessionTracker>,
        notifications: Arc<NotificationHub>,
        alive: Arc<AtomicBool>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            outbox,
            remote,
            session,
            notifications,
            alive,
            signal: Notify::new(),
            policy,
            pass_lock: TokioMutex::new(()),
        }
    }

    /// Background loop: drain, then sleep until woken or the next retry is due.
    pub(crate) async fn run(self: Arc<Self>) {
        tracing::debug!("outbox drainer started");

        while self.alive.load(Ordering::SeqCst) {
            let (_, next_due) = self.drain_once().await;

            if !self.alive.load(Ordering::SeqCst) {
                break;
            }

            match next_due {
                Some(at) => {
                    tokio::select! {
                        _ = self.signal.notified() => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                    }
                }
                None => self.signal.notified().await,
            }
        }

        tracing::debug!("outbox drainer stopped");
    }

    /// One pass over the current owner's due intents.
    ///
    /// Intents for the same record are delivered in order: once one is
    /// waiting, later intents for that record wait too. Returns the earliest
    /// time a deferred intent becomes due.
    pub(crate) async fn drain_once(&self) -> (DrainReport, Option<Instant>) {
        let _pass = self.pass_lock.lock().await;
        let mut report = DrainReport::default();

        let owner = match self.session.owner() {
            Some(owner) => owner,
            None => return (report, None),
        };

        let mut blocked: HashSet<RecordId> = HashSet::new();
        let mut next_due: Option<Instant> = None;

        for pending in self.outbox.pending_for(&owner) {
            if !self.alive.load(Ordering::SeqCst) {
                break;
            }
            // Signed out or switched owner mid-pass.
            if self.session.owner().as_ref() != Some(&owner) {
                break;
            }

            let record_id = pending.intent.record_id();
            if blocked.contains(&record_id) {
                report.waiting += 1;
                continue;
            }
            if !pending.is_due(Instant::now()) {
                blocked.insert(record_id);
                report.waiting += 1;
                next_due = earliest(next_due, pending.not_before);
                continue;
            }

            match self.deliver(&pending).await {
                Ok(()) => {
                    report.delivered += 1;
                    self.finish(pending.seq);
                    tracing::debug!(
                        op = %pending.intent.op(),
                        record_id = %record_id,
                        "remote mutation applied"
                    );
                    self.notifications.broadcast(Notification::RemoteApplied {
                        op: pending.intent.op(),
                        record_id,
                    });
                }
                Err(error) => {
                    let attempt = pending.attempts + 1;
                    let will_retry = error.is_retryable() && attempt < self.policy.max_attempts;

                    if will_retry {
                        let retry_at = Instant::now() + self.policy.delay_after(attempt);
                        self.outbox.defer(pending.seq, retry_at);
                        blocked.insert(record_id);
                        next_due = earliest(next_due, Some(retry_at));
                        report.deferred += 1;
                        tracing::warn!(
                            op = %pending.intent.op(),
                            record_id = %record_id,
                            attempt,
                            error = %error,
                            "remote mutation failed, will retry"
                        );
                    } else {
                        self.finish(pending.seq);
                        report.abandoned += 1;
                        tracing::error!(
                            op = %pending.intent.op(),
                            record_id = %record_id,
                            attempt,
                            error = %error,
                            "remote mutation abandoned"
                        );
                    }

                    self.notifications.broadcast(Notification::RemoteFailed {
                        op: pending.intent.op(),
                        record_id,
                        error,
                        attempt,
                        will_retry,
                    });
                }
            }
        }

        (report, next_due)
    }

    /// Wake the background loop.
    pub(crate) fn wake(&self) {
        self.signal.notify_one();
    }

    async fn deliver(&self, pending: &PendingIntent) -> Result<(), RemoteError> {
        match &pending.intent {
            Intent::Insert { row } if pending.may_exist => {
                self.remote.upsert_many(vec![row.clone()]).await
            }
            Intent::Insert { row } => self.remote.insert(row.clone()).await,
            Intent::Update { row } => self.remote.update(row.clone()).await,
            Intent::Delete { id, owner } => self.remote.delete(id, owner).await,
        }
    }

    fn finish(&self, seq: u64) {
        if let Err(e) = self.outbox.complete(seq) {
            tracing::error!(seq, error = %e, "cannot record outbox completion");
            self.notifications.broadcast(Notification::PersistenceFailed {
                message: e.to_string(),
            });
        }
    }
}

fn earliest(current: Option<Instant>, candidate: Option<Instant>) -> Option<Instant> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
