//! Notification types.

use crate::error::RemoteError;
use crate::types::{MutationOp, OwnerId, RecordId};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct NotificationConfig {
    /// Max buffered notifications before the subscriber is dropped.
    /// Default: 256
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: NotificationFilter,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            filter: NotificationFilter::all(),
        }
    }
}

/// Broad grouping of notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Propagation,
    Reconciliation,
    BulkUpload,
    Persistence,
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct NotificationFilter {
    /// Only these kinds (None = all kinds).
    pub kinds: Option<Vec<NotificationKind>>,

    /// Only failures.
    pub failures_only: bool,
}

impl NotificationFilter {
    /// Everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Failures of any kind.
    pub fn failures() -> Self {
        Self {
            failures_only: true,
            ..Default::default()
        }
    }

    /// Specific kinds.
    pub fn kinds(kinds: Vec<NotificationKind>) -> Self {
        Self {
            kinds: Some(kinds),
            ..Default::default()
        }
    }

    pub(crate) fn matches(&self, notification: &Notification) -> bool {
        if self.failures_only && !notification.is_failure() {
            return false;
        }
        match (&self.kinds, notification.kind()) {
            (Some(kinds), Some(kind)) => kinds.contains(&kind),
            _ => true,
        }
    }
}

/// A user-visible, non-fatal report from the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    // --- Propagation ---
    /// A local mutation reached the remote store.
    RemoteApplied { op: MutationOp, record_id: RecordId },

    /// A remote echo of a local mutation failed. The local change stands.
    RemoteFailed {
        op: MutationOp,
        record_id: RecordId,
        error: RemoteError,
        attempt: u32,
        will_retry: bool,
    },

    // --- Reconciliation ---
    /// Local and remote sets were merged.
    Reconciled {
        owner: OwnerId,
        migrated: usize,
        overridden: usize,
        total: usize,
    },

    /// Reconciliation aborted; local state was left as it was.
    ReconcileFailed { owner: OwnerId, error: RemoteError },

    // --- Bulk upload ---
    BulkUploaded { uploaded: usize, total: usize },

    /// Nothing to upload.
    BulkUploadSkipped,

    BulkUploadFailed { error: RemoteError },

    // --- Persistence ---
    /// The local slot or outbox journal could not be written.
    PersistenceFailed { message: String },

    // --- Control ---
    /// This subscription was dropped.
    Dropped { reason: DropReason },
}

impl Notification {
    /// Grouping, `None` for control notifications.
    pub fn kind(&self) -> Option<NotificationKind> {
        match self {
            Notification::RemoteApplied { .. } | Notification::RemoteFailed { .. } => {
                Some(NotificationKind::Propagation)
            }
            Notification::Reconciled { .. } | Notification::ReconcileFailed { .. } => {
                Some(NotificationKind::Reconciliation)
            }
            Notification::BulkUploaded { .. }
            | Notification::BulkUploadSkipped
            | Notification::BulkUploadFailed { .. } => Some(NotificationKind::BulkUpload),
            Notification::PersistenceFailed { .. } => Some(NotificationKind::Persistence),
            Notification::Dropped { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Notification::RemoteFailed { .. }
                | Notification::ReconcileFailed { .. }
                | Notification::BulkUploadFailed { .. }
                | Notification::PersistenceFailed { .. }
        )
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Subscriber couldn't keep up.
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The engine shut down.
    Shutdown,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive notifications.
pub struct NotificationHandle {
    pub id: SubscriptionId,
    /// Channel to receive notifications.
    pub receiver: crossbeam_channel::Receiver<Notification>,
}

impl NotificationHandle {
    /// Receive the next notification (blocking).
    pub fn recv(&self) -> Result<Notification, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a notification (non-blocking).
    pub fn try_recv(&self) -> Result<Notification, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Notification, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<Notification> {
        self.receiver.try_iter().collect()
    }
}
