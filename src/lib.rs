//! # Expense Sync
//!
//! An offline-first expense record store that keeps a device-local set in
//! step with an owner-scoped remote collection.
//!
//! ## Core Concepts
//!
//! - **Records**: Expense entries, most recent first, keyed by a client-side id
//! - **Local store**: One slot holding the whole set, rewritten on every change
//! - **Remote store**: Owner-scoped CRUD behind an async trait
//! - **Outbox**: Durable queue of remote mutations, drained with backoff
//! - **Reconciliation**: One merge of both sets whenever an owner signs in
//!
//! ## Example
//!
//! ```ignore
//! use expense_sync::{Category, EngineConfig, ExpenseDraft, SessionEvent, SyncEngine};
//!
//! let engine = SyncEngine::open(EngineConfig {
//!     data_dir: "./expenses".into(),
//!     ..Default::default()
//! }, remote)?;
//!
//! // Works offline
//! engine.create(ExpenseDraft::new("Coffee", 3.2, Category::Food, Utc::now()))?;
//!
//! // Signing in migrates local-only records and adopts the remote set
//! engine.handle_session(SessionEvent::Established(OwnerId::new("alice"))).await?;
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod local;
pub mod notifications;
pub mod outbox;
pub mod reconcile;
pub mod records;
pub mod remote;
pub mod session;
pub mod types;

// Re-exports
pub use codec::{from_remote, records_from_rows, to_remote, RemoteRow};
pub use engine::{BulkOutcome, EngineConfig, SessionOutcome, SyncEngine};
pub use error::{
    PersistenceError, RemoteError, RemoteErrorKind, Result, SyncError, ValidationError,
};
pub use local::{FileLocalStore, LocalStore, MemoryLocalStore, DEFAULT_SLOT};
pub use notifications::{
    DropReason, Notification, NotificationConfig, NotificationFilter, NotificationHandle,
    NotificationHub, NotificationKind, SubscriptionId,
};
pub use outbox::{DrainReport, Intent, Outbox, PendingIntent, RetryPolicy};
pub use reconcile::{plan, MergeStrategy, ReconcilePlan, ReconcileReport, Reconciled, Reconciler};
pub use records::{ExpenseDraft, RecordSet, Summary};
pub use remote::{MemoryRemote, RemoteOp, RemoteStore};
pub use session::{SessionEvent, SessionTracker, Transition};
pub use types::*;
