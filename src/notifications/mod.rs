//! In-process notifications of engine outcomes.
//!
//! Remote failures never undo local changes; they are reported here instead.
//! Subscribers get a bounded buffer and are dropped if they fall behind.
//!
//! # Example
//!
//! ```ignore
//! let handle = engine.subscribe(NotificationConfig {
//!     filter: NotificationFilter::failures(),
//!     ..Default::default()
//! });
//!
//! while let Ok(notification) = handle.recv() {
//!     match notification {
//!         Notification::RemoteFailed { record_id, error, .. } => {
//!             eprintln!("could not sync {record_id}: {error}")
//!         }
//!         Notification::Dropped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::NotificationHub;
pub use types::{
    DropReason, Notification, NotificationConfig, NotificationFilter, NotificationHandle,
    NotificationKind, SubscriptionId,
};
