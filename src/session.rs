//! Owner session tracking.
//!
//! The authentication collaborator reports edge-triggered events. The tracker
//! turns them into transitions and bumps an epoch on every change so that
//! work started under one session can tell when it has been overtaken.

use crate::types::OwnerId;
use parking_lot::Mutex;

/// Event reported by the authentication collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Sign-in or session restore.
    Established(OwnerId),
    /// Sign-out or session expiry.
    Cleared,
}

/// What an event changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// A (possibly different) owner is now signed in.
    Established {
        owner: OwnerId,
        previous: Option<OwnerId>,
        epoch: u64,
    },
    /// The owner signed out.
    Cleared { previous: OwnerId, epoch: u64 },
    /// The event repeated the current state.
    Unchanged,
}

#[derive(Debug, Default)]
struct SessionState {
    owner: Option<OwnerId>,
    epoch: u64,
}

/// Current owner plus a change counter.
#[derive(Debug, Default)]
pub struct SessionTracker {
    state: Mutex<SessionState>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event and report the resulting transition.
    pub fn apply(&self, event: SessionEvent) -> Transition {
        let mut state = self.state.lock();
        match event {
            SessionEvent::Established(owner) => {
                if state.owner.as_ref() == Some(&owner) {
                    return Transition::Unchanged;
                }
                state.epoch += 1;
                let previous = state.owner.replace(owner.clone());
                Transition::Established {
                    owner,
                    previous,
                    epoch: state.epoch,
                }
            }
            SessionEvent::Cleared => match state.owner.take() {
                Some(previous) => {
                    state.epoch += 1;
                    Transition::Cleared {
                        previous,
                        epoch: state.epoch,
                    }
                }
                None => Transition::Unchanged,
            },
        }
    }

    /// The signed-in owner, if any.
    pub fn owner(&self) -> Option<OwnerId> {
        self.state.lock().owner.clone()
    }

    /// Owner and epoch read together.
    pub fn snapshot(&self) -> (Option<OwnerId>, u64) {
        let state = self.state.lock();
        (state.owner.clone(), state.epoch)
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Whether `epoch` is still the current one.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().epoch == epoch
    }
}
