//! Replication session state machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use docsync_sync_protocol::Direction;
use tokio::sync::watch;

use crate::error::{SyncError, SyncResult};

/// Opaque identifier of a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Wraps a raw session number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw session number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle of a session.
///
/// `Created -> Started -> Running -> {Completed, Errored}`; `Cancelled` is
/// reachable from `Started` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, not yet handed to the runtime.
    Created,
    /// Accepted and scheduled.
    Started,
    /// Exchanging data with the peer.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Errored,
    /// Stopped at the caller's request.
    Cancelled,
}

impl SessionState {
    /// Returns true once the session can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Errored | SessionState::Cancelled
        )
    }

    /// Returns true while the session holds its direction slot.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Started)
                | (Started, Running)
                | (Started, Cancelled)
                | (Running, Completed)
                | (Running, Errored)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Started => "started",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Errored => "errored",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Progress counters of a session. Retained when it errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCounts {
    /// Changes-feed entries (pull) or local changes (push) examined.
    pub changes_examined: u64,
    /// Documents that gained revisions on the receiving side.
    pub documents_transferred: u64,
    /// Revisions carried in transferred bundles.
    pub revisions_transferred: u64,
    /// Batches whose checkpoint was advanced.
    pub batches: u64,
    /// Conflicted documents handed to the resolver.
    pub conflicts_examined: u64,
    /// Conflicts the resolver closed.
    pub conflicts_resolved: u64,
    /// Checkpoint in effect when the session finished its last batch.
    pub checkpoint: u64,
}

/// Snapshot of a session, published on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Session handle.
    pub handle: SessionHandle,
    /// Replication direction.
    pub direction: Direction,
    /// Remote endpoint.
    pub endpoint: String,
    /// Current state.
    pub state: SessionState,
    /// Progress so far.
    pub counts: SessionCounts,
    /// Error message once errored.
    pub error: Option<String>,
}

/// Shared state of one session: status channel plus cancellation flag.
pub(crate) struct Session {
    status: watch::Sender<SessionStatus>,
    cancel_requested: AtomicBool,
}

impl Session {
    pub(crate) fn new(handle: SessionHandle, direction: Direction, endpoint: String) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            handle,
            direction,
            endpoint,
            state: SessionState::Created,
            counts: SessionCounts::default(),
            error: None,
        });
        Self {
            status,
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        self.status.borrow().handle
    }

    pub(crate) fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub(crate) fn snapshot(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Moves to `next`, recording `error` if given.
    pub(crate) fn transition(&self, next: SessionState, error: Option<String>) -> SyncResult<()> {
        let mut result = Ok(());
        self.status.send_if_modified(|status| {
            if status.state.can_transition_to(next) {
                status.state = next;
                if error.is_some() {
                    status.error = error;
                }
                true
            } else {
                result = Err(SyncError::InvalidStateTransition {
                    from: status.state.to_string(),
                    to: next.to_string(),
                });
                false
            }
        });
        result
    }

    pub(crate) fn update_counts(&self, update: impl FnOnce(&mut SessionCounts)) {
        self.status.send_modify(|status| update(&mut status.counts));
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancel_requested.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
