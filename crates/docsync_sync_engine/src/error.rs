//! Error types for replication sessions.

use docsync_sync_protocol::Direction;
use thiserror::Error;

use crate::session::SessionHandle;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by replication sessions and the session manager.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A session for this datastore and direction is already active.
    #[error("a {direction} session is already active ({active})")]
    SessionBusy {
        /// Requested direction.
        direction: Direction,
        /// The session holding the slot.
        active: SessionHandle,
    },

    /// The handle names no session known to this manager.
    #[error("unknown session {0}")]
    UnknownSession(SessionHandle),

    /// Network or transport failure talking to the peer.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// Malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer refused the handshake.
    #[error("peer refused session: {0}")]
    Refused(String),

    /// The peers were built from different object models.
    #[error("object model mismatch: local {local}, remote {remote}")]
    ModelMismatch {
        /// Local model fingerprint.
        local: String,
        /// Remote model fingerprint.
        remote: String,
    },

    /// Protocol versions differ.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },

    /// The peer rejected pushed revisions.
    #[error("peer rejected {doc_id}: {message}")]
    Rejected {
        /// Rejected document.
        doc_id: String,
        /// Peer's reason.
        message: String,
    },

    /// Endpoint is malformed or no peer is reachable under it.
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    /// Local datastore error while applying or exporting.
    #[error("datastore error: {0}")]
    Core(#[from] docsync_core::CoreError),

    /// Checkpoint store error.
    #[error("checkpoint error: {0}")]
    Storage(#[from] docsync_storage::StorageError),

    /// The conflict resolver failed after replication.
    #[error("conflict resolution failed: {0}")]
    ConflictResolution(String),

    /// The session was cancelled.
    #[error("session cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// No tokio runtime to run sessions on.
    #[error("no async runtime available: {0}")]
    NoRuntime(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the failed request may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::SessionBusy { .. } => true,
            SyncError::Core(e) => matches!(e, docsync_core::CoreError::RevisionMismatch { .. }),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad certificate").is_retryable());
        assert!(SyncError::SessionBusy {
            direction: Direction::Pull,
            active: SessionHandle::new(1),
        }
        .is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::ModelMismatch {
            local: "a".into(),
            remote: "b".into(),
        }
        .is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::SessionBusy {
            direction: Direction::Push,
            active: SessionHandle::new(7),
        };
        assert_eq!(err.to_string(), "a push session is already active (session-7)");

        let err = SyncError::VersionMismatch { local: 1, remote: 2 };
        assert!(err.to_string().contains("local=1"));
    }
}
