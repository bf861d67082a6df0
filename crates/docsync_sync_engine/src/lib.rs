//! # docsync Sync Engine
//!
//! Replication sessions between docsync datastores.
//!
//! This crate provides:
//! - [`SessionManager`]: starts pull and push sessions, one per direction
//! - Session state machine (created → started → running → completed /
//!   errored, cancelled from started or running) observable through a
//!   `tokio::sync::watch` channel
//! - Checkpointed pull and push over a changes feed
//! - Retry with exponential backoff and jitter
//! - Transport abstraction with HTTP, loopback and mock implementations
//!
//! ## Replication
//!
//! A pull session reads the peer's changes feed from the stored
//! checkpoint, asks its own datastore which of the listed revisions it
//! lacks, fetches those with ancestry and attachment bytes, and applies
//! them document by document. A push session does the reverse: it offers
//! its local changes, and sends what the peer reports missing.
//!
//! ## Key Invariants
//!
//! - At most one active session per (datastore, direction)
//! - No document lock is held during network I/O
//! - A checkpoint advances only after its batch is applied
//! - Cancellation takes effect between documents; applied documents stay
//! - Conflicts touched by a session are handed to the resolver before it
//!   reports completed

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod http;
mod manager;
mod replicator;
mod session;
mod transport;

pub use config::{ReplicationConfig, RetryConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use manager::SessionManager;
pub use replicator::checkpoint_id;
pub use session::{SessionCounts, SessionHandle, SessionState, SessionStatus};
pub use transport::{
    validate_endpoint, MockTransport, PeerConnector, PeerTransport, StaticConnector,
};
