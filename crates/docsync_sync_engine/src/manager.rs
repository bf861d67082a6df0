//! Session manager: starts, tracks and cancels replication sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use docsync_core::{ConflictPolicy, ConflictResolver, CoreError, Datastore};
use docsync_storage::CheckpointStore;
use docsync_sync_protocol::Direction;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::ReplicationConfig;
use crate::error::{SyncError, SyncResult};
use crate::replicator::Replicator;
use crate::session::{Session, SessionHandle, SessionState, SessionStatus};
use crate::transport::{validate_endpoint, PeerConnector};

/// Runs replication sessions for one datastore.
///
/// `start` returns a handle immediately; the session runs on the
/// runtime's blocking pool and reports through a status channel. At most
/// one session per direction is active at a time; a second `start` for
/// the same direction fails with [`SyncError::SessionBusy`].
///
/// Before a session reports `Completed`, every conflicted document it
/// touched is handed to the configured [`ConflictResolver`].
pub struct SessionManager {
    shared: Arc<Shared>,
    runtime: Handle,
}

struct Shared {
    datastore: Arc<Datastore>,
    connector: Arc<dyn PeerConnector>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: RwLock<ReplicationConfig>,
    resolver: RwLock<Arc<dyn ConflictResolver>>,
    sessions: RwLock<HashMap<SessionHandle, Arc<Session>>>,
    active: Mutex<HashMap<Direction, SessionHandle>>,
    next_handle: AtomicU64,
}

impl SessionManager {
    /// Creates a manager running sessions on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`SyncError::NoRuntime`] when called outside a runtime.
    pub fn new(
        datastore: Arc<Datastore>,
        connector: Arc<dyn PeerConnector>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> SyncResult<Self> {
        let runtime = Handle::try_current().map_err(|e| SyncError::NoRuntime(e.to_string()))?;
        Ok(Self::with_runtime(datastore, connector, checkpoints, runtime))
    }

    /// Creates a manager running sessions on `runtime`.
    pub fn with_runtime(
        datastore: Arc<Datastore>,
        connector: Arc<dyn PeerConnector>,
        checkpoints: Arc<dyn CheckpointStore>,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                datastore,
                connector,
                checkpoints,
                config: RwLock::new(ReplicationConfig::default()),
                resolver: RwLock::new(Arc::new(ConflictPolicy::Manual)),
                sessions: RwLock::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(0),
            }),
            runtime,
        }
    }

    /// The datastore this manager replicates.
    pub fn datastore(&self) -> &Arc<Datastore> {
        &self.shared.datastore
    }

    /// Sets the configuration used by sessions started afterwards.
    pub fn set_config(&self, config: ReplicationConfig) {
        *self.shared.config.write() = config;
    }

    /// Current replication configuration.
    pub fn config(&self) -> ReplicationConfig {
        self.shared.config.read().clone()
    }

    /// Sets the conflict resolver used by sessions started afterwards.
    pub fn set_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        *self.shared.resolver.write() = resolver;
    }

    /// Starts a session replicating in `direction` with `endpoint`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidEndpoint`] for a malformed endpoint
    /// - [`SyncError::SessionBusy`] if a session in `direction` is active
    /// - [`SyncError::Core`] if the datastore is closed
    pub fn start(&self, direction: Direction, endpoint: &str) -> SyncResult<SessionHandle> {
        validate_endpoint(endpoint)?;
        let datastore = &self.shared.datastore;
        if !datastore.is_open() {
            return Err(CoreError::Closed(datastore.name().to_string()).into());
        }

        let handle = SessionHandle::new(self.shared.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        {
            let mut active = self.shared.active.lock();
            if let Some(current) = active.get(&direction) {
                return Err(SyncError::SessionBusy {
                    direction,
                    active: *current,
                });
            }
            active.insert(direction, handle);
        }

        let session = Arc::new(Session::new(handle, direction, endpoint.to_string()));
        self.shared
            .sessions
            .write()
            .insert(handle, Arc::clone(&session));
        if let Err(e) = session.transition(SessionState::Started, None) {
            self.shared.release(direction, handle);
            return Err(e);
        }
        info!(session = %handle, %direction, endpoint, "replication session started");

        let shared = Arc::clone(&self.shared);
        let config = self.config();
        let resolver = Arc::clone(&*self.shared.resolver.read());
        drop(self.runtime.spawn_blocking(move || {
            shared.run_session(&session, &config, resolver.as_ref());
        }));
        Ok(handle)
    }

    /// Starts a push session to `endpoint`.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::start`].
    pub fn push_to(&self, endpoint: &str) -> SyncResult<SessionHandle> {
        self.start(Direction::Push, endpoint)
    }

    /// Starts a pull session from `endpoint`.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::start`].
    pub fn pull_from(&self, endpoint: &str) -> SyncResult<SessionHandle> {
        self.start(Direction::Pull, endpoint)
    }

    /// Current status of a session.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownSession`] for a handle this manager never issued
    /// or has forgotten.
    pub fn session_status(&self, handle: SessionHandle) -> SyncResult<SessionStatus> {
        Ok(self.session(handle)?.snapshot())
    }

    /// Subscribes to status changes of a session.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownSession`].
    pub fn subscribe(&self, handle: SessionHandle) -> SyncResult<watch::Receiver<SessionStatus>> {
        Ok(self.session(handle)?.subscribe())
    }

    /// Requests cancellation. The session stops at the next document
    /// boundary; documents already applied stay applied. Returns false if
    /// the session had already finished.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownSession`].
    pub fn cancel(&self, handle: SessionHandle) -> SyncResult<bool> {
        let session = self.session(handle)?;
        if session.state().is_terminal() {
            return Ok(false);
        }
        session.request_cancel();
        info!(session = %handle, "cancellation requested");
        Ok(true)
    }

    /// Waits until the session reaches a terminal state.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnknownSession`].
    pub async fn wait(&self, handle: SessionHandle) -> SyncResult<SessionStatus> {
        let mut rx = self.subscribe(handle)?;
        loop {
            {
                let status = rx.borrow_and_update();
                if status.state.is_terminal() {
                    return Ok(status.clone());
                }
            }
            if rx.changed().await.is_err() {
                return Ok(rx.borrow().clone());
            }
        }
    }

    /// The active session in `direction`, if any.
    pub fn active_session(&self, direction: Direction) -> Option<SessionHandle> {
        self.shared.active.lock().get(&direction).copied()
    }

    /// Status of every known session, oldest first.
    pub fn sessions(&self) -> Vec<SessionStatus> {
        let mut all: Vec<SessionStatus> = self
            .shared
            .sessions
            .read()
            .values()
            .map(|s| s.snapshot())
            .collect();
        all.sort_by_key(|s| s.handle);
        all
    }

    /// Drops finished sessions. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut sessions = self.shared.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.state().is_terminal());
        before - sessions.len()
    }

    fn session(&self, handle: SessionHandle) -> SyncResult<Arc<Session>> {
        self.shared
            .sessions
            .read()
            .get(&handle)
            .cloned()
            .ok_or(SyncError::UnknownSession(handle))
    }
}

impl Shared {
    fn release(&self, direction: Direction, handle: SessionHandle) {
        let mut active = self.active.lock();
        if active.get(&direction) == Some(&handle) {
            active.remove(&direction);
        }
    }

    fn run_session(&self, session: &Session, config: &ReplicationConfig, resolver: &dyn ConflictResolver) {
        let SessionStatus {
            handle,
            direction,
            endpoint,
            ..
        } = session.snapshot();

        let outcome = session
            .check_cancelled()
            .and_then(|()| session.transition(SessionState::Running, None))
            .and_then(|()| self.connector.connect(&endpoint))
            .and_then(|transport| {
                let result = Replicator {
                    datastore: &self.datastore,
                    transport: transport.as_ref(),
                    checkpoints: self.checkpoints.as_ref(),
                    resolver,
                    config,
                    session,
                    direction,
                    endpoint: &endpoint,
                }
                .run();
                if let Err(e) = transport.close() {
                    warn!(session = %handle, error = %e, "failed to close transport");
                }
                result
            });

        self.release(direction, handle);
        let (state, message) = match outcome {
            Ok(()) => (SessionState::Completed, None),
            Err(SyncError::Cancelled) => (SessionState::Cancelled, None),
            Err(e) => (SessionState::Errored, Some(e.to_string())),
        };
        match &message {
            None => info!(session = %handle, state = %state, "replication session finished"),
            Some(reason) => error!(session = %handle, error = %reason, "replication session failed"),
        }
        if let Err(e) = session.transition(state, message) {
            error!(session = %handle, error = %e, "could not record session outcome");
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("datastore", &self.shared.datastore.name())
            .field("sessions", &self.shared.sessions.read().len())
            .field("active", &*self.shared.active.lock())
            .finish_non_exhaustive()
    }
}
