//! Transport layer abstraction for replication.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use docsync_sync_protocol::{
    ChangesRequest, ChangesResponse, FetchRequest, FetchResponse, HandshakeRequest,
    HandshakeResponse, PushRequest, PushResponse, RevsDiffRequest, RevsDiffResponse,
};
use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};

/// Connection to one remote peer.
///
/// Implementations carry the protocol messages over some medium (HTTP,
/// an in-process server, a mock). Calls are blocking; sessions run on
/// the blocking pool.
pub trait PeerTransport: Send + Sync {
    /// Opens a session with the peer.
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse>;

    /// Reads the peer's changes feed.
    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse>;

    /// Asks which revisions the peer lacks.
    fn revs_diff(&self, request: &RevsDiffRequest) -> SyncResult<RevsDiffResponse>;

    /// Fetches revisions with ancestry and attachment bytes.
    fn fetch(&self, request: &FetchRequest) -> SyncResult<FetchResponse>;

    /// Sends revisions to the peer.
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// Opens a transport for an endpoint.
pub trait PeerConnector: Send + Sync {
    /// Connects to `endpoint`.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidEndpoint`] when nothing serves the endpoint.
    fn connect(&self, endpoint: &str) -> SyncResult<Arc<dyn PeerTransport>>;
}

impl<F> PeerConnector for F
where
    F: Fn(&str) -> SyncResult<Arc<dyn PeerTransport>> + Send + Sync,
{
    fn connect(&self, endpoint: &str) -> SyncResult<Arc<dyn PeerTransport>> {
        self(endpoint)
    }
}

/// Connector over a fixed table of endpoints.
#[derive(Default)]
pub struct StaticConnector {
    peers: BTreeMap<String, Arc<dyn PeerTransport>>,
}

impl StaticConnector {
    /// Creates an empty connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transport` under `endpoint`.
    #[must_use]
    pub fn with_peer(mut self, endpoint: impl Into<String>, transport: Arc<dyn PeerTransport>) -> Self {
        self.peers.insert(endpoint.into(), transport);
        self
    }
}

impl PeerConnector for StaticConnector {
    fn connect(&self, endpoint: &str) -> SyncResult<Arc<dyn PeerTransport>> {
        self.peers
            .get(endpoint)
            .cloned()
            .ok_or_else(|| SyncError::InvalidEndpoint(endpoint.to_string()))
    }
}

impl std::fmt::Debug for StaticConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticConnector")
            .field("endpoints", &self.peers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Checks that `endpoint` looks like `scheme://target`.
///
/// # Errors
///
/// [`SyncError::InvalidEndpoint`] otherwise.
pub fn validate_endpoint(endpoint: &str) -> SyncResult<()> {
    let valid = endpoint.split_once("://").is_some_and(|(scheme, target)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            && !target.is_empty()
    }) && !endpoint.chars().any(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidEndpoint(endpoint.to_string()))
    }
}

/// A scripted transport for testing.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    handshake_response: Mutex<Option<HandshakeResponse>>,
    changes_responses: Mutex<Vec<ChangesResponse>>,
    revs_diff_response: Mutex<Option<RevsDiffResponse>>,
    fetch_response: Mutex<Option<FetchResponse>>,
    push_response: Mutex<Option<PushResponse>>,
    failure: Mutex<Option<(String, bool)>>,
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Sets the handshake response.
    pub fn set_handshake_response(&self, response: HandshakeResponse) {
        *self.handshake_response.lock() = Some(response);
    }

    /// Queues a changes response; they are served in order, the last repeating.
    pub fn push_changes_response(&self, response: ChangesResponse) {
        self.changes_responses.lock().push(response);
    }

    /// Sets the revs-diff response.
    pub fn set_revs_diff_response(&self, response: RevsDiffResponse) {
        *self.revs_diff_response.lock() = Some(response);
    }

    /// Sets the fetch response.
    pub fn set_fetch_response(&self, response: FetchResponse) {
        *self.fetch_response.lock() = Some(response);
    }

    /// Sets the push response.
    pub fn set_push_response(&self, response: PushResponse) {
        *self.push_response.lock() = Some(response);
    }

    /// Makes every request fail with a transport error.
    pub fn fail_with(&self, message: impl Into<String>, retryable: bool) {
        *self.failure.lock() = Some((message.into(), retryable));
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn check(&self) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::transport_fatal("not connected"));
        }
        match self.failure.lock().clone() {
            Some((message, retryable)) => Err(SyncError::Transport { message, retryable }),
            None => Ok(()),
        }
    }

    fn scripted<T: Clone>(slot: &Mutex<Option<T>>, what: &str) -> SyncResult<T> {
        slot.lock()
            .clone()
            .ok_or_else(|| SyncError::Protocol(format!("no mock {what} response set")))
    }
}

impl PeerTransport for MockTransport {
    fn handshake(&self, _request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        self.check()?;
        Self::scripted(&self.handshake_response, "handshake")
    }

    fn changes(&self, _request: &ChangesRequest) -> SyncResult<ChangesResponse> {
        self.check()?;
        let mut queue = self.changes_responses.lock();
        match queue.len() {
            0 => Err(SyncError::Protocol("no mock changes response set".into())),
            1 => Ok(queue[0].clone()),
            _ => Ok(queue.remove(0)),
        }
    }

    fn revs_diff(&self, _request: &RevsDiffRequest) -> SyncResult<RevsDiffResponse> {
        self.check()?;
        Self::scripted(&self.revs_diff_response, "revs_diff")
    }

    fn fetch(&self, _request: &FetchRequest) -> SyncResult<FetchResponse> {
        self.check()?;
        Self::scripted(&self.fetch_response, "fetch")
    }

    fn push(&self, _request: &PushRequest) -> SyncResult<PushResponse> {
        self.check()?;
        Self::scripted(&self.push_response, "push")
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
