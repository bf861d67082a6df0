//! HTTP transport.
//!
//! Every request is a CBOR-encoded [`SyncMessage`] posted to
//! `{base_url}/sync/{kind}`; the response body is the peer's reply
//! message. The HTTP client itself is abstracted behind [`HttpClient`].

use std::sync::atomic::{AtomicBool, Ordering};

use docsync_sync_protocol::{
    ChangesRequest, ChangesResponse, FetchRequest, FetchResponse, HandshakeRequest,
    HandshakeResponse, PushRequest, PushResponse, RevsDiffRequest, RevsDiffResponse, SyncMessage,
};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::transport::PeerTransport;

/// HTTP client abstraction.
///
/// Implement this trait to plug in an HTTP library, or any other
/// request/response medium.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based peer transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for the peer at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn exchange(&self, path: &str, request: SyncMessage) -> SyncResult<SyncMessage> {
        if !self.is_connected() {
            return Err(SyncError::transport_fatal("not connected"));
        }
        let body = request
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}/sync/{path}", self.base_url);
        debug!(url = %url, bytes = body.len(), "posting sync message");
        let response = self.client.post(&url, body).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        match SyncMessage::decode(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))?
        {
            SyncMessage::Error(message) => Err(SyncError::Protocol(message)),
            other => Ok(other),
        }
    }
}

fn unexpected(expected: &str, got: &SyncMessage) -> SyncError {
    SyncError::Protocol(format!(
        "expected {expected}, got message type {}",
        got.type_code()
    ))
}

impl<C: HttpClient> PeerTransport for HttpTransport<C> {
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        match self.exchange("handshake", SyncMessage::HandshakeRequest(request.clone()))? {
            SyncMessage::HandshakeResponse(r) => Ok(r),
            other => Err(unexpected("handshake response", &other)),
        }
    }

    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse> {
        match self.exchange("changes", SyncMessage::ChangesRequest(*request))? {
            SyncMessage::ChangesResponse(r) => Ok(r),
            other => Err(unexpected("changes response", &other)),
        }
    }

    fn revs_diff(&self, request: &RevsDiffRequest) -> SyncResult<RevsDiffResponse> {
        match self.exchange("revs_diff", SyncMessage::RevsDiffRequest(request.clone()))? {
            SyncMessage::RevsDiffResponse(r) => Ok(r),
            other => Err(unexpected("revs_diff response", &other)),
        }
    }

    fn fetch(&self, request: &FetchRequest) -> SyncResult<FetchResponse> {
        match self.exchange("fetch", SyncMessage::FetchRequest(request.clone()))? {
            SyncMessage::FetchResponse(r) => Ok(r),
            other => Err(unexpected("fetch response", &other)),
        }
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        match self.exchange("push", SyncMessage::PushRequest(request.clone()))? {
            SyncMessage::PushResponse(r) => Ok(r),
            other => Err(unexpected("push response", &other)),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A server reachable without a network, for [`LoopbackClient`].
pub trait LoopbackServer {
    /// Handles a POST to `path` and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An HTTP client that routes requests directly to an in-process server.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a client connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_sync_protocol::Direction;

    struct TestClient {
        response: RwLock<Option<Vec<u8>>>,
        last_url: RwLock<Option<String>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                last_url: RwLock::new(None),
                healthy: AtomicBool::new(true),
            }
        }

        fn respond_with(&self, message: SyncMessage) {
            *self.response.write() = Some(message.encode().unwrap());
        }
    }

    impl HttpClient for &TestClient {
        fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            *self.last_url.write() = Some(url.to_string());
            self.response
                .read()
                .clone()
                .ok_or_else(|| "connection refused".to_string())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn transport_handshake() {
        let client = TestClient::new();
        client.respond_with(SyncMessage::HandshakeResponse(HandshakeResponse::accept(
            "srv", "abc", 42,
        )));
        let transport = HttpTransport::new("http://peer.example.com/", &client);
        assert_eq!(transport.base_url(), "http://peer.example.com");

        let response = transport
            .handshake(&HandshakeRequest::new("a", "abc", Direction::Pull))
            .unwrap();
        assert!(response.accepted);
        assert_eq!(response.last_sequence, 42);
        assert_eq!(
            client.last_url.read().as_deref(),
            Some("http://peer.example.com/sync/handshake")
        );
    }

    #[test]
    fn failures_are_retryable_and_recorded() {
        let client = TestClient::new();
        let transport = HttpTransport::new("http://peer", &client);
        let err = transport.changes(&ChangesRequest::new(0, 10)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("connection refused"));
    }

    #[test]
    fn wrong_reply_type_is_protocol_error() {
        let client = TestClient::new();
        client.respond_with(SyncMessage::PushResponse(PushResponse::default()));
        let transport = HttpTransport::new("http://peer", &client);
        assert!(matches!(
            transport.changes(&ChangesRequest::new(0, 10)),
            Err(SyncError::Protocol(_))
        ));

        client.respond_with(SyncMessage::Error("boom".into()));
        assert!(matches!(
            transport.push(&PushRequest::default()),
            Err(SyncError::Protocol(m)) if m == "boom"
        ));
    }

    #[test]
    fn closed_or_unhealthy_transport() {
        let client = TestClient::new();
        client.healthy.store(false, Ordering::SeqCst);
        let transport = HttpTransport::new("http://peer", &client);
        assert!(!transport.is_connected());

        client.healthy.store(true, Ordering::SeqCst);
        transport.close().unwrap();
        assert!(!transport.is_connected());
        assert!(transport.fetch(&FetchRequest::default()).is_err());
    }
}
