//! The peer server.

use std::sync::Arc;

use docsync_core::Datastore;
use docsync_sync_protocol::SyncMessage;
use tracing::warn;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, PeerInfo, RequestHandler};

/// Serves one datastore to replicating peers.
///
/// Requests arrive as encoded [`SyncMessage`]s, typically as the body of
/// an HTTP POST to `/sync/{kind}`; [`PeerServer::handle_post`] is the
/// entry point an HTTP layer calls.
///
/// # Example
///
/// ```rust,ignore
/// use docsync_sync_server::{PeerServer, ServerConfig};
///
/// let server = PeerServer::new(datastore, ServerConfig::default());
/// let reply = server.handle_post("/sync/changes", &body)?;
/// ```
#[derive(Debug)]
pub struct PeerServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl PeerServer {
    /// Creates a server for `datastore`.
    pub fn new(datastore: Arc<Datastore>, config: ServerConfig) -> Self {
        let context = Arc::new(HandlerContext::new(config, datastore));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// The datastore being served.
    pub fn datastore(&self) -> &Arc<Datastore> {
        &self.context.datastore
    }

    /// Clients that completed a handshake.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.context.peers()
    }

    /// Dispatches a request message to its handler.
    ///
    /// # Errors
    ///
    /// Fails for response-type messages and for handler errors.
    pub fn dispatch(&self, message: SyncMessage) -> ServerResult<SyncMessage> {
        let h = &self.handler;
        Ok(match message {
            SyncMessage::HandshakeRequest(r) => SyncMessage::HandshakeResponse(h.handle_handshake(r)?),
            SyncMessage::ChangesRequest(r) => SyncMessage::ChangesResponse(h.handle_changes(r)?),
            SyncMessage::RevsDiffRequest(r) => SyncMessage::RevsDiffResponse(h.handle_revs_diff(r)?),
            SyncMessage::FetchRequest(r) => SyncMessage::FetchResponse(h.handle_fetch(r)?),
            SyncMessage::PushRequest(r) => SyncMessage::PushResponse(h.handle_push(r)?),
            other => {
                return Err(ServerError::InvalidRequest(format!(
                    "message type {} is not a request",
                    other.type_code()
                )))
            }
        })
    }

    /// Dispatches a request; handler errors become [`SyncMessage::Error`].
    pub fn handle_message(&self, message: SyncMessage) -> SyncMessage {
        self.dispatch(message).unwrap_or_else(|e| {
            warn!(error = %e, client_error = e.is_client_error(), "request failed");
            SyncMessage::Error(e.to_string())
        })
    }

    /// Handles an encoded request posted to `path`.
    ///
    /// # Errors
    ///
    /// Fails, without a reply body, for an unknown path, an undecodable
    /// body or a message that does not belong on `path`.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let message = SyncMessage::decode(body).map_err(|e| ServerError::from(e).to_string())?;
        let expected = match path.trim_end_matches('/') {
            "/sync/handshake" => 1,
            "/sync/changes" => 3,
            "/sync/revs_diff" => 5,
            "/sync/fetch" => 7,
            "/sync/push" => 9,
            other => return Err(format!("unknown path: {other}")),
        };
        if message.type_code() != expected {
            return Err(format!(
                "message type {} posted to {path}",
                message.type_code()
            ));
        }
        self.handle_message(message)
            .encode()
            .map_err(|e| ServerError::from(e).to_string())
    }
}
