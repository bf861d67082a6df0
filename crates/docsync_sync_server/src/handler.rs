//! Request handlers for replication endpoints.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use docsync_core::Datastore;
use docsync_sync_protocol::{
    ChangeEntry, ChangesRequest, ChangesResponse, Direction, FetchRequest, FetchResponse,
    HandshakeRequest, HandshakeResponse, PushRequest, PushResponse, Rejection, RevsDiffRequest,
    RevsDiffResponse,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// What the server remembers about a client after its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Client name.
    pub client: String,
    /// Direction of the client's latest session.
    pub direction: Direction,
    /// Server sequence at the latest handshake.
    pub sequence_at_handshake: u64,
    /// Accepted handshakes so far.
    pub handshakes: u64,
}

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The datastore being served.
    pub datastore: Arc<Datastore>,
    peers: RwLock<HashMap<String, PeerInfo>>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, datastore: Arc<Datastore>) -> Self {
        Self {
            config,
            datastore,
            peers: RwLock::new(HashMap::new()),
        }
    }

    fn register_peer(&self, request: &HandshakeRequest, sequence: u64) {
        let mut peers = self.peers.write();
        let entry = peers.entry(request.client.clone()).or_insert_with(|| PeerInfo {
            client: request.client.clone(),
            direction: request.direction,
            sequence_at_handshake: sequence,
            handshakes: 0,
        });
        entry.direction = request.direction;
        entry.sequence_at_handshake = sequence;
        entry.handshakes += 1;
    }

    /// Clients that completed a handshake, by name.
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.read().values().cloned().collect();
        peers.sort_by(|a, b| a.client.cmp(&b.client));
        peers
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("config", &self.config)
            .field("datastore", &self.datastore.name())
            .field("peers", &self.peers.read().len())
            .finish_non_exhaustive()
    }
}

/// Handler for replication requests.
#[derive(Debug)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    fn datastore(&self) -> &Datastore {
        &self.context.datastore
    }

    fn check_handshake(&self, request: &HandshakeRequest) -> ServerResult<()> {
        let config = &self.context.config;
        if request.protocol_version != config.protocol_version {
            return Err(ServerError::ProtocolMismatch {
                server: config.protocol_version,
                client: request.protocol_version,
            });
        }
        let fingerprint = self.datastore().fingerprint();
        if request.model_fingerprint != fingerprint {
            return Err(ServerError::ModelMismatch {
                server: fingerprint,
                client: request.model_fingerprint.clone(),
            });
        }
        if !self.datastore().is_open() {
            return Err(ServerError::Datastore(docsync_core::CoreError::Closed(
                self.datastore().name().to_string(),
            )));
        }
        Ok(())
    }

    /// Handles a handshake. Mismatches produce a refusal, not an error.
    pub fn handle_handshake(&self, request: HandshakeRequest) -> ServerResult<HandshakeResponse> {
        let ds = self.datastore();
        let mut response = match self.check_handshake(&request) {
            Ok(()) => {
                let sequence = ds.last_sequence();
                self.context.register_peer(&request, sequence);
                info!(
                    client = %request.client,
                    direction = %request.direction,
                    sequence,
                    "handshake accepted"
                );
                HandshakeResponse::accept(ds.name(), ds.fingerprint(), sequence)
            }
            Err(e) => {
                warn!(client = %request.client, error = %e, "handshake refused");
                HandshakeResponse::reject(ds.name(), ds.fingerprint(), e.to_string())
            }
        };
        response.protocol_version = self.context.config.protocol_version;
        Ok(response)
    }

    /// Handles a changes request. The limit is capped by the server.
    pub fn handle_changes(&self, request: ChangesRequest) -> ServerResult<ChangesResponse> {
        let limit = request.limit.min(self.context.config.max_changes_batch).max(1) as usize;
        let mut changes = self.datastore().changes_since(request.since, limit + 1)?;
        let has_more = changes.len() > limit;
        changes.truncate(limit);
        let last_sequence = changes.last().map_or(request.since, |c| c.sequence);
        debug!(since = request.since, count = changes.len(), has_more, "serving changes");

        Ok(ChangesResponse::new(
            changes.into_iter().map(ChangeEntry::from).collect(),
            last_sequence,
            has_more,
        ))
    }

    /// Handles a revs-diff request. Documents with nothing missing are
    /// left out of the response.
    pub fn handle_revs_diff(&self, request: RevsDiffRequest) -> ServerResult<RevsDiffResponse> {
        let missing: BTreeMap<_, _> = request
            .revs
            .into_iter()
            .filter_map(|(doc_id, revs)| {
                let missing = self.datastore().revs_diff(&doc_id, &revs);
                (!missing.is_empty()).then_some((doc_id, missing))
            })
            .collect();
        Ok(RevsDiffResponse { missing })
    }

    /// Handles a fetch request.
    pub fn handle_fetch(&self, request: FetchRequest) -> ServerResult<FetchResponse> {
        let bundles = request
            .docs
            .iter()
            .map(|entry| {
                self.datastore()
                    .export_revisions(&entry.doc_id, &entry.revs, &entry.known)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FetchResponse { bundles })
    }

    /// Handles a push request. Each bundle is applied on its own; a bundle
    /// that fails is reported as rejected without affecting the others.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        let max = self.context.config.max_push_batch as usize;
        if request.bundles.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many bundles: {} > {max}",
                request.bundles.len()
            )));
        }

        let mut response = PushResponse::default();
        for bundle in request.bundles {
            let doc_id = bundle.doc_id.clone();
            match self.datastore().import_revisions(bundle) {
                Ok(Some(event)) => {
                    if event.conflicted {
                        response.conflicted.push(doc_id.clone());
                    }
                    response.applied.push(doc_id);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(doc_id = %doc_id, error = %e, "rejected pushed revisions");
                    response.rejected.push(Rejection {
                        doc_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(response)
    }
}
