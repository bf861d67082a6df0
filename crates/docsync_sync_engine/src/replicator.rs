//! Pull and push algorithms run by a session.

use std::collections::{BTreeMap, BTreeSet};

use docsync_core::{ConflictResolver, Datastore, DocumentId, RevisionId};
use docsync_storage::CheckpointStore;
use docsync_sync_protocol::{
    ChangesRequest, Direction, FetchEntry, FetchRequest, HandshakeRequest, PushRequest,
    RevsDiffRequest,
};
use tracing::{debug, info, warn};

use crate::config::ReplicationConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::Session;
use crate::transport::PeerTransport;

/// Checkpoint id of the `direction` replication between `datastore` and
/// `endpoint`. Endpoints never contain whitespace, so the parts stay
/// separable.
pub fn checkpoint_id(datastore: &str, direction: Direction, endpoint: &str) -> String {
    format!("{datastore} {direction} {endpoint}")
}

pub(crate) struct Replicator<'a> {
    pub(crate) datastore: &'a Datastore,
    pub(crate) transport: &'a dyn PeerTransport,
    pub(crate) checkpoints: &'a dyn CheckpointStore,
    pub(crate) resolver: &'a dyn ConflictResolver,
    pub(crate) config: &'a ReplicationConfig,
    pub(crate) session: &'a Session,
    pub(crate) direction: Direction,
    pub(crate) endpoint: &'a str,
}

impl Replicator<'_> {
    /// Handshake, replicate, then hand conflicted documents to the resolver:
    /// the ones this session touched and any left open by earlier ones.
    pub(crate) fn run(&self) -> SyncResult<()> {
        self.handshake()?;
        let touched = match self.direction {
            Direction::Pull => self.pull()?,
            Direction::Push => self.push()?,
        };
        self.session.check_cancelled()?;
        self.resolve_conflicts(&touched)
    }

    fn checkpoint_id(&self) -> String {
        checkpoint_id(self.datastore.name(), self.direction, self.endpoint)
    }

    fn handshake(&self) -> SyncResult<()> {
        let local = self.datastore.fingerprint();
        let request = HandshakeRequest {
            protocol_version: self.config.protocol_version,
            client: self.datastore.name().to_string(),
            model_fingerprint: local.clone(),
            direction: self.direction,
        };
        let response = self.with_retry("handshake", || self.transport.handshake(&request))?;

        if response.protocol_version != self.config.protocol_version {
            return Err(SyncError::VersionMismatch {
                local: self.config.protocol_version,
                remote: response.protocol_version,
            });
        }
        if response.model_fingerprint != local {
            return Err(SyncError::ModelMismatch {
                local,
                remote: response.model_fingerprint,
            });
        }
        if !response.accepted {
            return Err(SyncError::Refused(
                response.error.unwrap_or_else(|| "handshake refused".into()),
            ));
        }
        debug!(
            session = %self.session.handle(),
            peer = %response.server,
            peer_sequence = response.last_sequence,
            "handshake accepted"
        );
        Ok(())
    }

    /// Applies the peer's changes locally. Returns the documents that
    /// gained revisions.
    fn pull(&self) -> SyncResult<BTreeSet<DocumentId>> {
        let checkpoint = self.checkpoint_id();
        let mut since = self.checkpoints.load(&checkpoint)?.unwrap_or(0);
        let mut touched = BTreeSet::new();

        loop {
            self.session.check_cancelled()?;
            let request = ChangesRequest::new(since, self.config.pull_batch_size);
            let batch = self.with_retry("changes", || self.transport.changes(&request))?;
            let examined = batch.changes.len() as u64;
            self.session.update_counts(|c| c.changes_examined += examined);

            let mut wanted = Vec::new();
            for change in &batch.changes {
                let missing = self.datastore.revs_diff(&change.doc_id, &change.tips);
                if missing.is_empty() {
                    continue;
                }
                let known = match self.datastore.revision_tree(&change.doc_id) {
                    Ok(tree) => tree.tips().into_iter().map(|n| n.rev.clone()).collect(),
                    Err(docsync_core::CoreError::NotFound(_)) => Vec::new(),
                    Err(e) => return Err(e.into()),
                };
                wanted.push(FetchEntry {
                    doc_id: change.doc_id.clone(),
                    revs: missing,
                    known,
                });
            }

            if !wanted.is_empty() {
                let request = FetchRequest { docs: wanted };
                let fetched = self.with_retry("fetch", || self.transport.fetch(&request))?;
                for bundle in fetched.bundles {
                    self.session.check_cancelled()?;
                    let doc_id = bundle.doc_id.clone();
                    let revisions = bundle.revisions.len() as u64;
                    if let Some(event) = self.datastore.import_revisions(bundle)? {
                        debug!(
                            session = %self.session.handle(),
                            doc_id = %doc_id,
                            rev = %event.rev,
                            conflicted = event.conflicted,
                            "applied replicated revisions"
                        );
                        self.session.update_counts(|c| {
                            c.documents_transferred += 1;
                            c.revisions_transferred += revisions;
                        });
                        touched.insert(doc_id);
                    }
                }
            }

            let mark = self.checkpoints.advance(&checkpoint, batch.last_sequence)?;
            self.session.update_counts(|c| {
                c.batches += 1;
                c.checkpoint = mark;
            });

            if !batch.has_more || batch.changes.is_empty() {
                break;
            }
            since = batch.last_sequence;
        }
        Ok(touched)
    }

    /// Sends local changes the peer lacks. Returns the documents sent.
    fn push(&self) -> SyncResult<BTreeSet<DocumentId>> {
        let checkpoint = self.checkpoint_id();
        let mut since = self.checkpoints.load(&checkpoint)?.unwrap_or(0);
        let limit = self.config.push_batch_size as usize;
        let mut touched = BTreeSet::new();

        loop {
            self.session.check_cancelled()?;
            let changes = self.datastore.changes_since(since, limit)?;
            let Some(last) = changes.last().map(|c| c.sequence) else {
                break;
            };
            let examined = changes.len() as u64;
            self.session.update_counts(|c| c.changes_examined += examined);

            let offered: BTreeMap<DocumentId, Vec<RevisionId>> = changes
                .iter()
                .map(|c| (c.doc_id.clone(), c.tips.clone()))
                .collect();
            let request = RevsDiffRequest {
                revs: offered.clone(),
            };
            let diff = self.with_retry("revs_diff", || self.transport.revs_diff(&request))?;

            let mut bundles = Vec::new();
            for (doc_id, missing) in &diff.missing {
                self.session.check_cancelled()?;
                let Some(tips) = offered.get(doc_id) else {
                    return Err(SyncError::Protocol(format!(
                        "peer reported {doc_id}, which was not offered"
                    )));
                };
                let known: Vec<RevisionId> =
                    tips.iter().filter(|r| !missing.contains(r)).cloned().collect();
                bundles.push(self.datastore.export_revisions(doc_id, missing, &known)?);
            }

            if !bundles.is_empty() {
                let revisions: u64 = bundles.iter().map(|b| b.revisions.len() as u64).sum();
                let request = PushRequest { bundles };
                let response = self.with_retry("push", || self.transport.push(&request))?;
                if let Some(rejection) = response.rejected.first() {
                    return Err(SyncError::Rejected {
                        doc_id: rejection.doc_id.to_string(),
                        message: rejection.error.clone(),
                    });
                }
                if !response.conflicted.is_empty() {
                    info!(
                        session = %self.session.handle(),
                        count = response.conflicted.len(),
                        "peer reports conflicted documents"
                    );
                }
                let applied = response.applied.len() as u64;
                self.session.update_counts(|c| {
                    c.documents_transferred += applied;
                    c.revisions_transferred += revisions;
                });
                touched.extend(request.bundles.into_iter().map(|b| b.doc_id));
            }

            let mark = self.checkpoints.advance(&checkpoint, last)?;
            self.session.update_counts(|c| {
                c.batches += 1;
                c.checkpoint = mark;
            });

            if changes.len() < limit {
                break;
            }
            since = last;
        }
        Ok(touched)
    }

    fn resolve_conflicts(&self, touched: &BTreeSet<DocumentId>) -> SyncResult<()> {
        let mut candidates = touched.clone();
        candidates.extend(self.datastore.list_conflicts()?.into_iter().map(|c| c.doc_id));
        let report = self
            .datastore
            .process_conflicts(&candidates, self.resolver)
            .map_err(|e| SyncError::ConflictResolution(e.to_string()))?;
        let (examined, resolved) = (report.examined as u64, report.resolved as u64);
        self.session.update_counts(|c| {
            c.conflicts_examined += examined;
            c.conflicts_resolved += resolved;
        });
        if !report.remaining.is_empty() {
            info!(
                session = %self.session.handle(),
                remaining = report.remaining.len(),
                "conflicts left for the application"
            );
        }
        Ok(())
    }

    fn with_retry<T>(&self, request: &str, mut op: impl FnMut() -> SyncResult<T>) -> SyncResult<T> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        session = %self.session.handle(),
                        request,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying request"
                    );
                    std::thread::sleep(delay);
                    self.session.check_cancelled()?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
