//! Datastore facade.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use docsync_codec::Value;
use docsync_storage::{
    AttachmentKey, BlobStore, FileBlobStore, FileLog, InMemoryBlobStore, InMemoryLog, LogBackend,
    StorageError,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeOrigin};
use crate::codec::{self, ENTITY_KEY};
use crate::config::DatastoreConfig;
use crate::document::{attachment_digest, DocumentId, DocumentRecord, RevisionId};
use crate::error::{CoreError, CoreResult};
use crate::identity::{IdentityResolver, ObjectId, Referrer};
use crate::model::{DeleteRule, EntityDescriptor, ObjectModel, RelationshipDescriptor, TransformerRegistry};
use crate::object::{ObjectInstance, ObjectRef};
use crate::revision::{ConflictResolver, ConflictSet, Resolution, RevisionNode, RevisionTree};
use crate::store::{Change, Committed, DocumentStore};

/// Attachment bytes travelling with replicated revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobData {
    /// Attachment name.
    pub name: String,
    /// SHA-256 of `data`, hex.
    pub digest: String,
    /// The bytes.
    pub data: Vec<u8>,
}

/// Revisions of one document plus the attachment bytes they reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionBundle {
    /// Document identifier.
    pub doc_id: DocumentId,
    /// Revisions, ascending.
    pub revisions: Vec<RevisionNode>,
    /// Attachment bytes, one entry per distinct `(name, digest)`.
    pub blobs: Vec<BlobData>,
}

/// Documents touched by [`Datastore::delete_object`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Tombstoned documents, the requested one first.
    pub deleted: Vec<DocumentId>,
    /// Surviving documents whose references to deleted ones were cleared.
    pub nullified: Vec<DocumentId>,
}

/// Outcome of [`Datastore::process_conflicts`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    /// Conflicted documents handed to the resolver.
    pub examined: usize,
    /// Documents the resolver closed.
    pub resolved: usize,
    /// Documents left conflicted.
    pub remaining: Vec<DocumentId>,
}

/// The explicit context object tying the object model, document store,
/// identity tables, blob area and change feed together.
///
/// A datastore is `Send + Sync`; share it behind an `Arc`. Reads and
/// writes are synchronous. Writes to one document serialize on that
/// document's lock.
///
/// ```rust,ignore
/// let model = ObjectModel::from_json(schema_json)?;
/// let store = Datastore::in_memory(model)?;
///
/// let mut entry = ObjectInstance::new("Entry").set("text", "hello");
/// let rev = store.save_object(&mut entry, None)?;
/// let again = store.resolve(entry.id.as_ref().unwrap())?;
/// ```
pub struct Datastore {
    config: DatastoreConfig,
    model: Arc<ObjectModel>,
    transformers: TransformerRegistry,
    blobs: Arc<dyn BlobStore>,
    store: DocumentStore,
    identity: IdentityResolver,
    changes: ChangeFeed,
    is_open: RwLock<bool>,
}

/// Blob directory inside a datastore directory.
pub const BLOB_DIR: &str = "blobs";

/// Revision journal inside a datastore directory.
pub const JOURNAL_FILE: &str = "revisions.log";

impl Datastore {
    /// Opens (creating if needed) the datastore stored in directory `path`
    /// with the built-in transformers.
    ///
    /// Layout:
    ///
    /// ```text
    /// <path>/
    /// ├─ revisions.log   # revision journal, replayed here
    /// └─ blobs/          # attachment area
    /// ```
    ///
    /// # Errors
    ///
    /// See [`Datastore::open_with_transformers`].
    pub fn open(path: &Path, config: DatastoreConfig, model: ObjectModel) -> CoreResult<Self> {
        Self::open_with_transformers(path, config, model, TransformerRegistry::new())
    }

    /// Opens the datastore in directory `path` with an
    /// application-supplied transformer registry.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Storage`] if `path` is not a directory or another
    ///   process holds the datastore
    /// - [`CoreError::LogicalCorruption`] if the journal is damaged
    /// - [`SchemaError::UnknownTransformer`](crate::SchemaError::UnknownTransformer)
    ///   if the model names a transformer the registry lacks
    pub fn open_with_transformers(
        path: &Path,
        config: DatastoreConfig,
        model: ObjectModel,
        transformers: TransformerRegistry,
    ) -> CoreResult<Self> {
        if path.exists() && !path.is_dir() {
            return Err(StorageError::InvalidPath(path.to_path_buf()).into());
        }
        let blobs = FileBlobStore::open(&path.join(BLOB_DIR))?;
        let journal = FileLog::open(&path.join(JOURNAL_FILE))?;
        Self::open_with_backends(config, model, transformers, Arc::new(blobs), Box::new(journal))
    }

    /// Opens a datastore over explicit storage, replaying `journal` and
    /// rebuilding the identity tables from the winners.
    ///
    /// # Errors
    ///
    /// Fails if the model names an unregistered transformer or the
    /// journal cannot be replayed.
    pub fn open_with_backends(
        config: DatastoreConfig,
        model: ObjectModel,
        transformers: TransformerRegistry,
        blobs: Arc<dyn BlobStore>,
        journal: Box<dyn LogBackend>,
    ) -> CoreResult<Self> {
        model.check_transformers(&transformers)?;
        let store = DocumentStore::open(journal, config.sync_on_write)?;
        let datastore = Self {
            changes: ChangeFeed::with_max_history(config.change_history),
            config,
            model: Arc::new(model),
            transformers,
            blobs,
            store,
            identity: IdentityResolver::new(),
            is_open: RwLock::new(true),
        };
        let ids = datastore.store.document_ids();
        for id in &ids {
            datastore.reindex(id)?;
        }
        info!(
            datastore = %datastore.config.name,
            entities = datastore.model.entities().len(),
            fingerprint = %datastore.model.fingerprint(),
            documents = ids.len(),
            last_sequence = datastore.store.last_sequence(),
            "datastore opened"
        );
        Ok(datastore)
    }

    /// A datastore with default configuration that lives only in memory.
    ///
    /// # Errors
    ///
    /// See [`Datastore::open_with_backends`].
    pub fn in_memory(model: ObjectModel) -> CoreResult<Self> {
        Self::open_with_backends(
            DatastoreConfig::default(),
            model,
            TransformerRegistry::new(),
            Arc::new(InMemoryBlobStore::new()),
            Box::new(InMemoryLog::new()),
        )
    }

    /// Datastore name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    /// Loaded object model.
    #[must_use]
    pub fn model(&self) -> &ObjectModel {
        &self.model
    }

    /// Fingerprint of the object model, exchanged with peers.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.model.fingerprint()
    }

    /// The blob area.
    #[must_use]
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Stops accepting operations. Idempotent.
    pub fn close(&self) {
        let mut is_open = self.is_open.write();
        if *is_open {
            *is_open = false;
            info!(datastore = %self.config.name, "datastore closed");
        }
    }

    /// Whether the datastore accepts operations.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::Closed(self.config.name.clone()))
        }
    }

    fn entity(&self, name: &str) -> CoreResult<&EntityDescriptor> {
        self.model
            .entity(name)
            .ok_or_else(|| CoreError::UnknownEntity(name.to_string()))
    }

    // ========================================================================
    // Identity and codec
    // ========================================================================

    /// Gives `instance` a collision-free document id unless it has one.
    pub fn assign_identifier(&self, instance: &mut ObjectInstance) -> DocumentId {
        if let Some(id) = &instance.id {
            return id.clone();
        }
        loop {
            let id = self.identity.assign_identifier(instance);
            if !self.store.contains(&id) {
                return id;
            }
            instance.id = None;
        }
    }

    /// External identifier of a stored object.
    #[must_use]
    pub fn object_id(&self, doc_id: &DocumentId) -> Option<ObjectId> {
        self.identity.object_id(doc_id)
    }

    /// Documents referencing `doc_id`.
    #[must_use]
    pub fn referrers(&self, doc_id: &DocumentId) -> Vec<Referrer> {
        self.identity.referrers(doc_id)
    }

    /// Encodes an instance with the model's descriptor for its entity.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownEntity`] plus everything [`codec::encode`]
    /// reports.
    pub fn encode(&self, instance: &ObjectInstance) -> CoreResult<DocumentRecord> {
        codec::encode(instance, self.entity(&instance.entity)?, &self.transformers)
    }

    /// Decodes a record, loading stub attachments from the blob area.
    /// References to documents that are not live decode as placeholders.
    ///
    /// # Errors
    ///
    /// Fails if the body names no known entity, does not match it, or an
    /// attachment cannot be loaded.
    pub fn decode(&self, record: &DocumentRecord) -> CoreResult<ObjectInstance> {
        let name = record.entity().ok_or_else(|| {
            CoreError::type_mismatch(format!("{} {ENTITY_KEY}", record.id), "entity name", "<missing>")
        })?;
        let entity = self.entity(name)?;
        let mut record = record.clone();
        codec::load_attachments(&mut record, self.blobs.as_ref())?;
        let exists = |id: &DocumentId| self.store.is_live(id);
        codec::decode(&record, entity, &self.transformers, &exists)
    }

    // ========================================================================
    // Local writes
    // ========================================================================

    /// Encodes and saves an instance, assigning an identifier first if it
    /// has none.
    ///
    /// # Errors
    ///
    /// See [`Datastore::encode`] and [`Datastore::save`].
    pub fn save_object(
        &self,
        instance: &mut ObjectInstance,
        expected: Option<&RevisionId>,
    ) -> CoreResult<RevisionId> {
        self.ensure_open()?;
        if instance.id.is_none() {
            self.assign_identifier(instance);
        }
        let record = self.encode(instance)?;
        self.save(record, expected)
    }

    /// Saves a record as a child of the current winner.
    ///
    /// Attachments carrying bytes are written to the blob area first;
    /// stubs must already be present there.
    ///
    /// # Errors
    ///
    /// - [`CoreError::RevisionMismatch`] if `expected` is not the winner
    /// - [`CoreError::UnknownEntity`] if the body names an unknown entity
    /// - [`CoreError::MissingAttachment`] for a stub without stored bytes
    pub fn save(&self, mut record: DocumentRecord, expected: Option<&RevisionId>) -> CoreResult<RevisionId> {
        self.ensure_open()?;
        if let Some(name) = record.entity() {
            self.entity(name)?;
        }
        codec::extract_attachments(&mut record, self.blobs.as_ref())?;
        for (name, attachment) in &record.attachments {
            let key = AttachmentKey::new(record.id.as_str(), name.as_str());
            if !self.blobs.contains(&key, &attachment.digest)? {
                return Err(CoreError::MissingAttachment {
                    doc_id: record.id.to_string(),
                    name: name.clone(),
                });
            }
        }
        let committed = self.store.save(&record, expected)?;
        debug!(doc_id = %committed.doc_id, rev = %committed.rev, "document saved");
        self.after_commit(&committed, ChangeOrigin::Local)?;
        Ok(committed.rev)
    }

    /// Deletes an object, applying the delete rules of its relationships.
    ///
    /// The objects related through a relationship are its targets plus the
    /// objects referencing it through the inverse. `cascade` deletes them
    /// too (recursively), `deny` refuses while any exist, `nullify`
    /// leaves them. Every surviving object referencing a deleted one then
    /// has that edge cleared, so no dangling reference remains.
    ///
    /// All deny checks run before anything is written. `expected`, when
    /// given, must name the winner of `id`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if `id` is absent or already deleted
    /// - [`CoreError::ReferentialIntegrity`] if a deny rule blocks
    /// - [`CoreError::RevisionMismatch`] if `expected` is stale
    pub fn delete_object(&self, id: &DocumentId, expected: Option<&RevisionId>) -> CoreResult<DeleteReport> {
        self.ensure_open()?;
        let root = self.store.winner(id)?;
        if root.deleted {
            return Err(CoreError::NotFound(id.to_string()));
        }

        // cascade closure
        let mut doomed = vec![id.clone()];
        let mut seen: HashSet<DocumentId> = doomed.iter().cloned().collect();
        let mut next = 0;
        while next < doomed.len() {
            let current = doomed[next].clone();
            next += 1;
            let Some((node, entity)) = self.live_entity(&current) else {
                continue;
            };
            for rel in entity.relationships() {
                if rel.delete_rule != DeleteRule::Cascade {
                    continue;
                }
                for related in self.related(&current, &node.body, rel) {
                    if seen.insert(related.clone()) {
                        doomed.push(related);
                    }
                }
            }
        }

        for current in &doomed {
            let Some((node, entity)) = self.live_entity(current) else {
                continue;
            };
            for rel in entity.relationships() {
                if rel.delete_rule != DeleteRule::Deny {
                    continue;
                }
                let blocking = self
                    .related(current, &node.body, rel)
                    .into_iter()
                    .filter(|d| !seen.contains(d))
                    .count();
                if blocking > 0 {
                    return Err(CoreError::ReferentialIntegrity {
                        doc_id: current.to_string(),
                        relationship: rel.name.clone(),
                        count: blocking,
                    });
                }
            }
        }

        let mut report = DeleteReport::default();
        for (i, current) in doomed.iter().enumerate() {
            let committed = match self.store.delete(current, if i == 0 { expected } else { None }) {
                Ok(c) => c,
                Err(CoreError::NotFound(_)) if i > 0 => continue,
                Err(e) => return Err(e),
            };
            self.after_commit(&committed, ChangeOrigin::Local)?;
            report.deleted.push(current.clone());
        }

        let mut nullified = BTreeSet::new();
        for target in &report.deleted {
            for referrer in self.identity.referrers(target) {
                if seen.contains(&referrer.source) {
                    continue;
                }
                let Some(entity) = self
                    .identity
                    .entity_of(&referrer.source)
                    .and_then(|name| self.model.entity(&name))
                else {
                    continue;
                };
                let Some(rel) = entity.relationship(&referrer.relationship) else {
                    continue;
                };
                let edited = self
                    .store
                    .update(&referrer.source, |body| codec::remove_reference(body, rel, target))?;
                if let Some(committed) = edited {
                    self.after_commit(&committed, ChangeOrigin::Local)?;
                    nullified.insert(referrer.source);
                }
            }
        }
        report.nullified = nullified.into_iter().collect();
        info!(
            doc_id = %id,
            deleted = report.deleted.len(),
            nullified = report.nullified.len(),
            "object deleted"
        );
        Ok(report)
    }

    fn live_entity(&self, id: &DocumentId) -> Option<(RevisionNode, &EntityDescriptor)> {
        let node = self.store.winner(id).ok().filter(|n| !n.deleted)?;
        let entity = node
            .body
            .get(ENTITY_KEY)
            .and_then(Value::as_text)
            .and_then(|name| self.model.entity(name))?;
        Some((node, entity))
    }

    /// Live objects related to `id` through `rel`: its targets plus, when
    /// an inverse is declared, referrers through that inverse.
    fn related(&self, id: &DocumentId, body: &Value, rel: &RelationshipDescriptor) -> BTreeSet<DocumentId> {
        let mut out: BTreeSet<DocumentId> = match body.get(&rel.name) {
            Some(Value::Text(target)) => std::iter::once(DocumentId::new(target.as_str())).collect(),
            Some(Value::Array(_)) => self
                .identity
                .references(id)
                .into_iter()
                .filter(|(name, _)| name == &rel.name)
                .map(|(_, target)| target)
                .collect(),
            _ => BTreeSet::new(),
        };
        if let Some(inverse) = &rel.inverse {
            out.extend(
                self.identity
                    .referrers(id)
                    .into_iter()
                    .filter(|r| &r.relationship == inverse)
                    .filter(|r| self.identity.entity_of(&r.source).as_deref() == Some(rel.target.as_str()))
                    .map(|r| r.source),
            );
        }
        out.retain(|d| self.store.is_live(d));
        out
    }

    fn after_commit(&self, committed: &Committed, origin: ChangeOrigin) -> CoreResult<()> {
        self.reindex(&committed.doc_id)?;
        if committed.conflicted {
            debug!(doc_id = %committed.doc_id, winner = %committed.rev, "document is conflicted");
        }
        self.changes.emit(ChangeEvent::from_commit(committed, origin));
        Ok(())
    }

    fn reindex(&self, id: &DocumentId) -> CoreResult<()> {
        let winner = self.store.winner(id)?;
        let entity = winner
            .body
            .get(ENTITY_KEY)
            .and_then(Value::as_text)
            .and_then(|name| self.model.entity(name));
        match entity {
            Some(entity) if !winner.deleted => {
                self.identity
                    .register(id, entity.name(), codec::body_references(&winner.body, entity));
            }
            _ => self.identity.forget(id),
        }
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Winning revision of a live document, attachments as stubs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if absent or deleted.
    pub fn get(&self, id: &DocumentId) -> CoreResult<DocumentRecord> {
        self.ensure_open()?;
        let winner = self.store.winner(id)?;
        if winner.deleted {
            return Err(CoreError::NotFound(id.to_string()));
        }
        Ok(winner.to_record(id))
    }

    /// Any stored revision, including superseded and deleted ones.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] or [`CoreError::RevisionNotFound`].
    pub fn get_revision(&self, id: &DocumentId, rev: &RevisionId) -> CoreResult<DocumentRecord> {
        self.ensure_open()?;
        let tree = self.revision_tree(id)?;
        tree.get(rev)
            .map(|node| node.to_record(id))
            .ok_or_else(|| CoreError::RevisionNotFound {
                doc_id: id.to_string(),
                rev: rev.to_string(),
            })
    }

    /// Decoded winning revision of a live document.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if absent or deleted; decode errors.
    pub fn resolve(&self, id: &DocumentId) -> CoreResult<ObjectInstance> {
        self.decode(&self.get(id)?)
    }

    /// Decoded object behind an external identifier.
    ///
    /// # Errors
    ///
    /// See [`Datastore::resolve`]; also fails on an entity mismatch.
    pub fn fetch(&self, object_id: &ObjectId) -> CoreResult<ObjectInstance> {
        let id = self.identity.document_id(object_id)?;
        self.resolve(&id)
    }

    /// Follows a reference, placeholder or not.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] while the target is still missing;
    /// [`CoreError::TypeMismatch`] if the target is another entity.
    pub fn resolve_ref(&self, reference: &ObjectRef) -> CoreResult<ObjectInstance> {
        let instance = self.resolve(reference.target())?;
        if instance.entity != reference.entity() {
            return Err(CoreError::type_mismatch(
                reference.target().to_string(),
                reference.entity(),
                instance.entity,
            ));
        }
        Ok(instance)
    }

    /// Snapshot of a document's revision tree.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the document has no revisions.
    pub fn revision_tree(&self, id: &DocumentId) -> CoreResult<RevisionTree> {
        self.store
            .tree(id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    /// `rev` and its ancestors, newest first, bounded by the configured
    /// history limit.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] or [`CoreError::RevisionNotFound`].
    pub fn revision_history(&self, id: &DocumentId, rev: &RevisionId) -> CoreResult<Vec<RevisionId>> {
        let tree = self.revision_tree(id)?;
        Ok(tree
            .ancestry(rev, self.config.revision_history_limit)?
            .into_iter()
            .map(|n| n.rev.clone())
            .collect())
    }

    /// Identifiers of every document with revisions, tombstoned included.
    #[must_use]
    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.store.document_ids()
    }

    /// Number of live documents.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.store
            .document_ids()
            .iter()
            .filter(|id| self.store.is_live(id))
            .count()
    }

    /// Receiver of every future change event.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Retained change events after `cursor`.
    #[must_use]
    pub fn poll_changes(&self, cursor: u64, limit: usize) -> Vec<ChangeEvent> {
        self.changes.poll(cursor, limit)
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    /// Every conflicted document, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogicalCorruption`] for a tree without tips.
    pub fn list_conflicts(&self) -> CoreResult<Vec<ConflictSet>> {
        self.ensure_open()?;
        let mut out = Vec::new();
        for id in self.store.conflicted() {
            if let Some(tree) = self.store.tree(&id) {
                out.extend(ConflictSet::from_tree(&tree)?);
            }
        }
        Ok(out)
    }

    /// Closes a conflict; see [`Resolution`]. Returns the new winner.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the document is absent
    /// - [`CoreError::InvalidOperation`] if it is not conflicted or the
    ///   chosen revision is not a live tip
    pub fn resolve_conflict(&self, id: &DocumentId, resolution: Resolution) -> CoreResult<RevisionId> {
        self.ensure_open()?;
        let resolution = match resolution {
            Resolution::Merge { body, attachments } => {
                let mut merged = DocumentRecord {
                    id: id.clone(),
                    rev: None,
                    body,
                    attachments,
                    deleted: false,
                };
                codec::extract_attachments(&mut merged, self.blobs.as_ref())?;
                Resolution::Merge {
                    body: merged.body,
                    attachments: merged.attachments,
                }
            }
            choose => choose,
        };
        let committed = self.store.resolve(id, &resolution)?;
        info!(doc_id = %id, winner = %committed.rev, "conflict resolved");
        self.after_commit(&committed, ChangeOrigin::Local)?;
        Ok(committed.rev)
    }

    /// Hands every conflicted document in `ids` to `resolver`, applying
    /// the resolutions it returns. Ids that are not conflicted are skipped.
    ///
    /// # Errors
    ///
    /// The first resolver or write error stops processing.
    pub fn process_conflicts<'a, I>(&self, ids: I, resolver: &dyn ConflictResolver) -> CoreResult<ConflictReport>
    where
        I: IntoIterator<Item = &'a DocumentId>,
    {
        let mut report = ConflictReport::default();
        for id in ids {
            let Some(tree) = self.store.tree(id) else {
                continue;
            };
            let Some(conflict) = ConflictSet::from_tree(&tree)? else {
                continue;
            };
            report.examined += 1;
            match resolver.resolve(&conflict)? {
                Some(resolution) => {
                    self.resolve_conflict(id, resolution)?;
                    report.resolved += 1;
                }
                None => report.remaining.push(id.clone()),
            }
        }
        Ok(report)
    }

    // ========================================================================
    // Replication support
    // ========================================================================

    /// Changes feed: documents written after local sequence `since`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogicalCorruption`] for a tree without tips.
    pub fn changes_since(&self, since: u64, limit: usize) -> CoreResult<Vec<Change>> {
        self.ensure_open()?;
        self.store.changes_since(since, limit)
    }

    /// Latest local sequence number.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.store.last_sequence()
    }

    /// The subset of `revs` this datastore lacks.
    #[must_use]
    pub fn revs_diff(&self, id: &DocumentId, revs: &[RevisionId]) -> Vec<RevisionId> {
        self.store.revs_diff(id, revs)
    }

    /// Revisions `revs` with their ancestry (up to the history limit,
    /// stopping at any revision in `known`) and the attachment bytes they
    /// reference.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`], [`CoreError::RevisionNotFound`], or
    /// [`CoreError::MissingAttachment`] if a blob is absent.
    pub fn export_revisions(
        &self,
        id: &DocumentId,
        revs: &[RevisionId],
        known: &[RevisionId],
    ) -> CoreResult<RevisionBundle> {
        self.ensure_open()?;
        let tree = self.revision_tree(id)?;
        let mut selected: BTreeMap<RevisionId, RevisionNode> = BTreeMap::new();
        for rev in revs {
            for node in tree.ancestry(rev, self.config.revision_history_limit)? {
                if known.contains(&node.rev) || selected.contains_key(&node.rev) {
                    break;
                }
                selected.insert(node.rev.clone(), node.clone());
            }
        }

        let mut blobs = Vec::new();
        let mut sent = HashSet::new();
        for node in selected.values() {
            for (name, attachment) in &node.attachments {
                if !sent.insert((name.clone(), attachment.digest.clone())) {
                    continue;
                }
                let data = self
                    .blobs
                    .get(&AttachmentKey::new(id.as_str(), name.as_str()), &attachment.digest)?
                    .ok_or_else(|| CoreError::MissingAttachment {
                        doc_id: id.to_string(),
                        name: name.clone(),
                    })?;
                blobs.push(BlobData {
                    name: name.clone(),
                    digest: attachment.digest.clone(),
                    data,
                });
            }
        }
        Ok(RevisionBundle {
            doc_id: id.clone(),
            revisions: selected.into_values().collect(),
            blobs,
        })
    }

    /// Applies revisions received from a peer. Returns the change event if
    /// anything was new.
    ///
    /// Attachment bytes are verified and written before the revisions;
    /// every attachment a new revision references must then be present.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidDocument`] if bytes fail their digest
    /// - [`CoreError::MissingAttachment`] if a referenced blob is absent
    /// - [`CoreError::InvalidRevision`] if a revision fails verification
    pub fn import_revisions(&self, bundle: RevisionBundle) -> CoreResult<Option<ChangeEvent>> {
        self.ensure_open()?;
        let id = bundle.doc_id;
        for blob in &bundle.blobs {
            if attachment_digest(&blob.data) != blob.digest {
                return Err(CoreError::invalid_document(format!(
                    "replicated attachment '{}' of {id} does not match its digest",
                    blob.name
                )));
            }
            self.blobs.put(
                &AttachmentKey::new(id.as_str(), blob.name.as_str()),
                &blob.digest,
                &blob.data,
            )?;
        }
        for node in &bundle.revisions {
            for (name, attachment) in &node.attachments {
                let key = AttachmentKey::new(id.as_str(), name.as_str());
                if !self.blobs.contains(&key, &attachment.digest)? {
                    return Err(CoreError::MissingAttachment {
                        doc_id: id.to_string(),
                        name: name.clone(),
                    });
                }
            }
        }

        let Some(committed) = self.store.apply_replicated(&id, bundle.revisions)? else {
            return Ok(None);
        };
        if committed.conflicted {
            warn!(doc_id = %id, winner = %committed.rev, "replication produced a conflict");
        }
        self.reindex(&id)?;
        let event = ChangeEvent::from_commit(&committed, ChangeOrigin::Replicated);
        self.changes.emit(event.clone());
        Ok(Some(event))
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("name", &self.config.name)
            .field("is_open", &self.is_open())
            .field("documents", &self.store.document_ids().len())
            .field("last_sequence", &self.store.last_sequence())
            .finish_non_exhaustive()
    }
}
