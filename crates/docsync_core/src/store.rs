//! Revision trees of every document, with per-document write locks and a
//! local change sequence, persisted through the revision journal.
//!
//! Lock order is: tree table, then one document's tree, then the
//! sequencer, then the journal. The table lock is only held long enough
//! to clone a slot.
//!
//! A commit is journaled before its revisions become visible, so a write
//! that returned survives a reopen.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use docsync_codec::Value;
use docsync_storage::LogBackend;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::document::{DocumentId, DocumentRecord, RevisionId};
use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use crate::revision::{resolution_nodes, Resolution, RevisionNode, RevisionTree};

type Slot = Arc<Mutex<RevisionTree>>;

/// Outcome of a write that changed a document's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// Document identifier.
    pub doc_id: DocumentId,
    /// Winning revision after the write.
    pub rev: RevisionId,
    /// Local sequence number assigned to the write.
    pub sequence: u64,
    /// Revisions added by the write.
    pub inserted: usize,
    /// Whether the document had no revisions before.
    pub created: bool,
    /// Whether the winner is a tombstone.
    pub deleted: bool,
    /// Whether the document has more than one live tip.
    pub conflicted: bool,
}

/// One entry of the changes feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Sequence of the latest write to the document.
    pub sequence: u64,
    /// Document identifier.
    pub doc_id: DocumentId,
    /// All leaf revisions, ascending.
    pub tips: Vec<RevisionId>,
    /// Whether the winner is a tombstone.
    pub deleted: bool,
}

#[derive(Debug, Default)]
struct Sequencer {
    last: u64,
    by_doc: HashMap<DocumentId, u64>,
    log: BTreeMap<u64, DocumentId>,
}

impl Sequencer {
    fn record(&mut self, id: &DocumentId, sequence: u64) {
        self.last = self.last.max(sequence);
        if let Some(old) = self.by_doc.insert(id.clone(), sequence) {
            self.log.remove(&old);
        }
        self.log.insert(sequence, id.clone());
    }
}

/// Document store: revision trees in memory, commits in a journal.
#[derive(Debug, Default)]
pub struct DocumentStore {
    trees: RwLock<HashMap<DocumentId, Slot>>,
    sequencer: Mutex<Sequencer>,
    journal: Journal,
}

impl DocumentStore {
    /// Creates an empty store with an in-memory journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store over a journal log, replaying every recorded commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogicalCorruption`] if the journal is damaged,
    /// its sequences do not increase, or a recorded revision does not fit
    /// its tree.
    pub fn open(backend: Box<dyn LogBackend>, sync_on_write: bool) -> CoreResult<Self> {
        let store = Self {
            trees: RwLock::default(),
            sequencer: Mutex::default(),
            journal: Journal::new(backend, sync_on_write),
        };
        let records = store.journal.replay()?;
        let replayed = records.len();
        for record in records {
            let last = store.last_sequence();
            if record.sequence <= last {
                return Err(CoreError::corruption(
                    record.doc_id.as_str(),
                    format!("journal sequence {} does not follow {last}", record.sequence),
                ));
            }
            let slot = store.slot_or_create(&record.doc_id);
            let mut tree = slot.lock();
            for node in record.nodes {
                tree.insert(node).map_err(|e| {
                    CoreError::corruption(record.doc_id.as_str(), format!("journal replay: {e}"))
                })?;
            }
            store.sequencer.lock().record(&record.doc_id, record.sequence);
        }
        debug!(records = replayed, last_sequence = store.last_sequence(), "journal replayed");
        Ok(store)
    }

    fn slot(&self, id: &DocumentId) -> Option<Slot> {
        self.trees.read().get(id).cloned()
    }

    fn slot_or_create(&self, id: &DocumentId) -> Slot {
        if let Some(slot) = self.slot(id) {
            return slot;
        }
        let mut trees = self.trees.write();
        Arc::clone(
            trees
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(RevisionTree::new(id.clone())))),
        )
    }

    fn slots(&self) -> Vec<Slot> {
        self.trees.read().values().cloned().collect()
    }

    /// Journals `nodes`, then inserts them and assigns the next sequence.
    /// Every node must already be admitted by `tree`.
    fn commit(&self, tree: &mut RevisionTree, nodes: Vec<RevisionNode>, created: bool) -> CoreResult<Committed> {
        let mut sequencer = self.sequencer.lock();
        let sequence = sequencer.last + 1;
        self.journal.append(sequence, tree.doc_id(), &nodes)?;
        let mut inserted = 0;
        for node in nodes {
            if tree.insert(node)? {
                inserted += 1;
            }
        }
        sequencer.record(tree.doc_id(), sequence);
        drop(sequencer);

        let winner = tree.winner()?;
        Ok(Committed {
            doc_id: tree.doc_id().clone(),
            rev: winner.rev.clone(),
            sequence,
            inserted,
            created,
            deleted: winner.deleted,
            conflicted: tree.is_conflicted(),
        })
    }

    /// Appends `record` as a child of the current winner.
    ///
    /// `expected` must name the current winner. `None` is accepted for a
    /// new document and for one whose winner is a tombstone.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidDocument`] if the body is not an object
    /// - [`CoreError::RevisionMismatch`] if `expected` is stale
    pub fn save(&self, record: &DocumentRecord, expected: Option<&RevisionId>) -> CoreResult<Committed> {
        if record.body.as_object().is_none() {
            return Err(CoreError::invalid_document(format!(
                "body of {} must be an object, found {}",
                record.id,
                record.body.type_name()
            )));
        }
        let slot = self.slot_or_create(&record.id);
        let mut tree = slot.lock();
        let current = if tree.is_empty() { None } else { Some(tree.winner()?) };
        let accepted = match (current, expected) {
            (None, None) => true,
            (Some(winner), None) => winner.deleted,
            (Some(winner), Some(rev)) => &winner.rev == rev,
            (None, Some(_)) => false,
        };
        if !accepted {
            return Err(CoreError::RevisionMismatch {
                doc_id: record.id.to_string(),
                expected: expected.map(ToString::to_string),
                actual: current.map(|n| n.rev.to_string()),
            });
        }
        let parent = current.map(|n| n.rev.clone());
        let created = parent.is_none();
        let node = RevisionNode::build(
            parent.as_ref(),
            record.deleted,
            record.body.clone(),
            &record.attachments,
        )?;
        tree.admits(&node)?;
        self.commit(&mut tree, vec![node], created)
    }

    /// Appends a tombstone to a live document.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the document is absent or deleted
    /// - [`CoreError::RevisionMismatch`] if `expected` is given and stale
    pub fn delete(&self, id: &DocumentId, expected: Option<&RevisionId>) -> CoreResult<Committed> {
        let slot = self.slot(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        let mut tree = slot.lock();
        if tree.is_empty() || tree.is_deleted()? {
            return Err(CoreError::NotFound(id.to_string()));
        }
        let winner = tree.winner()?.rev.clone();
        if let Some(rev) = expected.filter(|rev| **rev != winner) {
            return Err(CoreError::RevisionMismatch {
                doc_id: id.to_string(),
                expected: Some(rev.to_string()),
                actual: Some(winner.to_string()),
            });
        }
        let node = RevisionNode::build(Some(&winner), true, Value::empty_object(), &BTreeMap::new())?;
        tree.admits(&node)?;
        self.commit(&mut tree, vec![node], false)
    }

    /// Edits the winning body of a live document in place, appending a
    /// child revision if `edit` reports a change. Attachments carry over.
    ///
    /// Returns `None` when the document is absent, deleted, or unchanged.
    ///
    /// # Errors
    ///
    /// Fails if the new revision cannot be built.
    pub fn update<F>(&self, id: &DocumentId, edit: F) -> CoreResult<Option<Committed>>
    where
        F: FnOnce(&mut Value) -> bool,
    {
        let Some(slot) = self.slot(id) else {
            return Ok(None);
        };
        let mut tree = slot.lock();
        if tree.is_empty() {
            return Ok(None);
        }
        let winner = tree.winner()?;
        if winner.deleted {
            return Ok(None);
        }
        let mut body = winner.body.clone();
        if !edit(&mut body) {
            return Ok(None);
        }
        let node = RevisionNode::build(Some(&winner.rev), false, body, &winner.attachments)?;
        tree.admits(&node)?;
        self.commit(&mut tree, vec![node], false).map(Some)
    }

    /// Inserts revisions received from a peer.
    ///
    /// Every node's lineage is checked and its id recomputed from its
    /// content before anything is inserted. Already-known revisions are
    /// skipped. Returns `None` if nothing was new.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRevision`] if a node fails verification
    /// or does not fit the tree. Nodes ordered before a misfit are still
    /// committed.
    pub fn apply_replicated(
        &self,
        id: &DocumentId,
        mut nodes: Vec<RevisionNode>,
    ) -> CoreResult<Option<Committed>> {
        for node in &nodes {
            crate::revision::check_lineage(id, node)?;
            if !node.verify()? {
                return Err(CoreError::invalid_revision(
                    id.as_str(),
                    format!("{} does not match its content", node.rev),
                ));
            }
        }
        nodes.sort_by(|a, b| a.rev.cmp(&b.rev));
        nodes.dedup_by(|a, b| a.rev == b.rev);

        let slot = self.slot_or_create(id);
        let mut tree = slot.lock();
        let created = tree.is_empty();
        let mut fresh = Vec::new();
        let mut failure = None;
        for node in nodes {
            match tree.admits(&node) {
                Ok(true) => fresh.push(node),
                Ok(false) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let committed = if fresh.is_empty() {
            None
        } else {
            Some(self.commit(&mut tree, fresh, created)?)
        };
        match failure {
            Some(e) => Err(e),
            None => Ok(committed),
        }
    }

    /// Closes a conflict by appending the nodes for `resolution`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the document is absent
    /// - [`CoreError::InvalidOperation`] if it is not conflicted or the
    ///   chosen revision is not a live tip
    pub fn resolve(&self, id: &DocumentId, resolution: &Resolution) -> CoreResult<Committed> {
        let slot = self.slot(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        let mut tree = slot.lock();
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for node in resolution_nodes(&tree, resolution)? {
            if tree.admits(&node)? && seen.insert(node.rev.clone()) {
                nodes.push(node);
            }
        }
        self.commit(&mut tree, nodes, false)
    }

    /// Current winner, which may be a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the document has no revisions.
    pub fn winner(&self, id: &DocumentId) -> CoreResult<RevisionNode> {
        let slot = self.slot(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        let tree = slot.lock();
        if tree.is_empty() {
            return Err(CoreError::NotFound(id.to_string()));
        }
        tree.winner().cloned()
    }

    /// Whether the document has any revision, tombstones included.
    #[must_use]
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.slot(id).is_some_and(|slot| !slot.lock().is_empty())
    }

    /// Whether the document exists and its winner is not a tombstone.
    #[must_use]
    pub fn is_live(&self, id: &DocumentId) -> bool {
        self.winner(id).is_ok_and(|n| !n.deleted)
    }

    /// Snapshot of a document's tree.
    #[must_use]
    pub fn tree(&self, id: &DocumentId) -> Option<RevisionTree> {
        let slot = self.slot(id)?;
        let tree = slot.lock();
        (!tree.is_empty()).then(|| tree.clone())
    }

    /// The subset of `revs` not present locally.
    #[must_use]
    pub fn revs_diff(&self, id: &DocumentId, revs: &[RevisionId]) -> Vec<RevisionId> {
        match self.slot(id) {
            Some(slot) => {
                let tree = slot.lock();
                revs.iter().filter(|r| !tree.contains(r)).cloned().collect()
            }
            None => revs.to_vec(),
        }
    }

    /// Documents written after sequence `since`, oldest first, at most
    /// `limit` entries. Each document appears once, at its latest write.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogicalCorruption`] for a tree without tips.
    pub fn changes_since(&self, since: u64, limit: usize) -> CoreResult<Vec<Change>> {
        let entries: Vec<(u64, DocumentId)> = self
            .sequencer
            .lock()
            .log
            .range(since.saturating_add(1)..)
            .take(limit)
            .map(|(seq, id)| (*seq, id.clone()))
            .collect();
        let mut changes = Vec::with_capacity(entries.len());
        for (sequence, doc_id) in entries {
            let Some(slot) = self.slot(&doc_id) else {
                continue;
            };
            let tree = slot.lock();
            changes.push(Change {
                sequence,
                tips: tree.tips().into_iter().map(|n| n.rev.clone()).collect(),
                deleted: tree.is_deleted()?,
                doc_id,
            });
        }
        Ok(changes)
    }

    /// Identifiers of conflicted documents, sorted.
    #[must_use]
    pub fn conflicted(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self
            .slots()
            .into_iter()
            .filter_map(|slot| {
                let tree = slot.lock();
                tree.is_conflicted().then(|| tree.doc_id().clone())
            })
            .collect();
        ids.sort();
        ids
    }

    /// Identifiers of every document with at least one revision, sorted.
    #[must_use]
    pub fn document_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self
            .slots()
            .into_iter()
            .filter_map(|slot| {
                let tree = slot.lock();
                (!tree.is_empty()).then(|| tree.doc_id().clone())
            })
            .collect();
        ids.sort();
        ids
    }

    /// Latest assigned sequence number (0 when nothing was written).
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.sequencer.lock().last
    }
}
