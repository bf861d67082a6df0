//! Cross-crate integration test helpers.
//!
//! In-process replication between two datastores, without sessions or a
//! transport, for tests that only care about convergence.

use docsync_core::{CoreError, CoreResult, Datastore, DocumentId, RevisionId};

use crate::fixtures::TestDatastore;

const BATCH: usize = 100;

/// Copies every revision `from` has and `to` lacks. Returns the number of
/// documents that gained revisions.
pub fn replicate(from: &Datastore, to: &Datastore) -> CoreResult<usize> {
    let mut since = 0;
    let mut applied = 0;
    loop {
        let changes = from.changes_since(since, BATCH)?;
        let Some(last) = changes.last().map(|c| c.sequence) else {
            break;
        };
        for change in &changes {
            let missing = to.revs_diff(&change.doc_id, &change.tips);
            if missing.is_empty() {
                continue;
            }
            let known = tip_revs(to, &change.doc_id)?;
            let bundle = from.export_revisions(&change.doc_id, &missing, &known)?;
            if to.import_revisions(bundle)?.is_some() {
                applied += 1;
            }
        }
        if changes.len() < BATCH {
            break;
        }
        since = last;
    }
    Ok(applied)
}

/// Replicates in both directions.
pub fn sync_both(a: &Datastore, b: &Datastore) -> CoreResult<(usize, usize)> {
    let a_to_b = replicate(a, b)?;
    let b_to_a = replicate(b, a)?;
    Ok((a_to_b, b_to_a))
}

/// Tip revisions of `id`, empty if the document is unknown.
pub fn tip_revs(ds: &Datastore, id: &DocumentId) -> CoreResult<Vec<RevisionId>> {
    match ds.revision_tree(id) {
        Ok(tree) => Ok(tree.tips().into_iter().map(|n| n.rev.clone()).collect()),
        Err(CoreError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Winning revision of `id`.
pub fn winner_rev(ds: &Datastore, id: &DocumentId) -> RevisionId {
    let tree = ds.revision_tree(id).expect("document has a revision tree");
    tree.winner().expect("tree has a winner").rev.clone()
}

/// Panics unless both datastores hold the same documents with the same
/// tips and winners.
pub fn assert_converged(a: &Datastore, b: &Datastore) {
    let ids = a.document_ids();
    assert_eq!(ids, b.document_ids(), "document sets differ");
    for id in &ids {
        let (mut ta, mut tb) = (
            tip_revs(a, id).expect("tips of a"),
            tip_revs(b, id).expect("tips of b"),
        );
        ta.sort();
        tb.sort();
        assert_eq!(ta, tb, "tips of {id} differ");
        assert_eq!(winner_rev(a, id), winner_rev(b, id), "winner of {id} differs");
    }
}

/// Two fixture datastores for replication tests.
pub struct ReplicaPair {
    /// First replica.
    pub left: TestDatastore,
    /// Second replica.
    pub right: TestDatastore,
}

impl ReplicaPair {
    /// Two in-memory replicas named `left` and `right`.
    pub fn new() -> Self {
        Self {
            left: TestDatastore::memory("left"),
            right: TestDatastore::memory("right"),
        }
    }

    /// Replicates both ways and asserts convergence.
    pub fn sync(&self) {
        sync_both(&self.left, &self.right).expect("replication failed");
        assert_converged(&self.left, &self.right);
    }
}

impl Default for ReplicaPair {
    fn default() -> Self {
        Self::new()
    }
}
