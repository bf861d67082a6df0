//! Conflict detection and resolution policy.

use std::collections::BTreeMap;

use docsync_codec::Value;

use super::tree::{RevisionNode, RevisionTree};
use crate::document::{Attachment, DocumentId, RevisionId};
use crate::error::{CoreError, CoreResult};

/// How to close a conflicted document.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep this live tip; every other live tip gets a tombstone child.
    Choose(RevisionId),
    /// Save a merged body as a child of the current winner; every other
    /// live tip gets a tombstone child.
    Merge {
        /// Merged body.
        body: Value,
        /// Attachments of the merged revision (stubs or with bytes).
        attachments: BTreeMap<String, Attachment>,
    },
}

impl Resolution {
    /// A merge without attachments.
    #[must_use]
    pub fn merge(body: Value) -> Self {
        Self::Merge {
            body,
            attachments: BTreeMap::new(),
        }
    }
}

/// A conflicted document as presented to a resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictSet {
    /// Document identifier.
    pub doc_id: DocumentId,
    /// Current winning revision.
    pub winner: RevisionNode,
    /// Superseded live tips, ascending.
    pub superseded: Vec<RevisionNode>,
}

impl ConflictSet {
    /// Snapshot of a tree's conflict, or `None` if it is not conflicted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogicalCorruption`] if the tree has no tips.
    pub fn from_tree(tree: &RevisionTree) -> CoreResult<Option<Self>> {
        let superseded = tree.superseded()?;
        if superseded.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            doc_id: tree.doc_id().clone(),
            winner: tree.winner()?.clone(),
            superseded: superseded.into_iter().cloned().collect(),
        }))
    }
}

/// Application hook deciding how conflicts are closed.
///
/// Returning `Ok(None)` leaves the document conflicted for later manual
/// resolution.
pub trait ConflictResolver: Send + Sync {
    /// Decide a resolution for one conflicted document.
    ///
    /// # Errors
    ///
    /// An error aborts conflict processing for the caller.
    fn resolve(&self, conflict: &ConflictSet) -> CoreResult<Option<Resolution>>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&ConflictSet) -> CoreResult<Option<Resolution>> + Send + Sync,
{
    fn resolve(&self, conflict: &ConflictSet) -> CoreResult<Option<Resolution>> {
        self(conflict)
    }
}

/// Built-in resolution policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Leave conflicts for the application.
    #[default]
    Manual,
    /// Keep the deterministic winner and close the other branches.
    DeterministicWinner,
}

impl ConflictPolicy {
    /// Policy code for wire/config use.
    #[must_use]
    pub const fn to_code(self) -> u8 {
        match self {
            Self::Manual => 0,
            Self::DeterministicWinner => 1,
        }
    }

    /// Parses a policy code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Manual),
            1 => Some(Self::DeterministicWinner),
            _ => None,
        }
    }
}

impl ConflictResolver for ConflictPolicy {
    fn resolve(&self, conflict: &ConflictSet) -> CoreResult<Option<Resolution>> {
        Ok(match self {
            Self::Manual => None,
            Self::DeterministicWinner => Some(Resolution::Choose(conflict.winner.rev.clone())),
        })
    }
}

/// Nodes that apply `resolution` to `tree`, in insertion order.
///
/// The tree is not modified. Tombstones close losing branches, so the
/// result replicates like any other edit and every replica converges on
/// the same resolution.
///
/// # Errors
///
/// Returns [`CoreError::InvalidOperation`] if the document is not
/// conflicted or the chosen revision is not a live tip.
pub fn resolution_nodes(tree: &RevisionTree, resolution: &Resolution) -> CoreResult<Vec<RevisionNode>> {
    if !tree.is_conflicted() {
        return Err(CoreError::invalid_operation(format!(
            "{} has no conflict to resolve",
            tree.doc_id()
        )));
    }
    let live = tree.live_tips();
    let winner = tree.winner()?;
    let (keep, mut nodes) = match resolution {
        Resolution::Choose(rev) => {
            if !live.iter().any(|n| &n.rev == rev) {
                return Err(CoreError::invalid_operation(format!(
                    "{rev} is not a live tip of {}",
                    tree.doc_id()
                )));
            }
            (rev.clone(), Vec::new())
        }
        Resolution::Merge { body, attachments } => {
            let merged = RevisionNode::build(Some(&winner.rev), false, body.clone(), attachments)?;
            (winner.rev.clone(), vec![merged])
        }
    };
    for tip in live.iter().filter(|n| n.rev != keep) {
        nodes.push(RevisionNode::build(
            Some(&tip.rev),
            true,
            Value::empty_object(),
            &BTreeMap::new(),
        )?);
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str) -> Value {
        Value::object([("text", Value::from(text))])
    }

    fn conflicted() -> (RevisionTree, RevisionNode, RevisionNode) {
        let mut tree = RevisionTree::new(DocumentId::new("d"));
        let root = RevisionNode::build(None, false, body("r1"), &BTreeMap::new()).unwrap();
        let a = RevisionNode::build(Some(&root.rev), false, body("a"), &BTreeMap::new()).unwrap();
        let b = RevisionNode::build(Some(&root.rev), false, body("b"), &BTreeMap::new()).unwrap();
        for n in [root, a.clone(), b.clone()] {
            tree.insert(n).unwrap();
        }
        (tree, a, b)
    }

    fn apply(tree: &mut RevisionTree, nodes: Vec<RevisionNode>) {
        for n in nodes {
            tree.insert(n).unwrap();
        }
    }

    #[test]
    fn choose_loser_closes_winner_branch() {
        let (mut tree, a, b) = conflicted();
        let loser = if a.rev < b.rev { a } else { b };
        let nodes = resolution_nodes(&tree, &Resolution::Choose(loser.rev.clone())).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].deleted);
        apply(&mut tree, nodes);
        assert!(!tree.is_conflicted());
        assert_eq!(tree.winner().unwrap().rev, loser.rev);
        // the closed branch is still retrievable
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn merge_appends_to_winner() {
        let (mut tree, _, _) = conflicted();
        let winner = tree.winner().unwrap().rev.clone();
        let nodes = resolution_nodes(&tree, &Resolution::merge(body("merged"))).unwrap();
        apply(&mut tree, nodes);
        let new_winner = tree.winner().unwrap();
        assert_eq!(new_winner.parent.as_ref(), Some(&winner));
        assert_eq!(new_winner.body, body("merged"));
        assert!(!tree.is_conflicted());
    }

    #[test]
    fn resolving_is_deterministic_across_replicas() {
        let (t1, _, _) = conflicted();
        let (t2, _, _) = conflicted();
        let n1 = resolution_nodes(&t1, &Resolution::merge(body("m"))).unwrap();
        let n2 = resolution_nodes(&t2, &Resolution::merge(body("m"))).unwrap();
        assert_eq!(n1, n2);
    }

    #[test]
    fn invalid_resolutions() {
        let (tree, _, _) = conflicted();
        assert!(matches!(
            resolution_nodes(&tree, &Resolution::Choose(RevisionId::new(2, "00"))),
            Err(CoreError::InvalidOperation(_))
        ));

        let mut calm = RevisionTree::new(DocumentId::new("c"));
        let root = RevisionNode::build(None, false, body("x"), &BTreeMap::new()).unwrap();
        calm.insert(root.clone()).unwrap();
        assert!(resolution_nodes(&calm, &Resolution::Choose(root.rev)).is_err());
    }

    #[test]
    fn policies() {
        let (tree, _, _) = conflicted();
        let set = ConflictSet::from_tree(&tree).unwrap().unwrap();
        assert_eq!(set.superseded.len(), 1);
        assert_eq!(ConflictPolicy::Manual.resolve(&set).unwrap(), None);
        assert_eq!(
            ConflictPolicy::DeterministicWinner.resolve(&set).unwrap(),
            Some(Resolution::Choose(set.winner.rev.clone()))
        );
        for p in [ConflictPolicy::Manual, ConflictPolicy::DeterministicWinner] {
            assert_eq!(ConflictPolicy::from_code(p.to_code()), Some(p));
        }

        let closure = |c: &ConflictSet| -> CoreResult<Option<Resolution>> {
            Ok(Some(Resolution::Choose(c.superseded[0].rev.clone())))
        };
        assert!(matches!(
            closure.resolve(&set).unwrap(),
            Some(Resolution::Choose(_))
        ));
    }
}
