//! Per-document revision tree.

use std::collections::{BTreeMap, HashMap};

use docsync_codec::Value;

use crate::document::{uint_value, Attachment, DocumentId, DocumentRecord, RevisionId};
use crate::error::{CoreError, CoreResult};

/// One revision of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionNode {
    /// Revision identifier.
    pub rev: RevisionId,
    /// Parent revision; `None` for a root.
    pub parent: Option<RevisionId>,
    /// Whether this revision is a deletion tombstone.
    pub deleted: bool,
    /// Body snapshot.
    pub body: Value,
    /// Attachment stubs.
    pub attachments: BTreeMap<String, Attachment>,
}

impl RevisionNode {
    /// Builds a node, computing its id from content.
    ///
    /// # Errors
    ///
    /// Fails if the body cannot be canonically encoded.
    pub fn build(
        parent: Option<&RevisionId>,
        deleted: bool,
        body: Value,
        attachments: &BTreeMap<String, Attachment>,
    ) -> CoreResult<Self> {
        let stubs: BTreeMap<String, Attachment> = attachments
            .iter()
            .map(|(k, a)| (k.clone(), a.to_stub()))
            .collect();
        let rev = RevisionId::compute(parent, deleted, &body, &stubs)?;
        Ok(Self {
            rev,
            parent: parent.cloned(),
            deleted,
            body,
            attachments: stubs,
        })
    }

    /// Whether the id matches the content and parent.
    ///
    /// # Errors
    ///
    /// Fails if the body cannot be canonically encoded.
    pub fn verify(&self) -> CoreResult<bool> {
        let expected =
            RevisionId::compute(self.parent.as_ref(), self.deleted, &self.body, &self.attachments)?;
        Ok(expected == self.rev)
    }

    /// Value form: `{rev, parent, deleted, body, attachments}` where
    /// attachments map names to `{content_type, digest, length}` stubs.
    /// Used by the revision journal and the wire protocol.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let attachments = self
            .attachments
            .iter()
            .map(|(name, a)| {
                (
                    name.clone(),
                    Value::object([
                        ("content_type", Value::from(a.content_type.as_str())),
                        ("digest", Value::from(a.digest.as_str())),
                        ("length", uint_value(a.length)),
                    ]),
                )
            })
            .collect::<BTreeMap<_, _>>();
        Value::object([
            ("rev", Value::Text(self.rev.to_string())),
            (
                "parent",
                self.parent
                    .as_ref()
                    .map_or(Value::Null, |p| Value::Text(p.to_string())),
            ),
            ("deleted", Value::Bool(self.deleted)),
            ("body", self.body.clone()),
            ("attachments", Value::Object(attachments)),
        ])
    }

    /// Parses the form written by [`RevisionNode::to_value`]. The id is not
    /// verified against the content.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDocument`] naming the offending field.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let field = |v: &Value, name: &str| -> CoreResult<Value> {
            v.get(name)
                .cloned()
                .ok_or_else(|| CoreError::invalid_document(format!("revision field '{name}' is missing")))
        };
        let text = |v: &Value, name: &str| -> CoreResult<String> {
            match field(v, name)? {
                Value::Text(s) => Ok(s),
                _ => Err(CoreError::invalid_document(format!("revision field '{name}' must be text"))),
            }
        };
        if value.as_object().is_none() {
            return Err(CoreError::invalid_document("revision must be an object"));
        }

        let mut attachments = BTreeMap::new();
        let Value::Object(stubs) = field(value, "attachments")? else {
            return Err(CoreError::invalid_document("revision field 'attachments' must be an object"));
        };
        for (name, stub) in &stubs {
            let length = field(stub, "length")?
                .as_integer()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| {
                    CoreError::invalid_document(format!("length of attachment '{name}' must be a non-negative integer"))
                })?;
            attachments.insert(
                name.clone(),
                Attachment {
                    content_type: text(stub, "content_type")?,
                    digest: text(stub, "digest")?,
                    length,
                    data: None,
                },
            );
        }
        let parent = match field(value, "parent")? {
            Value::Null => None,
            Value::Text(p) => Some(p.parse()?),
            _ => return Err(CoreError::invalid_document("revision field 'parent' must be text or null")),
        };
        let deleted = field(value, "deleted")?
            .as_bool()
            .ok_or_else(|| CoreError::invalid_document("revision field 'deleted' must be a boolean"))?;
        Ok(Self {
            rev: text(value, "rev")?.parse()?,
            parent,
            deleted,
            body: field(value, "body")?,
            attachments,
        })
    }

    /// This revision as a record of document `id`.
    #[must_use]
    pub fn to_record(&self, id: &DocumentId) -> DocumentRecord {
        DocumentRecord {
            id: id.clone(),
            rev: Some(self.rev.clone()),
            body: self.body.clone(),
            attachments: self.attachments.clone(),
            deleted: self.deleted,
        }
    }
}

/// Checks a node's generation against its parent's.
///
/// # Errors
///
/// Returns [`CoreError::InvalidRevision`] if the generation is not one
/// more than the parent's (a parent at `u64::MAX` has no child), or a
/// root's is not 1.
pub fn check_lineage(doc_id: &DocumentId, node: &RevisionNode) -> CoreResult<()> {
    match &node.parent {
        Some(parent) if parent.child_generation() != Some(node.rev.generation()) => {
            Err(CoreError::invalid_revision(
                doc_id.as_str(),
                format!("{} cannot be a child of {parent}", node.rev),
            ))
        }
        None if node.rev.generation() != 1 => Err(CoreError::invalid_revision(
            doc_id.as_str(),
            format!("root revision {} must have generation 1", node.rev),
        )),
        _ => Ok(()),
    }
}

/// Arena of a document's revisions with parent pointers by id.
///
/// Nodes are never removed. A node whose parent is not present (history
/// truncated by a peer) is kept as a detached root.
#[derive(Debug, Clone, Default)]
pub struct RevisionTree {
    doc_id: DocumentId,
    nodes: Vec<RevisionNode>,
    index: HashMap<RevisionId, usize>,
    child_count: Vec<usize>,
}

impl RevisionTree {
    /// An empty tree.
    #[must_use]
    pub fn new(doc_id: DocumentId) -> Self {
        Self {
            doc_id,
            ..Self::default()
        }
    }

    /// Document this tree belongs to.
    #[must_use]
    pub fn doc_id(&self) -> &DocumentId {
        &self.doc_id
    }

    /// Number of revisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no revisions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `rev` is present.
    #[must_use]
    pub fn contains(&self, rev: &RevisionId) -> bool {
        self.index.contains_key(rev)
    }

    /// Looks up a revision.
    #[must_use]
    pub fn get(&self, rev: &RevisionId) -> Option<&RevisionNode> {
        self.index.get(rev).map(|&i| &self.nodes[i])
    }

    /// All revisions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RevisionNode> {
        self.nodes.iter()
    }

    /// Whether [`RevisionTree::insert`] would add `node`: `false` if it is
    /// already present.
    ///
    /// # Errors
    ///
    /// See [`check_lineage`].
    pub fn admits(&self, node: &RevisionNode) -> CoreResult<bool> {
        check_lineage(&self.doc_id, node)?;
        Ok(!self.index.contains_key(&node.rev))
    }

    /// Inserts a node. Returns `false` if it was already present.
    ///
    /// # Errors
    ///
    /// See [`check_lineage`].
    pub fn insert(&mut self, node: RevisionNode) -> CoreResult<bool> {
        if !self.admits(&node)? {
            return Ok(false);
        }
        let parent_idx = node.parent.as_ref().and_then(|p| self.index.get(p).copied());
        if let Some(p) = parent_idx {
            self.child_count[p] += 1;
        }
        // children that arrived before this node
        let early_children = self
            .nodes
            .iter()
            .filter(|n| n.parent.as_ref() == Some(&node.rev))
            .count();
        self.index.insert(node.rev.clone(), self.nodes.len());
        self.nodes.push(node);
        self.child_count.push(early_children);
        Ok(true)
    }

    /// Leaf revisions (no children), sorted ascending by revision id.
    #[must_use]
    pub fn tips(&self) -> Vec<&RevisionNode> {
        let mut tips: Vec<&RevisionNode> = self
            .nodes
            .iter()
            .zip(&self.child_count)
            .filter(|(_, children)| **children == 0)
            .map(|(node, _)| node)
            .collect();
        tips.sort_by(|a, b| a.rev.cmp(&b.rev));
        tips
    }

    /// Tips that are not tombstones.
    #[must_use]
    pub fn live_tips(&self) -> Vec<&RevisionNode> {
        self.tips().into_iter().filter(|n| !n.deleted).collect()
    }

    /// The current winner.
    ///
    /// Live tips win over tombstones; among the candidates the greatest
    /// generation wins, ties broken by the greater digest. The result
    /// depends only on the set of tips, so every replica holding the same
    /// revisions picks the same winner.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogicalCorruption`] if the tree has no tips.
    pub fn winner(&self) -> CoreResult<&RevisionNode> {
        select_winner(&self.tips()).ok_or_else(|| {
            CoreError::corruption(self.doc_id.as_str(), "revision tree has no tips")
        })
    }

    /// Whether more than one live tip exists.
    #[must_use]
    pub fn is_conflicted(&self) -> bool {
        self.live_tips().len() > 1
    }

    /// Live tips other than the winner, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogicalCorruption`] if the tree has no tips.
    pub fn superseded(&self) -> CoreResult<Vec<&RevisionNode>> {
        let winner = &self.winner()?.rev;
        Ok(self
            .live_tips()
            .into_iter()
            .filter(|n| &n.rev != winner)
            .collect())
    }

    /// Whether the winner is a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogicalCorruption`] if the tree has no tips.
    pub fn is_deleted(&self) -> CoreResult<bool> {
        Ok(self.winner()?.deleted)
    }

    /// `rev` followed by its ancestors, newest first, at most `limit` ids.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RevisionNotFound`] if `rev` is absent.
    pub fn ancestry(&self, rev: &RevisionId, limit: usize) -> CoreResult<Vec<&RevisionNode>> {
        let mut out = Vec::new();
        let mut current = Some(self.get(rev).ok_or_else(|| CoreError::RevisionNotFound {
            doc_id: self.doc_id.to_string(),
            rev: rev.to_string(),
        })?);
        while let Some(node) = current {
            if out.len() >= limit {
                break;
            }
            out.push(node);
            current = node.parent.as_ref().and_then(|p| self.get(p));
        }
        Ok(out)
    }
}

/// Winner among a set of tips; see [`RevisionTree::winner`].
#[must_use]
pub fn select_winner<'a>(tips: &[&'a RevisionNode]) -> Option<&'a RevisionNode> {
    tips.iter()
        .copied()
        .max_by(|a, b| (!a.deleted, &a.rev).cmp(&(!b.deleted, &b.rev)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(text: &str) -> Value {
        Value::object([("text", Value::from(text))])
    }

    fn child(parent: &RevisionNode, text: &str) -> RevisionNode {
        RevisionNode::build(Some(&parent.rev), false, body(text), &BTreeMap::new()).unwrap()
    }

    fn tree_with_root() -> (RevisionTree, RevisionNode) {
        let mut tree = RevisionTree::new(DocumentId::new("d"));
        let root = RevisionNode::build(None, false, body("r1"), &BTreeMap::new()).unwrap();
        tree.insert(root.clone()).unwrap();
        (tree, root)
    }

    #[test]
    fn linear_history_has_single_tip() {
        let (mut tree, root) = tree_with_root();
        let r2 = child(&root, "r2");
        tree.insert(r2.clone()).unwrap();
        assert_eq!(tree.tips().len(), 1);
        assert_eq!(tree.winner().unwrap().rev, r2.rev);
        assert!(!tree.is_conflicted());
        assert_eq!(r2.rev.generation(), 2);
    }

    #[test]
    fn fork_is_conflicted_with_digest_tiebreak() {
        let (mut tree, root) = tree_with_root();
        let a = child(&root, "a");
        let b = child(&root, "b");
        tree.insert(a.clone()).unwrap();
        tree.insert(b.clone()).unwrap();

        assert!(tree.is_conflicted());
        let expected = if a.rev > b.rev { &a } else { &b };
        assert_eq!(&tree.winner().unwrap().rev, &expected.rev);
        assert_eq!(tree.superseded().unwrap().len(), 1);
    }

    #[test]
    fn deeper_branch_wins() {
        let (mut tree, root) = tree_with_root();
        let a = child(&root, "a");
        let b = child(&root, "b");
        let b2 = child(&b, "b2");
        for n in [a, b, b2.clone()] {
            tree.insert(n).unwrap();
        }
        assert_eq!(tree.winner().unwrap().rev, b2.rev);
    }

    #[test]
    fn live_tip_beats_deeper_tombstone() {
        let (mut tree, root) = tree_with_root();
        let a = child(&root, "a");
        let b = child(&root, "b");
        let tomb =
            RevisionNode::build(Some(&b.rev), true, Value::empty_object(), &BTreeMap::new()).unwrap();
        for n in [a.clone(), b, tomb] {
            tree.insert(n).unwrap();
        }
        assert_eq!(tree.winner().unwrap().rev, a.rev);
        assert!(!tree.is_conflicted());
        assert!(!tree.is_deleted().unwrap());
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let (_, root) = tree_with_root();
        let a = child(&root, "a");
        let b = child(&root, "b");

        let mut t1 = RevisionTree::new(DocumentId::new("d"));
        let mut t2 = RevisionTree::new(DocumentId::new("d"));
        for n in [root.clone(), a.clone(), b.clone()] {
            t1.insert(n).unwrap();
        }
        for n in [root, b, a] {
            t2.insert(n).unwrap();
        }
        assert_eq!(t1.winner().unwrap().rev, t2.winner().unwrap().rev);
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let (mut tree, root) = tree_with_root();
        assert!(!tree.insert(root).unwrap());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn bad_generation_rejected() {
        let (mut tree, root) = tree_with_root();
        let mut bogus = child(&root, "x");
        bogus.rev = RevisionId::new(5, bogus.rev.digest());
        assert!(matches!(
            tree.insert(bogus),
            Err(CoreError::InvalidRevision { .. })
        ));
        let mut rootless = child(&root, "y");
        rootless.parent = None;
        assert!(tree.insert(rootless).is_err());
    }

    #[test]
    fn empty_tree_is_corruption() {
        let tree = RevisionTree::new(DocumentId::new("d"));
        assert!(matches!(
            tree.winner(),
            Err(CoreError::LogicalCorruption { .. })
        ));
    }

    #[test]
    fn ancestry_walks_to_root() {
        let (mut tree, root) = tree_with_root();
        let r2 = child(&root, "r2");
        let r3 = child(&r2, "r3");
        tree.insert(r2).unwrap();
        tree.insert(r3.clone()).unwrap();
        let chain: Vec<u64> = tree
            .ancestry(&r3.rev, 10)
            .unwrap()
            .iter()
            .map(|n| n.rev.generation())
            .collect();
        assert_eq!(chain, vec![3, 2, 1]);
        assert_eq!(tree.ancestry(&r3.rev, 2).unwrap().len(), 2);
    }

    #[test]
    fn detached_node_is_kept() {
        let (_, root) = tree_with_root();
        let r2 = child(&root, "r2");
        let r3 = child(&r2, "r3");
        let mut tree = RevisionTree::new(DocumentId::new("d"));
        tree.insert(r3.clone()).unwrap();
        assert_eq!(tree.winner().unwrap().rev, r3.rev);
        assert!(r3.verify().unwrap());

        // the parent arriving later is not a tip
        tree.insert(r2).unwrap();
        assert_eq!(tree.tips().len(), 1);
        assert_eq!(tree.winner().unwrap().rev, r3.rev);
    }
}
