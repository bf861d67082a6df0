//! Revision & conflict engine.
//!
//! Every document owns a [`RevisionTree`]. Saves append a child of the
//! current winner; replication may add revisions whose parent is not the
//! winner, producing several live tips: the document is conflicted. The
//! winner is a pure function of the tips. Losing branches are kept and
//! closed only by explicit [`Resolution`]s, which append tombstones.

mod conflict;
mod tree;

pub use conflict::{
    resolution_nodes, ConflictPolicy, ConflictResolver, ConflictSet, Resolution,
};
pub use tree::{check_lineage, select_winner, RevisionNode, RevisionTree};
