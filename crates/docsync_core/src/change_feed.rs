//! Change notifications for committed document writes.
//!
//! Every write that adds revisions to a document (local save, delete,
//! conflict resolution, replicated import) emits one [`ChangeEvent`]
//! after the document lock is released.
//!
//! ```rust,ignore
//! let events = datastore.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{} -> {}", event.doc_id, event.rev);
//!     }
//! });
//! ```

use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::RwLock;

use crate::document::{DocumentId, RevisionId};
use crate::store::Committed;

/// What a write did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// First revision of the document.
    Created,
    /// New winning revision.
    Updated,
    /// Winner is now a tombstone.
    Deleted,
}

/// Where a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Application write on this datastore.
    Local,
    /// Revisions received from a peer.
    Replicated,
}

/// A committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Local sequence number.
    pub sequence: u64,
    /// Document identifier.
    pub doc_id: DocumentId,
    /// Winning revision after the write.
    pub rev: RevisionId,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Origin of the change.
    pub origin: ChangeOrigin,
    /// Whether the document is left conflicted.
    pub conflicted: bool,
}

impl ChangeEvent {
    /// Event describing a committed write.
    #[must_use]
    pub fn from_commit(committed: &Committed, origin: ChangeOrigin) -> Self {
        let kind = if committed.deleted {
            ChangeKind::Deleted
        } else if committed.created {
            ChangeKind::Created
        } else {
            ChangeKind::Updated
        };
        Self {
            sequence: committed.sequence,
            doc_id: committed.doc_id.clone(),
            rev: committed.rev.clone(),
            kind,
            origin,
            conflicted: committed.conflicted,
        }
    }
}

/// Fan-out of change events to subscribers, with a bounded history for
/// polling.
#[derive(Debug)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
    history: RwLock<Vec<ChangeEvent>>,
    max_history: usize,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_max_history(10_000)
    }
}

impl ChangeFeed {
    /// Creates a feed with the default history size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a feed keeping at most `max_history` events.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Receiver of every future event.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes an event; disconnected subscribers are dropped.
    pub fn emit(&self, event: ChangeEvent) {
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(..excess);
            }
        }
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Retained events with a sequence above `cursor`, at most `limit`.
    #[must_use]
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(sequence: u64) -> ChangeEvent {
        ChangeEvent {
            sequence,
            doc_id: DocumentId::new("d"),
            rev: RevisionId::new(sequence, "ab"),
            kind: ChangeKind::Updated,
            origin: ChangeOrigin::Local,
            conflicted: false,
        }
    }

    #[test]
    fn subscribers_receive_in_order() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        feed.emit(event(1));
        feed.emit(event(2));
        assert_eq!(rx.recv().unwrap().sequence, 1);
        assert_eq!(rx.recv().unwrap().sequence, 2);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = ChangeFeed::new();
        drop(feed.subscribe());
        let _kept = feed.subscribe();
        feed.emit(event(1));
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let feed = ChangeFeed::with_max_history(2);
        for s in 1..=5 {
            feed.emit(event(s));
        }
        let seqs: Vec<u64> = feed.poll(0, 10).iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert_eq!(feed.poll(4, 10).len(), 1);
    }

    #[test]
    fn kind_follows_commit() {
        let mut committed = Committed {
            doc_id: DocumentId::new("d"),
            rev: RevisionId::new(1, "ab"),
            sequence: 1,
            inserted: 1,
            created: true,
            deleted: false,
            conflicted: false,
        };
        assert_eq!(
            ChangeEvent::from_commit(&committed, ChangeOrigin::Local).kind,
            ChangeKind::Created
        );
        committed.created = false;
        committed.deleted = true;
        let ev = ChangeEvent::from_commit(&committed, ChangeOrigin::Replicated);
        assert_eq!(ev.kind, ChangeKind::Deleted);
        assert_eq!(ev.origin, ChangeOrigin::Replicated);
    }
}
