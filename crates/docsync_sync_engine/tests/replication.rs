//! End-to-end replication between two datastores, each served by a
//! `PeerServer` behind the loopback HTTP transport.

use std::sync::Arc;

use docsync_core::{
    AttrValue, ConflictPolicy, ConflictSet, CoreError, CoreResult, Datastore, DocumentId,
    Resolution,
};
use docsync_storage::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use docsync_sync_engine::{
    checkpoint_id, HttpTransport, LoopbackClient, LoopbackServer, ReplicationConfig, RetryConfig,
    SessionManager, SessionState, SessionStatus, StaticConnector,
};
use docsync_sync_protocol::Direction;
use docsync_sync_server::{PeerServer, ServerConfig};
use docsync_testkit::{assert_converged, entry_record, sample_entry, TestDatastore, SAMPLE_BINARY};

const LEFT_URL: &str = "http://left.test";
const RIGHT_URL: &str = "http://right.test";

struct Served(Arc<PeerServer>);

impl LoopbackServer for Served {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

fn connector(endpoint: &str, peer: &Arc<Datastore>) -> StaticConnector {
    let server = Arc::new(PeerServer::new(Arc::clone(peer), ServerConfig::default()));
    let transport = HttpTransport::new(endpoint, LoopbackClient::new(Served(server)));
    StaticConnector::new().with_peer(endpoint, Arc::new(transport))
}

struct Replica {
    store: TestDatastore,
    manager: SessionManager,
    checkpoints: Arc<InMemoryCheckpointStore>,
}

impl Replica {
    fn new(store: TestDatastore, peer_url: &str, peer: &Arc<Datastore>) -> Self {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let manager = SessionManager::new(
            store.shared(),
            Arc::new(connector(peer_url, peer)),
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
        )
        .unwrap();
        manager.set_config(
            ReplicationConfig::new()
                .with_pull_batch_size(2)
                .with_push_batch_size(2)
                .with_retry(RetryConfig::no_retry()),
        );
        Self {
            store,
            manager,
            checkpoints,
        }
    }

    async fn run(&self, direction: Direction, endpoint: &str) -> SessionStatus {
        let handle = self.manager.start(direction, endpoint).unwrap();
        let status = self.manager.wait(handle).await.unwrap();
        assert_eq!(status.state, SessionState::Completed, "{:?}", status.error);
        status
    }
}

/// `left` replicates with `right` and vice versa.
fn replicas() -> (Replica, Replica) {
    let left = TestDatastore::memory("left");
    let right = TestDatastore::memory("right");
    let (l, r) = (left.shared(), right.shared());
    (Replica::new(left, RIGHT_URL, &r), Replica::new(right, LEFT_URL, &l))
}

#[tokio::test(flavor = "multi_thread")]
async fn pulled_object_keeps_attributes_and_attachment() {
    let (left, right) = replicas();
    let mut entry = sample_entry("replicated");
    let id = left.store.assign_identifier(&mut entry);
    left.store.save_object(&mut entry, None).unwrap();

    let status = right.run(Direction::Pull, LEFT_URL).await;
    assert_eq!(status.counts.documents_transferred, 1);

    let copy = right.store.resolve(&id).unwrap();
    assert_eq!(copy, entry);
    assert_eq!(
        copy.get("binary"),
        Some(&AttrValue::Binary(SAMPLE_BINARY.to_vec()))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_checkpoint_advances_across_batches() {
    let (left, right) = replicas();
    for i in 0..5 {
        left.store.save(entry_record(&format!("doc{i}"), "x"), None).unwrap();
    }

    let status = right.run(Direction::Pull, LEFT_URL).await;
    assert_eq!(status.counts.documents_transferred, 5);
    assert_eq!(status.counts.batches, 3);

    let id = checkpoint_id("right", Direction::Pull, LEFT_URL);
    assert_eq!(right.checkpoints.load(&id).unwrap(), Some(left.store.last_sequence()));

    // Nothing new: the next pull examines no changes.
    let again = right.run(Direction::Pull, LEFT_URL).await;
    assert_eq!(again.counts.changes_examined, 0);
    assert_eq!(again.counts.documents_transferred, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn push_sends_only_missing_documents() {
    let (left, right) = replicas();
    left.store.save(entry_record("a", "x"), None).unwrap();
    left.run(Direction::Push, RIGHT_URL).await;
    assert!(right.store.get(&DocumentId::new("a")).is_ok());

    left.store.save(entry_record("b", "y"), None).unwrap();
    let status = left.run(Direction::Push, RIGHT_URL).await;
    assert_eq!(status.counts.changes_examined, 1);
    assert_eq!(status.counts.documents_transferred, 1);
    assert_converged(&left.store, &right.store);
}

#[tokio::test(flavor = "multi_thread")]
async fn forked_edits_converge_after_resolution() {
    let (left, right) = replicas();
    let base = left.store.save(entry_record("doc", "base"), None).unwrap();
    left.run(Direction::Push, RIGHT_URL).await;

    left.store.save(entry_record("doc", "left edit"), Some(&base)).unwrap();
    right.store.save(entry_record("doc", "right edit"), Some(&base)).unwrap();

    left.manager.set_resolver(Arc::new(ConflictPolicy::DeterministicWinner));
    let pulled = left.run(Direction::Pull, RIGHT_URL).await;
    assert_eq!(pulled.counts.conflicts_examined, 1);
    assert_eq!(pulled.counts.conflicts_resolved, 1);

    let id = DocumentId::new("doc");
    assert!(!left.store.revision_tree(&id).unwrap().is_conflicted());

    left.run(Direction::Push, RIGHT_URL).await;
    assert!(!right.store.revision_tree(&id).unwrap().is_conflicted());
    assert_converged(&left.store, &right.store);
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_policy_leaves_conflict_for_application() {
    let (left, right) = replicas();
    let base = left.store.save(entry_record("doc", "base"), None).unwrap();
    right.run(Direction::Pull, LEFT_URL).await;

    left.store.save(entry_record("doc", "left edit"), Some(&base)).unwrap();
    right.store.save(entry_record("doc", "right edit"), Some(&base)).unwrap();

    let status = right.run(Direction::Pull, LEFT_URL).await;
    assert_eq!(status.counts.conflicts_examined, 1);
    assert_eq!(status.counts.conflicts_resolved, 0);
    assert_eq!(right.store.list_conflicts().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn later_session_resolves_conflict_left_by_earlier_one() {
    let (left, right) = replicas();
    let base = left.store.save(entry_record("doc", "base"), None).unwrap();
    right.run(Direction::Pull, LEFT_URL).await;

    left.store.save(entry_record("doc", "left edit"), Some(&base)).unwrap();
    right.store.save(entry_record("doc", "right edit"), Some(&base)).unwrap();
    right.run(Direction::Pull, LEFT_URL).await;
    assert_eq!(right.store.list_conflicts().unwrap().len(), 1);

    // Nothing new to pull, yet the open conflict reaches the resolver.
    right.manager.set_resolver(Arc::new(ConflictPolicy::DeterministicWinner));
    let status = right.run(Direction::Pull, LEFT_URL).await;
    assert_eq!(status.counts.documents_transferred, 0);
    assert_eq!(status.counts.conflicts_examined, 1);
    assert_eq!(status.counts.conflicts_resolved, 1);
    assert!(right.store.list_conflicts().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_resolver_errors_the_session() {
    let (left, right) = replicas();
    let base = left.store.save(entry_record("doc", "base"), None).unwrap();
    right.run(Direction::Pull, LEFT_URL).await;

    left.store.save(entry_record("doc", "left edit"), Some(&base)).unwrap();
    right.store.save(entry_record("doc", "right edit"), Some(&base)).unwrap();

    let resolver = |_: &ConflictSet| -> CoreResult<Option<Resolution>> {
        Err(CoreError::invalid_operation("resolver unavailable"))
    };
    right.manager.set_resolver(Arc::new(resolver));

    let handle = right.manager.start(Direction::Pull, LEFT_URL).unwrap();
    let status = right.manager.wait(handle).await.unwrap();
    assert_eq!(status.state, SessionState::Errored);
    assert!(status.counts.documents_transferred > 0);
    let error = status.error.unwrap();
    assert!(error.contains("conflict resolution failed"), "{error}");
    assert!(error.contains("resolver unavailable"), "{error}");

    // The pulled revision stays; the conflict is still open.
    assert_eq!(right.store.list_conflicts().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_and_push_may_run_together() {
    let (left, right) = replicas();
    left.store.save(entry_record("l", "x"), None).unwrap();
    right.store.save(entry_record("r", "y"), None).unwrap();

    let pull = left.manager.pull_from(RIGHT_URL).unwrap();
    let push = left.manager.push_to(RIGHT_URL).unwrap();
    let pull = left.manager.wait(pull).await.unwrap();
    let push = left.manager.wait(push).await.unwrap();
    assert_eq!(pull.state, SessionState::Completed);
    assert_eq!(push.state, SessionState::Completed);

    assert!(left.store.get(&DocumentId::new("r")).is_ok());
    assert!(right.store.get(&DocumentId::new("l")).is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn file_checkpoint_resumes_in_a_new_manager() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.json");
    let left = TestDatastore::memory("left");
    let right = TestDatastore::memory("right");
    left.save(entry_record("a", "x"), None).unwrap();

    let session = |checkpoints: Arc<dyn CheckpointStore>| {
        SessionManager::new(right.shared(), Arc::new(connector(LEFT_URL, &left.shared())), checkpoints)
            .unwrap()
    };

    let first = session(Arc::new(FileCheckpointStore::open(&path).unwrap()));
    let handle = first.pull_from(LEFT_URL).unwrap();
    assert_eq!(first.wait(handle).await.unwrap().counts.documents_transferred, 1);
    drop(first);

    left.save(entry_record("b", "y"), None).unwrap();
    let second = session(Arc::new(FileCheckpointStore::open(&path).unwrap()));
    let status = second.wait(second.pull_from(LEFT_URL).unwrap()).await.unwrap();
    assert_eq!(status.state, SessionState::Completed);
    assert_eq!(status.counts.changes_examined, 1);
    assert_eq!(status.counts.checkpoint, left.last_sequence());
}
