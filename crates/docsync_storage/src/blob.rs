//! Attachment blob store trait and in-memory implementation.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;

use crate::error::StorageResult;

/// Address of one attachment: the owning document and the attachment name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentKey {
    /// Document identifier.
    pub doc_id: String,
    /// Attachment name within the document.
    pub name: String,
}

impl AttachmentKey {
    /// Create a new key.
    pub fn new(doc_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AttachmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doc_id, self.name)
    }
}

/// A blob area for document attachments.
///
/// Blobs are addressed by [`AttachmentKey`]. Each key may hold several
/// versions distinguished by the content digest computed by the caller,
/// so attachments of superseded revisions stay readable after a newer
/// revision reuses the same name. Stores treat both bytes and digests as
/// opaque.
///
/// # Implementors
///
/// - [`InMemoryBlobStore`] - For testing and ephemeral datastores
/// - [`super::FileBlobStore`] - One file per blob version under a directory
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key` at version `digest`. Rewriting an existing
    /// version is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be written.
    fn put(&self, key: &AttachmentKey, digest: &str, data: &[u8]) -> StorageResult<()>;

    /// Read one blob version.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob exists but cannot be read.
    fn get(&self, key: &AttachmentKey, digest: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Whether a blob version is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be inspected.
    fn contains(&self, key: &AttachmentKey, digest: &str) -> StorageResult<bool>;

    /// List `(key, digest)` pairs stored for a document, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be inspected.
    fn list(&self, doc_id: &str) -> StorageResult<Vec<(AttachmentKey, String)>>;

    /// Remove every blob of a document, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a blob cannot be removed.
    fn purge(&self, doc_id: &str) -> StorageResult<usize>;
}

/// An in-memory blob store.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<(AttachmentKey, String), Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blob versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Total stored bytes.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.blobs.read().values().map(Vec::len).sum()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &AttachmentKey, digest: &str, data: &[u8]) -> StorageResult<()> {
        self.blobs
            .write()
            .entry((key.clone(), digest.to_string()))
            .or_insert_with(|| data.to_vec());
        Ok(())
    }

    fn get(&self, key: &AttachmentKey, digest: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .read()
            .get(&(key.clone(), digest.to_string()))
            .cloned())
    }

    fn contains(&self, key: &AttachmentKey, digest: &str) -> StorageResult<bool> {
        Ok(self
            .blobs
            .read()
            .contains_key(&(key.clone(), digest.to_string())))
    }

    fn list(&self, doc_id: &str) -> StorageResult<Vec<(AttachmentKey, String)>> {
        Ok(self
            .blobs
            .read()
            .keys()
            .filter(|(key, _)| key.doc_id == doc_id)
            .cloned()
            .collect())
    }

    fn purge(&self, doc_id: &str) -> StorageResult<usize> {
        let mut blobs = self.blobs.write();
        let before = blobs.len();
        blobs.retain(|(key, _), _| key.doc_id != doc_id);
        Ok(before - blobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_versions() {
        let store = InMemoryBlobStore::new();
        let key = AttachmentKey::new("doc1", "binary");

        store.put(&key, "d1", b"first").unwrap();
        store.put(&key, "d2", b"second").unwrap();

        assert_eq!(store.get(&key, "d1").unwrap(), Some(b"first".to_vec()));
        assert_eq!(store.get(&key, "d2").unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.get(&key, "d3").unwrap(), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn rewriting_a_version_keeps_first_bytes() {
        let store = InMemoryBlobStore::new();
        let key = AttachmentKey::new("doc1", "a");
        store.put(&key, "d", b"abc").unwrap();
        store.put(&key, "d", b"xyz").unwrap();
        assert_eq!(store.get(&key, "d").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(store.total_bytes(), 3);
    }

    #[test]
    fn list_and_purge_are_per_document() {
        let store = InMemoryBlobStore::new();
        store.put(&AttachmentKey::new("a", "x"), "1", b"1").unwrap();
        store.put(&AttachmentKey::new("a", "y"), "2", b"2").unwrap();
        store.put(&AttachmentKey::new("b", "x"), "3", b"3").unwrap();

        let listed = store.list("a").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0.name, "x");

        assert_eq!(store.purge("a").unwrap(), 2);
        assert!(store.list("a").unwrap().is_empty());
        assert!(store
            .contains(&AttachmentKey::new("b", "x"), "3")
            .unwrap());
    }

    #[test]
    fn key_display() {
        assert_eq!(AttachmentKey::new("d", "n").to_string(), "d/n");
    }
}
