//! Directory-backed blob store.
//!
//! Layout:
//!
//! ```text
//! <root>/
//! ├─ LOCK                          # advisory lock, one process per store
//! └─ <hex doc id>/
//!    └─ <hex name>/
//!       └─ <hex digest>            # blob bytes
//! ```
//!
//! Path segments are hex encoded so arbitrary identifiers map to portable
//! file names.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::blob::{AttachmentKey, BlobStore};
use crate::error::{StorageError, StorageResult};

const LOCK_FILE: &str = "LOCK";
const TEMP_SUFFIX: &str = ".tmp";

/// A blob store keeping one file per blob version.
///
/// Writes go to a temporary file that is synced and renamed into place, so
/// a crash never leaves a partially written blob under its final name.
#[derive(Debug)]
pub struct FileBlobStore {
    root: PathBuf,
    _lock_file: File,
}

impl FileBlobStore {
    /// Opens (creating if needed) a blob store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidPath`] if `root` exists but is not a
    /// directory, [`StorageError::Locked`] if another process holds the
    /// store.
    pub fn open(root: &Path) -> StorageResult<Self> {
        if root.exists() && !root.is_dir() {
            return Err(StorageError::InvalidPath(root.to_path_buf()));
        }
        fs::create_dir_all(root)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(root.to_path_buf()));
        }

        Ok(Self {
            root: root.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Document ids that have at least one stored blob, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] for a directory name that is not
    /// a hex-encoded identifier.
    pub fn documents(&self) -> StorageResult<Vec<String>> {
        let mut ids = Vec::new();
        for path in sorted_entries(&self.root)? {
            if path.is_dir() {
                ids.push(decode_segment(&path)?);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn doc_dir(&self, doc_id: &str) -> PathBuf {
        self.root.join(hex::encode(doc_id))
    }

    fn blob_path(&self, key: &AttachmentKey, digest: &str) -> PathBuf {
        self.doc_dir(&key.doc_id)
            .join(hex::encode(&key.name))
            .join(hex::encode(digest))
    }
}

fn decode_segment(path: &Path) -> StorageResult<String> {
    let raw = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::corrupted(format!("bad entry {}", path.display())))?;
    let bytes = hex::decode(raw)
        .map_err(|e| StorageError::corrupted(format!("bad entry {}: {e}", path.display())))?;
    String::from_utf8(bytes)
        .map_err(|e| StorageError::corrupted(format!("bad entry {}: {e}", path.display())))
}

fn sorted_entries(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TEMP_SUFFIX));
        if !is_temp {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

impl BlobStore for FileBlobStore {
    fn put(&self, key: &AttachmentKey, digest: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.blob_path(key, digest);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp_name);
        {
            let mut file = File::create(&temp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;
        Ok(())
    }

    fn get(&self, key: &AttachmentKey, digest: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.blob_path(key, digest)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, key: &AttachmentKey, digest: &str) -> StorageResult<bool> {
        Ok(self.blob_path(key, digest).is_file())
    }

    fn list(&self, doc_id: &str) -> StorageResult<Vec<(AttachmentKey, String)>> {
        let doc_dir = self.doc_dir(doc_id);
        if !doc_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for name_dir in sorted_entries(&doc_dir)? {
            let name = decode_segment(&name_dir)?;
            for blob in sorted_entries(&name_dir)? {
                out.push((AttachmentKey::new(doc_id, name.clone()), decode_segment(&blob)?));
            }
        }
        out.sort();
        Ok(out)
    }

    fn purge(&self, doc_id: &str) -> StorageResult<usize> {
        let removed = self.list(doc_id)?.len();
        let doc_dir = self.doc_dir(doc_id);
        if doc_dir.is_dir() {
            fs::remove_dir_all(doc_dir)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_and_get_survive_reopen() {
        let dir = tempdir().unwrap();
        let key = AttachmentKey::new("doc-1", "binary");
        {
            let store = FileBlobStore::open(dir.path()).unwrap();
            store.put(&key, "abcd", b"hello").unwrap();
        }
        let store = FileBlobStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&key, "abcd").unwrap(), Some(b"hello".to_vec()));
        assert!(store.contains(&key, "abcd").unwrap());
        assert_eq!(store.get(&key, "other").unwrap(), None);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = FileBlobStore::open(dir.path()).unwrap();
        assert!(matches!(
            FileBlobStore::open(dir.path()),
            Err(StorageError::Locked(_))
        ));
    }

    #[test]
    fn file_root_is_invalid() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            FileBlobStore::open(&file),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn odd_names_round_trip_through_listing() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        let key = AttachmentKey::new("a/b", "../name with spaces");
        store.put(&key, "00ff", b"x").unwrap();

        let listed = store.list("a/b").unwrap();
        assert_eq!(listed, vec![(key, "00ff".to_string())]);
        assert_eq!(store.purge("a/b").unwrap(), 1);
        assert!(store.list("a/b").unwrap().is_empty());
    }

    #[test]
    fn documents_lists_decoded_ids() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        assert!(store.documents().unwrap().is_empty());

        store.put(&AttachmentKey::new("doc-b", "x"), "01", b"1").unwrap();
        store.put(&AttachmentKey::new("doc-a", "y"), "02", b"2").unwrap();
        assert_eq!(store.documents().unwrap(), vec!["doc-a", "doc-b"]);
    }
}
