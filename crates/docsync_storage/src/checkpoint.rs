//! Replication checkpoints: one high-water mark per remote endpoint.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Persisted high-water marks keyed by checkpoint id.
///
/// Callers derive the id from the remote endpoint and direction. A mark
/// only ever moves forward; storing a lower value is ignored.
pub trait CheckpointStore: Send + Sync {
    /// Current mark for `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load(&self, id: &str) -> StorageResult<Option<u64>>;

    /// Advance the mark for `id` to `sequence`. Returns the mark in effect
    /// afterwards. The new mark is durable when this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the mark cannot be persisted.
    fn advance(&self, id: &str, sequence: u64) -> StorageResult<u64>;

    /// All marks, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list(&self) -> StorageResult<Vec<(String, u64)>>;
}

fn advance_in(map: &mut BTreeMap<String, u64>, id: &str, sequence: u64) -> (u64, bool) {
    let entry = map.entry(id.to_string()).or_insert(0);
    if sequence > *entry {
        *entry = sequence;
        (sequence, true)
    } else {
        (*entry, false)
    }
}

/// Checkpoints held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    marks: RwLock<BTreeMap<String, u64>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, id: &str) -> StorageResult<Option<u64>> {
        Ok(self.marks.read().get(id).copied())
    }

    fn advance(&self, id: &str, sequence: u64) -> StorageResult<u64> {
        Ok(advance_in(&mut self.marks.write(), id, sequence).0)
    }

    fn list(&self) -> StorageResult<Vec<(String, u64)>> {
        Ok(self
            .marks
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    marks: BTreeMap<String, u64>,
}

const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Checkpoints persisted as a JSON file, rewritten atomically on advance.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    marks: RwLock<BTreeMap<String, u64>>,
}

impl FileCheckpointStore {
    /// Opens the checkpoint file at `path`, starting empty if it does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if the file cannot be parsed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let marks = match fs::read(path) {
            Ok(bytes) => {
                let file: CheckpointFile = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::corrupted(format!("checkpoint file: {e}")))?;
                if file.version != CHECKPOINT_FORMAT_VERSION {
                    return Err(StorageError::corrupted(format!(
                        "unsupported checkpoint format version {}",
                        file.version
                    )));
                }
                file.marks
            }
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            marks: RwLock::new(marks),
        })
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, marks: &BTreeMap<String, u64>) -> StorageResult<()> {
        let file = CheckpointFile {
            version: CHECKPOINT_FORMAT_VERSION,
            marks: marks.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|e| StorageError::corrupted(format!("checkpoint encode: {e}")))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp = self.path.with_extension("tmp");
        {
            let mut out = File::create(&temp)?;
            out.write_all(&bytes)?;
            out.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, id: &str) -> StorageResult<Option<u64>> {
        Ok(self.marks.read().get(id).copied())
    }

    fn advance(&self, id: &str, sequence: u64) -> StorageResult<u64> {
        let mut marks = self.marks.write();
        let mut next = marks.clone();
        let (mark, changed) = advance_in(&mut next, id, sequence);
        if changed {
            self.persist(&next)?;
            *marks = next;
        }
        Ok(mark)
    }

    fn list(&self) -> StorageResult<Vec<(String, u64)>> {
        Ok(self
            .marks
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }
}
