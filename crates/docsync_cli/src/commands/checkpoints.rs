//! Checkpoint listing.

use std::path::Path;

use docsync_storage::{CheckpointStore, FileCheckpointStore};
use serde::Serialize;

/// One replication checkpoint.
#[derive(Debug, Serialize)]
pub struct CheckpointEntry {
    /// Checkpoint id: `<datastore> <direction> <endpoint>`.
    pub id: String,
    /// Last sequence applied.
    pub sequence: u64,
}

/// Reads the checkpoints stored in `file`.
pub fn list(file: &Path) -> Result<Vec<CheckpointEntry>, Box<dyn std::error::Error>> {
    if !file.is_file() {
        return Err(format!("no checkpoint file at {}", file.display()).into());
    }
    let store = FileCheckpointStore::open(file)?;
    Ok(store
        .list()?
        .into_iter()
        .map(|(id, sequence)| CheckpointEntry { id, sequence })
        .collect())
}

/// Runs the checkpoints command.
pub fn run(file: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = list(file)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            if entries.is_empty() {
                println!("No checkpoints");
            }
            for e in &entries {
                println!("{:>10}  {}", e.sequence, e.id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_persisted_marks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("checkpoints.json");
        {
            let store = FileCheckpointStore::open(&file).unwrap();
            store.advance("left pull http://right.test", 7).unwrap();
        }

        let entries = list(&file).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 7);
        assert!(list(&dir.path().join("missing.json")).is_err());
    }
}
