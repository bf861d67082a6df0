//! Blob directory listing.

use std::path::Path;

use docsync_storage::{AttachmentKey, BlobStore, FileBlobStore};
use serde::Serialize;

/// One stored attachment version.
#[derive(Debug, Serialize)]
pub struct BlobEntry {
    /// Owning document.
    pub doc_id: String,
    /// Attachment name.
    pub name: String,
    /// Content digest.
    pub digest: String,
    /// Size in bytes.
    pub size: usize,
}

/// Lists every blob under `dir`.
pub fn list(dir: &Path) -> Result<Vec<BlobEntry>, Box<dyn std::error::Error>> {
    if !dir.is_dir() {
        return Err(format!("no blob directory at {}", dir.display()).into());
    }
    let store = FileBlobStore::open(dir)?;
    let mut entries = Vec::new();
    for doc_id in store.documents()? {
        for (key, digest) in store.list(&doc_id)? {
            let size = store.get(&key, &digest)?.map_or(0, |b| b.len());
            let AttachmentKey { doc_id, name } = key;
            entries.push(BlobEntry {
                doc_id,
                name,
                digest,
                size,
            });
        }
    }
    Ok(entries)
}

/// Runs the blobs command.
pub fn run(dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = list(dir)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            for e in &entries {
                println!("{}  {}  {}  {} bytes", e.doc_id, e.name, e.digest, e.size);
            }
            let total: usize = entries.iter().map(|e| e.size).sum();
            println!("{} blobs, {total} bytes", entries.len());
        }
    }
    Ok(())
}
