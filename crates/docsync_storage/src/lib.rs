//! # docsync Storage
//!
//! Byte-level persistence used by the docsync engine.
//!
//! Three stores live here, all opaque to document semantics:
//!
//! - [`BlobStore`]: the attachment area, keyed by
//!   `(document id, attachment name)` and versioned by content digest
//! - [`LogBackend`]: the append-only log holding the revision journal
//! - [`CheckpointStore`]: per-endpoint replication high-water marks
//!
//! ## Available Implementations
//!
//! - [`InMemoryBlobStore`], [`InMemoryLog`], [`InMemoryCheckpointStore`] -
//!   For testing and ephemeral datastores
//! - [`FileBlobStore`], [`FileLog`], [`FileCheckpointStore`] - Persistent,
//!   using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use docsync_storage::{AttachmentKey, BlobStore, InMemoryBlobStore};
//!
//! let store = InMemoryBlobStore::new();
//! let key = AttachmentKey::new("doc-1", "photo");
//! store.put(&key, "digest", b"bytes").unwrap();
//! assert_eq!(store.get(&key, "digest").unwrap(), Some(b"bytes".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod checkpoint;
mod error;
mod file;
mod log;

pub use blob::{AttachmentKey, BlobStore, InMemoryBlobStore};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use error::{StorageError, StorageResult};
pub use file::FileBlobStore;
pub use log::{FileLog, InMemoryLog, LogBackend};
