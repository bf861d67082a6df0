//! # docsync Core
//!
//! Object-to-document mapping and the multi-version document store.
//!
//! This crate provides:
//! - Object model descriptor: validated entities, attributes and
//!   relationships loaded from a schema
//! - Document codec: object instances to JSON-compatible bodies plus
//!   attachments, and back
//! - Identity & reference resolver: stable identifiers and a reverse
//!   reference index driving delete rules
//! - Revision trees with deterministic winner selection and explicit
//!   conflict resolution
//! - A revision journal replayed on open, so saved documents survive a
//!   restart
//! - [`Datastore`]: the context object tying these together
//!
//! ## Key Invariants
//!
//! - A save names the revision it replaces; stale saves fail
//! - The winner is a pure function of the tips, identical on every replica
//! - Losing branches are never removed, only closed by tombstones
//! - A document with no tips is logical corruption and is never repaired
//! - Deleting an object never leaves a dangling reference behind

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
pub mod codec;
mod config;
mod datastore;
mod document;
mod error;
mod identity;
mod journal;
pub mod model;
mod object;
pub mod revision;
mod store;

pub use change_feed::{ChangeEvent, ChangeFeed, ChangeKind, ChangeOrigin};
pub use config::DatastoreConfig;
pub use datastore::{
    BlobData, ConflictReport, Datastore, DeleteReport, RevisionBundle, BLOB_DIR, JOURNAL_FILE,
};
pub use document::{attachment_digest, Attachment, DocumentId, DocumentRecord, RevisionId};
pub use error::{CoreError, CoreResult, SchemaError};
pub use identity::{IdentityResolver, ObjectId, Referrer};
pub use journal::{Journal, JournalRecord};
pub use model::{
    AttributeDescriptor, AttributeType, Cardinality, DeleteRule, EntityDescriptor, ObjectModel,
    RelationshipDescriptor, SchemaDefinition, TransformerRegistry, ValueTransformer,
};
pub use object::{AttrValue, Decimal, ObjectInstance, ObjectRef};
pub use revision::{
    ConflictPolicy, ConflictResolver, ConflictSet, Resolution, RevisionNode, RevisionTree,
};
pub use store::{Change, Committed, DocumentStore};
