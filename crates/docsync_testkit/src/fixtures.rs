//! Test fixtures and datastore helpers.
//!
//! The fixture model has three entities:
//! - `Entry`: one attribute of every scalar type, `files` (cascade) and
//!   `subEntries` (nullify)
//! - `File`: `fileName`, to-one `entry`
//! - `SubEntry`: `text`, to-one `entry`

use std::sync::Arc;

use docsync_codec::Value;
use docsync_core::model::{AttributeDef, EntityDef, RelationshipDef, SchemaDefinition};
use docsync_core::{
    Datastore, DatastoreConfig, DeleteRule, DocumentId, DocumentRecord, ObjectInstance,
    ObjectModel, TransformerRegistry, BLOB_DIR,
};
use docsync_storage::{InMemoryBlobStore, InMemoryLog};
use tempfile::TempDir;

/// The five bytes stored in [`sample_entry`]'s `binary` attribute.
pub const SAMPLE_BINARY: [u8; 5] = [0x01, 0x02, 0x03, 0x04, 0x05];

/// Schema of the fixture model.
pub fn entry_schema() -> SchemaDefinition {
    SchemaDefinition::new()
        .entity(
            EntityDef::new("Entry")
                .attribute("text", "string")
                .attribute("bool", "boolean")
                .attribute("i16", "int16")
                .attribute("i32", "int32")
                .attribute("i64", "int64")
                .attribute("float", "float")
                .attribute("double", "double")
                .attribute("decimal", "decimal")
                .attribute("date", "date")
                .with_attribute(
                    AttributeDef::new("binary", "binary").content_type("application/octet-stream"),
                )
                .with_relationship(
                    RelationshipDef::new("files", "File", true)
                        .inverse("entry")
                        .delete_rule(DeleteRule::Cascade),
                )
                .with_relationship(
                    RelationshipDef::new("subEntries", "SubEntry", true)
                        .inverse("entry")
                        .delete_rule(DeleteRule::Nullify),
                ),
        )
        .entity(
            EntityDef::new("File")
                .attribute("fileName", "string")
                .with_relationship(RelationshipDef::new("entry", "Entry", false).inverse("files")),
        )
        .entity(
            EntityDef::new("SubEntry")
                .attribute("text", "string")
                .with_relationship(
                    RelationshipDef::new("entry", "Entry", false).inverse("subEntries"),
                ),
        )
}

/// The fixture schema as a JSON document.
pub fn entry_schema_json() -> String {
    serde_json::to_string_pretty(&entry_schema()).expect("schema serializes")
}

/// The loaded fixture model.
pub fn entry_model() -> ObjectModel {
    ObjectModel::load(&entry_schema()).expect("fixture model loads")
}

/// A datastore over the fixture model with automatic cleanup.
pub struct TestDatastore {
    /// The datastore, shareable with sessions and servers.
    pub datastore: Arc<Datastore>,
    _temp_dir: Option<TempDir>,
}

impl TestDatastore {
    /// A datastore named `name` with in-memory blobs.
    pub fn memory(name: &str) -> Self {
        let datastore = Datastore::open_with_backends(
            DatastoreConfig::new().name(name),
            entry_model(),
            TransformerRegistry::new(),
            Arc::new(InMemoryBlobStore::new()),
            Box::new(InMemoryLog::new()),
        )
        .expect("failed to open in-memory datastore");
        Self {
            datastore: Arc::new(datastore),
            _temp_dir: None,
        }
    }

    /// A datastore named `name` stored in a temp directory.
    pub fn file(name: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let datastore = Datastore::open(temp_dir.path(), DatastoreConfig::new().name(name), entry_model())
            .expect("failed to open file datastore");
        Self {
            datastore: Arc::new(datastore),
            _temp_dir: Some(temp_dir),
        }
    }

    /// The blob directory if file-backed.
    pub fn blob_dir(&self) -> Option<std::path::PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join(BLOB_DIR))
    }

    /// A clone of the shared handle.
    pub fn shared(&self) -> Arc<Datastore> {
        Arc::clone(&self.datastore)
    }
}

impl std::ops::Deref for TestDatastore {
    type Target = Datastore;

    fn deref(&self) -> &Self::Target {
        &self.datastore
    }
}

/// Runs `f` with a fresh in-memory fixture datastore.
pub fn with_temp_datastore<F, R>(f: F) -> R
where
    F: FnOnce(&Datastore) -> R,
{
    let test = TestDatastore::memory("test");
    f(&test)
}

/// `Entry {text, i32: 42, binary: SAMPLE_BINARY}` without identifier.
pub fn sample_entry(text: &str) -> ObjectInstance {
    ObjectInstance::new("Entry")
        .set("text", text)
        .set("i32", 42i32)
        .set("binary", SAMPLE_BINARY.to_vec())
}

/// A raw `Entry` record with only `text` set.
pub fn entry_record(id: &str, text: &str) -> DocumentRecord {
    DocumentRecord::new(
        DocumentId::new(id),
        Value::object([("$entity", Value::from("Entry")), ("text", Value::from(text))]),
    )
}
