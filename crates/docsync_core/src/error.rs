//! Error types for docsync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while loading an object model. Always fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The schema document could not be parsed.
    #[error("schema parse error: {0}")]
    Parse(String),

    /// An entity, attribute or relationship has an empty name.
    #[error("empty name in entity '{entity}'")]
    EmptyName {
        /// Entity being loaded.
        entity: String,
    },

    /// Two entities share a name.
    #[error("duplicate entity '{0}'")]
    DuplicateEntity(String),

    /// Two properties of one entity share a name.
    #[error("duplicate property '{name}' on entity '{entity}'")]
    DuplicateProperty {
        /// Entity name.
        entity: String,
        /// Property name.
        name: String,
    },

    /// A property name collides with the reserved `$` namespace.
    #[error("property '{name}' on entity '{entity}' uses the reserved '$' prefix")]
    ReservedName {
        /// Entity name.
        entity: String,
        /// Property name.
        name: String,
    },

    /// An attribute declares a type that has no document mapping.
    #[error("attribute '{entity}.{attribute}' has unsupported type '{type_name}'")]
    UnsupportedType {
        /// Entity name.
        entity: String,
        /// Attribute name.
        attribute: String,
        /// The declared type.
        type_name: String,
    },

    /// A transformable attribute names no transformer.
    #[error("transformable attribute '{entity}.{attribute}' names no transformer")]
    MissingTransformer {
        /// Entity name.
        entity: String,
        /// Attribute name.
        attribute: String,
    },

    /// A non-transformable attribute names a transformer.
    #[error("attribute '{entity}.{attribute}' is not transformable but names a transformer")]
    UnexpectedTransformer {
        /// Entity name.
        entity: String,
        /// Attribute name.
        attribute: String,
    },

    /// A transformer named by the model is not registered.
    #[error("transformer '{0}' is not registered")]
    UnknownTransformer(String),

    /// A relationship points at an entity that does not exist.
    #[error("relationship '{entity}.{relationship}' targets unknown entity '{target}'")]
    UnknownTarget {
        /// Entity name.
        entity: String,
        /// Relationship name.
        relationship: String,
        /// Missing target.
        target: String,
    },

    /// A declared inverse does not exist on the target entity.
    #[error("relationship '{entity}.{relationship}' declares missing inverse '{target}.{inverse}'")]
    UnknownInverse {
        /// Entity name.
        entity: String,
        /// Relationship name.
        relationship: String,
        /// Target entity.
        target: String,
        /// Declared inverse name.
        inverse: String,
    },

    /// A declared inverse does not point back.
    #[error("inverse of '{entity}.{relationship}' is '{target}.{inverse}', which does not point back")]
    AsymmetricInverse {
        /// Entity name.
        entity: String,
        /// Relationship name.
        relationship: String,
        /// Target entity.
        target: String,
        /// Declared inverse name.
        inverse: String,
    },
}

/// Errors that can occur in docsync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Object model failed to load.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] docsync_codec::CodecError),

    /// Blob store error.
    #[error("storage error: {0}")]
    Storage(#[from] docsync_storage::StorageError),

    /// NaN or infinity in a numeric attribute.
    #[error("attribute '{attribute}' holds non-finite value {value}")]
    NumericDomain {
        /// Attribute name.
        attribute: String,
        /// Rendering of the offending value.
        value: String,
    },

    /// A value does not match the type the model declares.
    #[error("type mismatch at {context}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Where the mismatch was found.
        context: String,
        /// Expected type.
        expected: String,
        /// Actual type.
        found: String,
    },

    /// The entity is not part of the model.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// A property is not declared on the entity.
    #[error("unknown property '{name}' on entity '{entity}'")]
    UnknownProperty {
        /// Entity name.
        entity: String,
        /// Property name.
        name: String,
    },

    /// A non-optional attribute has no value.
    #[error("required attribute '{entity}.{attribute}' has no value")]
    MissingValue {
        /// Entity name.
        entity: String,
        /// Attribute name.
        attribute: String,
    },

    /// An instance has no document identifier.
    #[error("instance of '{entity}' has no identifier")]
    MissingIdentifier {
        /// Entity name.
        entity: String,
    },

    /// Deleting would leave references the model forbids.
    #[error("cannot delete {doc_id}: relationship '{relationship}' still has {count} related object(s)")]
    ReferentialIntegrity {
        /// Document being deleted.
        doc_id: String,
        /// Relationship with a deny rule.
        relationship: String,
        /// Number of blocking objects.
        count: usize,
    },

    /// Optimistic concurrency check failed.
    #[error("revision mismatch on {doc_id}: expected {}, current {}",
        .expected.as_deref().unwrap_or("<none>"),
        .actual.as_deref().unwrap_or("<none>"))]
    RevisionMismatch {
        /// Document identifier.
        doc_id: String,
        /// Revision the caller expected.
        expected: Option<String>,
        /// Revision actually current.
        actual: Option<String>,
    },

    /// Document not found or deleted.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Revision not present in the document's tree.
    #[error("revision {rev} not found in {doc_id}")]
    RevisionNotFound {
        /// Document identifier.
        doc_id: String,
        /// Missing revision.
        rev: String,
    },

    /// A revision failed validation (digest or generation).
    #[error("invalid revision for {doc_id}: {message}")]
    InvalidRevision {
        /// Document identifier.
        doc_id: String,
        /// What failed.
        message: String,
    },

    /// An attachment's bytes are not available.
    #[error("attachment '{name}' of {doc_id} is missing")]
    MissingAttachment {
        /// Document identifier.
        doc_id: String,
        /// Attachment name.
        name: String,
    },

    /// Stored state violates a structural invariant. Never auto-repaired.
    #[error("logical corruption in {doc_id}: {message}")]
    LogicalCorruption {
        /// Document identifier.
        doc_id: String,
        /// Description.
        message: String,
    },

    /// Malformed document record.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Operation not permitted in current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The datastore has been closed.
    #[error("datastore '{0}' is closed")]
    Closed(String),

    /// Operation is not supported.
    #[error("not supported: {0}")]
    Unsupported(String),
}

impl CoreError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            context: context.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a logical corruption error.
    pub fn corruption(doc_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LogicalCorruption {
            doc_id: doc_id.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid revision error.
    pub fn invalid_revision(doc_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRevision {
            doc_id: doc_id.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument(message.into())
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Whether the caller can recover (retry, fix input) rather than abort.
    ///
    /// Schema errors and logical corruption are fatal.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Schema(_) | Self::LogicalCorruption { .. })
    }

    /// Whether retrying with a fresh revision may succeed.
    #[must_use]
    pub fn is_revision_mismatch(&self) -> bool {
        matches!(self, Self::RevisionMismatch { .. })
    }
}
