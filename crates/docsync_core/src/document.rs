//! Document records, identifiers and revision identifiers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use docsync_codec::{to_canonical_cbor, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Unique, stable identifier of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier (UUID v4, hyphen-less).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Revision identifier: generation (depth from the root, starting at 1)
/// and a content digest.
///
/// The derived ordering compares generation first, then the digest text
/// lexicographically, which is exactly the winner ordering among tips.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionId {
    generation: u64,
    digest: String,
}

impl RevisionId {
    /// Builds a revision id from parts.
    pub fn new(generation: u64, digest: impl Into<String>) -> Self {
        Self {
            generation,
            digest: digest.into(),
        }
    }

    /// Computes the id of a revision from its content.
    ///
    /// The digest is SHA-256 over the canonical CBOR of the parent id,
    /// deleted flag, body and attachment metadata (content type, digest,
    /// length), so identical edits made on different replicas produce
    /// identical ids.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRevision`] if the parent is at the last
    /// representable generation, or a codec error if the body cannot be
    /// canonically encoded.
    pub fn compute(
        parent: Option<&RevisionId>,
        deleted: bool,
        body: &Value,
        attachments: &BTreeMap<String, Attachment>,
    ) -> CoreResult<Self> {
        let generation = match parent {
            None => 1,
            Some(p) => p.child_generation().ok_or_else(|| {
                CoreError::invalid_revision(p.to_string(), "parent is at the last generation")
            })?,
        };
        let metadata = attachments
            .iter()
            .map(|(name, a)| {
                (
                    name.clone(),
                    Value::object([
                        ("content_type", Value::from(a.content_type.as_str())),
                        ("digest", Value::from(a.digest.as_str())),
                        ("length", uint_value(a.length)),
                    ]),
                )
            })
            .collect::<BTreeMap<_, _>>();
        let content = Value::object([
            (
                "parent",
                parent.map_or(Value::Null, |p| Value::Text(p.to_string())),
            ),
            ("deleted", Value::Bool(deleted)),
            ("body", body.clone()),
            ("attachments", Value::Object(metadata)),
        ]);
        let bytes = to_canonical_cbor(&content)?;
        let hash = Sha256::digest(&bytes);
        Ok(Self::new(generation, hex::encode(&hash[..16])))
    }

    /// Generation of a child of this revision; `None` past `u64::MAX`.
    #[must_use]
    pub fn child_generation(&self) -> Option<u64> {
        self.generation.checked_add(1)
    }

    /// Depth from the root (root is 1).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Content digest, hex.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.digest)
    }
}

impl FromStr for RevisionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CoreError::invalid_document(format!("malformed revision id '{s}'"));
        let (generation, digest) = s.split_once('-').ok_or_else(bad)?;
        let generation: u64 = generation.parse().map_err(|_| bad())?;
        if generation == 0 || digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(bad());
        }
        Ok(Self::new(generation, digest))
    }
}

/// Unsigned counter as a value integer. Values past `i64::MAX` saturate.
#[must_use]
pub fn uint_value(n: u64) -> Value {
    Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

/// Digest used for attachment content: SHA-256, hex.
#[must_use]
pub fn attachment_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// An attachment: metadata plus, unless it is a stub, the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// MIME content type.
    pub content_type: String,
    /// SHA-256 of the bytes, hex.
    pub digest: String,
    /// Length of the bytes.
    pub length: u64,
    /// The bytes; `None` once extracted into the blob store.
    pub data: Option<Vec<u8>>,
}

impl Attachment {
    /// An attachment carrying its bytes.
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            digest: attachment_digest(&data),
            length: data.len() as u64,
            data: Some(data),
        }
    }

    /// Metadata-only copy.
    #[must_use]
    pub fn to_stub(&self) -> Self {
        Self {
            data: None,
            ..self.clone()
        }
    }

    /// Whether the bytes are absent.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.data.is_none()
    }
}

/// A document as seen by the application: one revision of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    /// Document identifier.
    pub id: DocumentId,
    /// Revision this record was read at; `None` for a record never saved.
    pub rev: Option<RevisionId>,
    /// Body: an object of JSON-compatible values.
    pub body: Value,
    /// Attachments by name.
    pub attachments: BTreeMap<String, Attachment>,
    /// Whether this revision is a deletion tombstone.
    pub deleted: bool,
}

impl DocumentRecord {
    /// A fresh, unsaved record.
    pub fn new(id: DocumentId, body: Value) -> Self {
        Self {
            id,
            rev: None,
            body,
            attachments: BTreeMap::new(),
            deleted: false,
        }
    }

    /// Adds an attachment.
    #[must_use]
    pub fn with_attachment(mut self, name: impl Into<String>, attachment: Attachment) -> Self {
        self.attachments.insert(name.into(), attachment);
        self
    }

    /// Entity name recorded in the body, if any.
    #[must_use]
    pub fn entity(&self) -> Option<&str> {
        self.body.get(crate::codec::ENTITY_KEY).and_then(Value::as_text)
    }
}
