//! Identity & reference resolver.
//!
//! Keeps three tables: the entity of every registered document, the
//! outgoing edges of each document, and a reverse index from a target to
//! the `(source, relationship)` pairs that reference it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;

use crate::document::DocumentId;
use crate::error::{CoreError, CoreResult};
use crate::object::ObjectInstance;

const OBJECT_ID_SCHEME: &str = "docsync://";

/// External, stable identifier of an object: entity plus document id.
///
/// Renders as `docsync://<entity>/<document id>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    entity: String,
    doc_id: DocumentId,
}

impl ObjectId {
    /// Builds an object id.
    pub fn new(entity: impl Into<String>, doc_id: DocumentId) -> Self {
        Self {
            entity: entity.into(),
            doc_id,
        }
    }

    /// Entity name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Document identifier.
    #[must_use]
    pub fn doc_id(&self) -> &DocumentId {
        &self.doc_id
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{OBJECT_ID_SCHEME}{}/{}", self.entity, self.doc_id)
    }
}

impl FromStr for ObjectId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CoreError::invalid_document(format!("malformed object id '{s}'"));
        let rest = s.strip_prefix(OBJECT_ID_SCHEME).ok_or_else(bad)?;
        let (entity, doc) = rest.split_once('/').ok_or_else(bad)?;
        if entity.is_empty() || doc.is_empty() || doc.contains('/') {
            return Err(bad());
        }
        Ok(Self::new(entity, DocumentId::new(doc)))
    }
}

/// A document referencing another through a relationship.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Referrer {
    /// Referencing document.
    pub source: DocumentId,
    /// Relationship on the source's entity.
    pub relationship: String,
}

#[derive(Debug, Default)]
struct Tables {
    entities: HashMap<DocumentId, String>,
    outgoing: HashMap<DocumentId, Vec<(String, DocumentId)>>,
    incoming: HashMap<DocumentId, BTreeSet<Referrer>>,
}

impl Tables {
    fn unlink(&mut self, source: &DocumentId) {
        let Some(edges) = self.outgoing.remove(source) else {
            return;
        };
        for (relationship, target) in edges {
            if let Some(refs) = self.incoming.get_mut(&target) {
                refs.remove(&Referrer {
                    source: source.clone(),
                    relationship,
                });
                if refs.is_empty() {
                    self.incoming.remove(&target);
                }
            }
        }
    }
}

/// Bidirectional identity tables plus the reverse reference index.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    tables: RwLock<Tables>,
}

impl IdentityResolver {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gives `instance` a fresh document id unless it already has one.
    /// Returns the id.
    pub fn assign_identifier(&self, instance: &mut ObjectInstance) -> DocumentId {
        if let Some(id) = &instance.id {
            return id.clone();
        }
        let tables = self.tables.read();
        let id = loop {
            let candidate = DocumentId::generate();
            if !tables.entities.contains_key(&candidate) {
                break candidate;
            }
        };
        instance.id = Some(id.clone());
        id
    }

    /// Records `doc_id` as an instance of `entity` whose body references
    /// `edges`, replacing any previous edges.
    pub fn register(
        &self,
        doc_id: &DocumentId,
        entity: &str,
        edges: impl IntoIterator<Item = (String, DocumentId)>,
    ) {
        let mut tables = self.tables.write();
        tables.unlink(doc_id);
        tables.entities.insert(doc_id.clone(), entity.to_string());
        let edges: Vec<(String, DocumentId)> = edges.into_iter().collect();
        for (relationship, target) in &edges {
            tables
                .incoming
                .entry(target.clone())
                .or_default()
                .insert(Referrer {
                    source: doc_id.clone(),
                    relationship: relationship.clone(),
                });
        }
        tables.outgoing.insert(doc_id.clone(), edges);
    }

    /// Drops a deleted document and its outgoing edges. References to it
    /// from other documents stay indexed until those documents change.
    pub fn forget(&self, doc_id: &DocumentId) {
        let mut tables = self.tables.write();
        tables.unlink(doc_id);
        tables.entities.remove(doc_id);
    }

    /// Entity of a registered document.
    #[must_use]
    pub fn entity_of(&self, doc_id: &DocumentId) -> Option<String> {
        self.tables.read().entities.get(doc_id).cloned()
    }

    /// Whether the document is registered.
    #[must_use]
    pub fn contains(&self, doc_id: &DocumentId) -> bool {
        self.tables.read().entities.contains_key(doc_id)
    }

    /// Documents referencing `target`, sorted.
    #[must_use]
    pub fn referrers(&self, target: &DocumentId) -> Vec<Referrer> {
        self.tables
            .read()
            .incoming
            .get(target)
            .map(|refs| refs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Outgoing edges of `source`.
    #[must_use]
    pub fn references(&self, source: &DocumentId) -> Vec<(String, DocumentId)> {
        self.tables
            .read()
            .outgoing
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// External identifier of a registered document.
    #[must_use]
    pub fn object_id(&self, doc_id: &DocumentId) -> Option<ObjectId> {
        self.entity_of(doc_id)
            .map(|entity| ObjectId::new(entity, doc_id.clone()))
    }

    /// Document id behind an external identifier.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the document is not registered
    /// - [`CoreError::TypeMismatch`] if it belongs to another entity
    pub fn document_id(&self, object_id: &ObjectId) -> CoreResult<DocumentId> {
        match self.entity_of(object_id.doc_id()) {
            None => Err(CoreError::NotFound(object_id.to_string())),
            Some(entity) if entity != object_id.entity() => Err(CoreError::type_mismatch(
                object_id.to_string(),
                object_id.entity(),
                entity,
            )),
            Some(_) => Ok(object_id.doc_id().clone()),
        }
    }

    /// Number of registered documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().entities.len()
    }

    /// Whether no document is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
