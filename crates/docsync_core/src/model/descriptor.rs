//! Entity, attribute and relationship descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    /// `true` / `false`.
    Boolean,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// Arbitrary-precision decimal, kept as text.
    Decimal,
    /// UTF-8 text.
    String,
    /// Point in time (UTC).
    Date,
    /// Opaque bytes, stored as an attachment.
    Binary,
    /// Application value converted to bytes by a named transformer.
    Transformable,
}

impl AttributeType {
    /// Parse a schema type name. Returns `None` for names with no document
    /// mapping, such as `objectID` or `undefined`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "boolean" | "bool" => Self::Boolean,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "float" => Self::Float,
            "double" => Self::Double,
            "decimal" => Self::Decimal,
            "string" => Self::String,
            "date" => Self::Date,
            "binary" => Self::Binary,
            "transformable" => Self::Transformable,
            _ => return None,
        })
    }

    /// Canonical schema name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Date => "date",
            Self::Binary => "binary",
            Self::Transformable => "transformable",
        }
    }

    /// Whether values of this type are stored as attachments.
    #[must_use]
    pub const fn is_attachment(self) -> bool {
        matches!(self, Self::Binary | Self::Transformable)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// To-one or to-many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// At most one target.
    ToOne,
    /// An unordered set of targets.
    ToMany,
}

/// What happens to related objects when the source object is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteRule {
    /// Clear the edge on the related objects.
    #[default]
    Nullify,
    /// Delete the related objects too.
    Cascade,
    /// Refuse to delete while related objects exist.
    Deny,
}

/// A typed attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    /// Attribute name.
    pub name: String,
    /// Semantic type.
    pub attr_type: AttributeType,
    /// Whether a missing value is allowed.
    pub optional: bool,
    /// Registered transformer name (transformable attributes only).
    pub transformer: Option<String>,
    /// Attachment content type (binary attributes only).
    pub content_type: Option<String>,
}

/// A relationship to another entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    /// Relationship name.
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// To-one or to-many.
    pub cardinality: Cardinality,
    /// Inverse relationship on the target entity.
    pub inverse: Option<String>,
    /// Delete rule applied when the owning object is deleted.
    pub delete_rule: DeleteRule,
}

impl RelationshipDescriptor {
    /// Whether this is a to-many relationship.
    #[must_use]
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }
}

/// An entity: ordered attributes and relationships. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub(crate) name: String,
    pub(crate) attributes: Vec<AttributeDescriptor>,
    pub(crate) relationships: Vec<RelationshipDescriptor>,
}

impl EntityDescriptor {
    /// Entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attributes in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    /// Relationships in declaration order.
    #[must_use]
    pub fn relationships(&self) -> &[RelationshipDescriptor] {
        &self.relationships
    }

    /// Look up an attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Look up a relationship.
    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Whether `name` is a declared attribute or relationship.
    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.attribute(name).is_some() || self.relationship(name).is_some()
    }
}
