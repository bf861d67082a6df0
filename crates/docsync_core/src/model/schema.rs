//! Serializable schema input.
//!
//! A schema is read once at startup, either from JSON:
//!
//! ```json
//! {
//!   "entities": [
//!     {
//!       "name": "Entry",
//!       "attributes": [{ "name": "text", "type": "string" }],
//!       "relationships": [
//!         { "name": "subEntries", "target": "SubEntry", "toMany": true,
//!           "inverse": "entry", "deleteRule": "cascade" }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! or built in code with [`EntityDef`] builders.

use serde::{Deserialize, Serialize};

use super::descriptor::DeleteRule;

/// Root of a schema document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Entity definitions in declaration order.
    #[serde(default)]
    pub entities: Vec<EntityDef>,
}

impl SchemaDefinition {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity.
    #[must_use]
    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }
}

/// One entity definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name.
    pub name: String,
    /// Attributes.
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    /// Relationships.
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
}

impl EntityDef {
    /// Starts an entity definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Adds an optional attribute of the named type.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.attributes.push(AttributeDef::new(name, type_name));
        self
    }

    /// Adds a fully specified attribute.
    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Adds a to-one relationship.
    #[must_use]
    pub fn to_one(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationships
            .push(RelationshipDef::new(name, target, false));
        self
    }

    /// Adds a to-many relationship.
    #[must_use]
    pub fn to_many(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.relationships.push(RelationshipDef::new(name, target, true));
        self
    }

    /// Adds a fully specified relationship.
    #[must_use]
    pub fn with_relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }
}

/// One attribute definition.
///
/// The type is kept as text so unknown names surface as a schema error
/// naming the offending attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDef {
    /// Attribute name.
    pub name: String,
    /// Type name, e.g. `"int32"`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Whether the attribute may be absent.
    #[serde(default = "default_optional")]
    pub optional: bool,
    /// Transformer name for transformable attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<String>,
    /// Attachment content type for binary attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

fn default_optional() -> bool {
    true
}

impl AttributeDef {
    /// An optional attribute.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            optional: true,
            transformer: None,
            content_type: None,
        }
    }

    /// Marks the attribute as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    /// Names the transformer.
    #[must_use]
    pub fn transformer(mut self, name: impl Into<String>) -> Self {
        self.transformer = Some(name.into());
        self
    }

    /// Sets the attachment content type.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One relationship definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDef {
    /// Relationship name.
    pub name: String,
    /// Target entity.
    pub target: String,
    /// `true` for to-many.
    #[serde(default)]
    pub to_many: bool,
    /// Inverse relationship on the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
    /// Delete rule.
    #[serde(default)]
    pub delete_rule: DeleteRule,
}

impl RelationshipDef {
    /// A relationship with the default (nullify) delete rule.
    pub fn new(name: impl Into<String>, target: impl Into<String>, to_many: bool) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            to_many,
            inverse: None,
            delete_rule: DeleteRule::Nullify,
        }
    }

    /// Declares the inverse.
    #[must_use]
    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// Sets the delete rule.
    #[must_use]
    pub fn delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = rule;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_json() {
        let json = r#"{
            "entities": [{
                "name": "Entry",
                "attributes": [{"name": "text", "type": "string", "optional": false}],
                "relationships": [{"name": "subEntries", "target": "SubEntry",
                                   "toMany": true, "inverse": "entry",
                                   "deleteRule": "cascade"}]
            }]
        }"#;
        let schema: SchemaDefinition = serde_json::from_str(json).unwrap();
        let entry = &schema.entities[0];
        assert!(!entry.attributes[0].optional);
        assert!(entry.relationships[0].to_many);
        assert_eq!(entry.relationships[0].delete_rule, DeleteRule::Cascade);
    }

    #[test]
    fn defaults_apply() {
        let json = r#"{"entities": [{"name": "A",
            "attributes": [{"name": "x", "type": "int32"}],
            "relationships": [{"name": "b", "target": "B"}]}]}"#;
        let schema: SchemaDefinition = serde_json::from_str(json).unwrap();
        assert!(schema.entities[0].attributes[0].optional);
        assert!(!schema.entities[0].relationships[0].to_many);
        assert_eq!(
            schema.entities[0].relationships[0].delete_rule,
            DeleteRule::Nullify
        );
    }
}
