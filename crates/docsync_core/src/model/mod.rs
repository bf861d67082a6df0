//! Object model descriptor.
//!
//! [`ObjectModel::load`] turns a [`SchemaDefinition`] into validated,
//! immutable [`EntityDescriptor`]s. A loaded model is read-only and can be
//! shared across threads behind an `Arc`.

mod descriptor;
mod schema;
mod transformer;

use std::collections::{HashMap, HashSet};

use docsync_codec::{to_canonical_cbor, Value};
use sha2::{Digest, Sha256};

pub use descriptor::{
    AttributeDescriptor, AttributeType, Cardinality, DeleteRule, EntityDescriptor,
    RelationshipDescriptor,
};
pub use schema::{AttributeDef, EntityDef, RelationshipDef, SchemaDefinition};
pub use transformer::{CborTransformer, JsonTransformer, TransformerRegistry, ValueTransformer};

use crate::error::SchemaError;

/// Prefix reserved for codec bookkeeping keys in document bodies.
pub const RESERVED_PREFIX: char = '$';

/// A validated set of entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectModel {
    entities: Vec<EntityDescriptor>,
    index: HashMap<String, usize>,
}

impl ObjectModel {
    /// Validate and load a schema.
    ///
    /// # Errors
    ///
    /// Fails with a [`SchemaError`] when names are empty, duplicated or
    /// reserved, when an attribute type has no document mapping, when a
    /// relationship target is unknown, or when an inverse is missing or
    /// does not point back.
    pub fn load(schema: &SchemaDefinition) -> Result<Self, SchemaError> {
        let mut entities = Vec::with_capacity(schema.entities.len());
        let mut index = HashMap::new();

        for def in &schema.entities {
            if def.name.is_empty() {
                return Err(SchemaError::EmptyName {
                    entity: String::new(),
                });
            }
            if index.insert(def.name.clone(), entities.len()).is_some() {
                return Err(SchemaError::DuplicateEntity(def.name.clone()));
            }
            entities.push(load_entity(def)?);
        }

        let model = Self { entities, index };
        model.check_relationships()?;
        Ok(model)
    }

    /// Parse and load a JSON schema document.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] for malformed JSON, otherwise as
    /// [`ObjectModel::load`].
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let schema: SchemaDefinition =
            serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::load(&schema)
    }

    fn check_relationships(&self) -> Result<(), SchemaError> {
        for entity in &self.entities {
            for rel in &entity.relationships {
                let target =
                    self.entity(&rel.target)
                        .ok_or_else(|| SchemaError::UnknownTarget {
                            entity: entity.name.clone(),
                            relationship: rel.name.clone(),
                            target: rel.target.clone(),
                        })?;
                let Some(inverse_name) = &rel.inverse else {
                    continue;
                };
                let inverse = target.relationship(inverse_name).ok_or_else(|| {
                    SchemaError::UnknownInverse {
                        entity: entity.name.clone(),
                        relationship: rel.name.clone(),
                        target: rel.target.clone(),
                        inverse: inverse_name.clone(),
                    }
                })?;
                let points_back = inverse.target == entity.name
                    && inverse.inverse.as_deref() == Some(rel.name.as_str());
                if !points_back {
                    return Err(SchemaError::AsymmetricInverse {
                        entity: entity.name.clone(),
                        relationship: rel.name.clone(),
                        target: rel.target.clone(),
                        inverse: inverse_name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up an entity.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.index.get(name).map(|&i| &self.entities[i])
    }

    /// Entities in declaration order.
    #[must_use]
    pub fn entities(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    /// Transformer names referenced by the model, sorted and deduplicated.
    #[must_use]
    pub fn transformer_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entities
            .iter()
            .flat_map(|e| e.attributes.iter())
            .filter_map(|a| a.transformer.as_deref())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Check that every transformer the model names is registered.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownTransformer`] for the first missing one.
    pub fn check_transformers(&self, registry: &TransformerRegistry) -> Result<(), SchemaError> {
        for name in self.transformer_names() {
            if registry.get(name).is_none() {
                return Err(SchemaError::UnknownTransformer(name.to_string()));
            }
        }
        Ok(())
    }

    /// Canonical description of the model as a value.
    #[must_use]
    pub fn describe(&self) -> Value {
        let entities = self
            .entities
            .iter()
            .map(|e| {
                let attributes = e
                    .attributes
                    .iter()
                    .map(|a| {
                        Value::object([
                            ("name", Value::from(a.name.as_str())),
                            ("type", Value::from(a.attr_type.name())),
                            ("optional", Value::Bool(a.optional)),
                            (
                                "transformer",
                                a.transformer.as_deref().map_or(Value::Null, Value::from),
                            ),
                        ])
                    })
                    .collect();
                let relationships = e
                    .relationships
                    .iter()
                    .map(|r| {
                        Value::object([
                            ("name", Value::from(r.name.as_str())),
                            ("target", Value::from(r.target.as_str())),
                            ("toMany", Value::Bool(r.is_to_many())),
                            (
                                "inverse",
                                r.inverse.as_deref().map_or(Value::Null, Value::from),
                            ),
                        ])
                    })
                    .collect();
                Value::object([
                    ("name", Value::from(e.name.as_str())),
                    ("attributes", Value::Array(attributes)),
                    ("relationships", Value::Array(relationships)),
                ])
            })
            .collect();
        Value::object([("entities", Value::Array(entities))])
    }

    /// SHA-256 over the canonical description, hex encoded.
    ///
    /// Peers compare fingerprints before replicating; delete rules are
    /// local policy and do not contribute.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        // the description holds only text, bools and nulls
        let bytes = to_canonical_cbor(&self.describe()).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

fn load_entity(def: &EntityDef) -> Result<EntityDescriptor, SchemaError> {
    let mut seen = HashSet::new();
    let check_name = |name: &str, seen: &mut HashSet<String>| -> Result<(), SchemaError> {
        if name.is_empty() {
            return Err(SchemaError::EmptyName {
                entity: def.name.clone(),
            });
        }
        if name.starts_with(RESERVED_PREFIX) {
            return Err(SchemaError::ReservedName {
                entity: def.name.clone(),
                name: name.to_string(),
            });
        }
        if !seen.insert(name.to_string()) {
            return Err(SchemaError::DuplicateProperty {
                entity: def.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    };

    let mut attributes = Vec::with_capacity(def.attributes.len());
    for attr in &def.attributes {
        check_name(&attr.name, &mut seen)?;
        let attr_type = AttributeType::from_name(&attr.type_name).ok_or_else(|| {
            SchemaError::UnsupportedType {
                entity: def.name.clone(),
                attribute: attr.name.clone(),
                type_name: attr.type_name.clone(),
            }
        })?;
        match (attr_type, &attr.transformer) {
            (AttributeType::Transformable, None) => {
                return Err(SchemaError::MissingTransformer {
                    entity: def.name.clone(),
                    attribute: attr.name.clone(),
                })
            }
            (t, Some(_)) if t != AttributeType::Transformable => {
                return Err(SchemaError::UnexpectedTransformer {
                    entity: def.name.clone(),
                    attribute: attr.name.clone(),
                })
            }
            _ => {}
        }
        attributes.push(AttributeDescriptor {
            name: attr.name.clone(),
            attr_type,
            optional: attr.optional,
            transformer: attr.transformer.clone(),
            content_type: attr.content_type.clone(),
        });
    }

    let mut relationships = Vec::with_capacity(def.relationships.len());
    for rel in &def.relationships {
        check_name(&rel.name, &mut seen)?;
        relationships.push(RelationshipDescriptor {
            name: rel.name.clone(),
            target: rel.target.clone(),
            cardinality: if rel.to_many {
                Cardinality::ToMany
            } else {
                Cardinality::ToOne
            },
            inverse: rel.inverse.clone(),
            delete_rule: rel.delete_rule,
        });
    }

    Ok(EntityDescriptor {
        name: def.name.clone(),
        attributes,
        relationships,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog() -> SchemaDefinition {
        SchemaDefinition::new()
            .entity(
                EntityDef::new("Post")
                    .attribute("title", "string")
                    .with_relationship(
                        RelationshipDef::new("comments", "Comment", true)
                            .inverse("post")
                            .delete_rule(DeleteRule::Cascade),
                    ),
            )
            .entity(
                EntityDef::new("Comment")
                    .attribute("body", "string")
                    .with_relationship(RelationshipDef::new("post", "Post", false).inverse("comments")),
            )
    }

    #[test]
    fn loads_symmetric_model() {
        let model = ObjectModel::load(&blog()).unwrap();
        let post = model.entity("Post").unwrap();
        assert_eq!(post.attributes()[0].attr_type, AttributeType::String);
        let comments = post.relationship("comments").unwrap();
        assert!(comments.is_to_many());
        assert_eq!(comments.delete_rule, DeleteRule::Cascade);
        assert_eq!(model.entities().len(), 2);
    }

    #[test]
    fn asymmetric_inverse_rejected() {
        let mut schema = blog();
        schema.entities[1].relationships[0].inverse = None;
        assert!(matches!(
            ObjectModel::load(&schema),
            Err(SchemaError::AsymmetricInverse { .. })
        ));
    }

    #[test]
    fn missing_inverse_rejected() {
        let mut schema = blog();
        schema.entities[0].relationships[0].inverse = Some("article".into());
        assert!(matches!(
            ObjectModel::load(&schema),
            Err(SchemaError::UnknownInverse { .. })
        ));
    }

    #[test]
    fn unsupported_types_rejected() {
        for type_name in ["objectID", "undefined", "uuid"] {
            let schema = SchemaDefinition::new()
                .entity(EntityDef::new("A").attribute("x", type_name));
            assert_eq!(
                ObjectModel::load(&schema),
                Err(SchemaError::UnsupportedType {
                    entity: "A".into(),
                    attribute: "x".into(),
                    type_name: type_name.into(),
                })
            );
        }
    }

    #[test]
    fn naming_rules() {
        let dup = SchemaDefinition::new()
            .entity(EntityDef::new("A").attribute("x", "string").to_one("x", "A"));
        assert!(matches!(
            ObjectModel::load(&dup),
            Err(SchemaError::DuplicateProperty { .. })
        ));

        let reserved = SchemaDefinition::new().entity(EntityDef::new("A").attribute("$entity", "string"));
        assert!(matches!(
            ObjectModel::load(&reserved),
            Err(SchemaError::ReservedName { .. })
        ));

        let twice = SchemaDefinition::new()
            .entity(EntityDef::new("A"))
            .entity(EntityDef::new("A"));
        assert_eq!(
            ObjectModel::load(&twice),
            Err(SchemaError::DuplicateEntity("A".into()))
        );
    }

    #[test]
    fn unknown_target_rejected() {
        let schema = SchemaDefinition::new().entity(EntityDef::new("A").to_one("b", "B"));
        assert!(matches!(
            ObjectModel::load(&schema),
            Err(SchemaError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn transformer_rules() {
        let missing = SchemaDefinition::new()
            .entity(EntityDef::new("A").attribute("blob", "transformable"));
        assert!(matches!(
            ObjectModel::load(&missing),
            Err(SchemaError::MissingTransformer { .. })
        ));

        let unexpected = SchemaDefinition::new().entity(
            EntityDef::new("A").with_attribute(AttributeDef::new("s", "string").transformer("json")),
        );
        assert!(matches!(
            ObjectModel::load(&unexpected),
            Err(SchemaError::UnexpectedTransformer { .. })
        ));

        let model = ObjectModel::load(&SchemaDefinition::new().entity(
            EntityDef::new("A")
                .with_attribute(AttributeDef::new("t", "transformable").transformer("yaml")),
        ))
        .unwrap();
        assert_eq!(
            model.check_transformers(&TransformerRegistry::new()),
            Err(SchemaError::UnknownTransformer("yaml".into()))
        );
    }

    #[test]
    fn from_json_reports_parse_errors() {
        assert!(matches!(
            ObjectModel::from_json("{"),
            Err(SchemaError::Parse(_))
        ));
    }

    #[test]
    fn fingerprint_tracks_structure_not_delete_rules() {
        let a = ObjectModel::load(&blog()).unwrap();
        let mut schema = blog();
        schema.entities[0].relationships[0].delete_rule = DeleteRule::Deny;
        let b = ObjectModel::load(&schema).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        schema.entities[0].attributes[0].type_name = "date".into();
        let c = ObjectModel::load(&schema).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
