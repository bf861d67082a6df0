//! Document codec: object instances to document records and back.
//!
//! Body layout for an entity `E`:
//!
//! | attribute type | body value |
//! |---|---|
//! | boolean, int16/32/64 | JSON bool / integer |
//! | float, double | JSON number (finite only) |
//! | decimal | string |
//! | date | RFC 3339 string, UTC |
//! | string | string |
//! | binary, transformable | `{"$attachment": "<name>"}` plus an attachment |
//! | to-one | target document id string |
//! | to-many | `[{"ref": "<id>", "key": "<edge key>"}, ...]` sorted by key |
//!
//! Absent properties encode as `null`. The body also carries
//! `"$entity": "E"`.

mod attachments;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use docsync_codec::Value;
use sha2::{Digest, Sha256};

pub use attachments::{extract_attachments, load_attachments};

use crate::document::{Attachment, DocumentId, DocumentRecord};
use crate::error::{CoreError, CoreResult};
use crate::model::{
    AttributeDescriptor, AttributeType, EntityDescriptor, RelationshipDescriptor,
    TransformerRegistry,
};
use crate::object::{AttrValue, Decimal, ObjectInstance, ObjectRef};

/// Body key holding the entity name.
pub const ENTITY_KEY: &str = "$entity";
/// Key of the marker object pointing at an attachment.
pub const ATTACHMENT_KEY: &str = "$attachment";
/// Content type of binary attributes without an explicit one.
pub const DEFAULT_BINARY_CONTENT_TYPE: &str = "application/octet-stream";

const REF_FIELD: &str = "ref";
const KEY_FIELD: &str = "key";

/// Stable ordering key of one to-many edge.
///
/// Derived from the relationship and target only, so every replica
/// computes the same key for the same edge and merges never reorder or
/// duplicate edges.
#[must_use]
pub fn edge_key(relationship: &str, target: &DocumentId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relationship.as_bytes());
    hasher.update([0u8]);
    hasher.update(target.as_str().as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Encode an instance into a document record.
///
/// Binary and transformable values become attachments carrying their
/// bytes; moving them into a blob store is the separate
/// [`extract_attachments`] step.
///
/// # Errors
///
/// - [`CoreError::MissingIdentifier`] if the instance has no id
/// - [`CoreError::NumericDomain`] for NaN or infinite floats
/// - [`CoreError::TypeMismatch`] for values not matching the model
/// - [`CoreError::UnknownProperty`] for properties the entity lacks
/// - [`CoreError::MissingValue`] for absent required attributes
pub fn encode(
    instance: &ObjectInstance,
    entity: &EntityDescriptor,
    transformers: &TransformerRegistry,
) -> CoreResult<DocumentRecord> {
    if instance.entity != entity.name() {
        return Err(CoreError::type_mismatch(
            "instance entity",
            entity.name(),
            instance.entity.as_str(),
        ));
    }
    let id = instance
        .id
        .clone()
        .ok_or_else(|| CoreError::MissingIdentifier {
            entity: entity.name().to_string(),
        })?;
    if let Some(unknown) = instance.values.keys().find(|k| !entity.has_property(k)) {
        return Err(CoreError::UnknownProperty {
            entity: entity.name().to_string(),
            name: unknown.clone(),
        });
    }

    let mut body = BTreeMap::new();
    let mut attachments = BTreeMap::new();
    body.insert(ENTITY_KEY.to_string(), Value::from(entity.name()));

    for attr in entity.attributes() {
        let encoded = match instance.values.get(&attr.name) {
            None if !attr.optional => {
                return Err(CoreError::MissingValue {
                    entity: entity.name().to_string(),
                    attribute: attr.name.clone(),
                })
            }
            None => Value::Null,
            Some(value) => {
                encode_attribute(entity, attr, value, transformers, &mut attachments)?
            }
        };
        body.insert(attr.name.clone(), encoded);
    }

    for rel in entity.relationships() {
        let encoded = match instance.values.get(&rel.name) {
            None => Value::Null,
            Some(value) => encode_relationship(entity, rel, value)?,
        };
        body.insert(rel.name.clone(), encoded);
    }

    Ok(DocumentRecord {
        id,
        rev: None,
        body: Value::Object(body),
        attachments,
        deleted: false,
    })
}

fn check_finite(attr: &AttributeDescriptor, value: f64) -> CoreResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CoreError::NumericDomain {
            attribute: attr.name.clone(),
            value: value.to_string(),
        })
    }
}

fn narrow_to_f32(attr: &AttributeDescriptor, value: f64) -> CoreResult<f32> {
    if value.abs() > f64::from(f32::MAX) {
        return Err(CoreError::NumericDomain {
            attribute: attr.name.clone(),
            value: value.to_string(),
        });
    }
    Ok(value as f32)
}

fn encode_attribute(
    entity: &EntityDescriptor,
    attr: &AttributeDescriptor,
    value: &AttrValue,
    transformers: &TransformerRegistry,
    attachments: &mut BTreeMap<String, Attachment>,
) -> CoreResult<Value> {
    if !value.matches(attr.attr_type) {
        return Err(CoreError::type_mismatch(
            format!("{}.{}", entity.name(), attr.name),
            attr.attr_type.name(),
            value.type_name(),
        ));
    }
    let attachment_marker = |name: &str| Value::object([(ATTACHMENT_KEY, Value::from(name))]);

    Ok(match value {
        AttrValue::Bool(b) => Value::Bool(*b),
        AttrValue::Int16(n) => Value::from(*n),
        AttrValue::Int32(n) => Value::from(*n),
        AttrValue::Int64(n) => Value::Integer(*n),
        AttrValue::Float(f) => {
            check_finite(attr, f64::from(*f))?;
            Value::Float(f64::from(*f))
        }
        AttrValue::Double(f) => {
            check_finite(attr, *f)?;
            Value::Float(*f)
        }
        AttrValue::Decimal(d) => Value::from(d.as_str()),
        AttrValue::String(s) => Value::from(s.as_str()),
        AttrValue::Date(d) => Value::Text(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        AttrValue::Binary(bytes) => {
            let content_type = attr
                .content_type
                .as_deref()
                .unwrap_or(DEFAULT_BINARY_CONTENT_TYPE);
            attachments.insert(attr.name.clone(), Attachment::new(content_type, bytes.clone()));
            attachment_marker(&attr.name)
        }
        AttrValue::Transformable(inner) => {
            let transformer = transformer_for(attr, transformers)?;
            let bytes = transformer.transform(inner)?;
            attachments.insert(
                attr.name.clone(),
                Attachment::new(transformer.content_type(), bytes),
            );
            attachment_marker(&attr.name)
        }
        AttrValue::Reference(_) | AttrValue::ReferenceSet(_) => {
            return Err(CoreError::type_mismatch(
                format!("{}.{}", entity.name(), attr.name),
                attr.attr_type.name(),
                value.type_name(),
            ))
        }
    })
}

fn transformer_for<'a>(
    attr: &AttributeDescriptor,
    transformers: &'a TransformerRegistry,
) -> CoreResult<&'a std::sync::Arc<dyn crate::model::ValueTransformer>> {
    let name = attr.transformer.as_deref().unwrap_or_default();
    transformers
        .get(name)
        .ok_or_else(|| crate::error::SchemaError::UnknownTransformer(name.to_string()).into())
}

fn check_target(entity: &EntityDescriptor, rel: &RelationshipDescriptor, r: &ObjectRef) -> CoreResult<()> {
    if r.entity() == rel.target {
        Ok(())
    } else {
        Err(CoreError::type_mismatch(
            format!("{}.{}", entity.name(), rel.name),
            rel.target.as_str(),
            r.entity(),
        ))
    }
}

fn encode_relationship(
    entity: &EntityDescriptor,
    rel: &RelationshipDescriptor,
    value: &AttrValue,
) -> CoreResult<Value> {
    match (value, rel.is_to_many()) {
        (AttrValue::Reference(r), false) => {
            check_target(entity, rel, r)?;
            Ok(Value::from(r.target().as_str()))
        }
        (AttrValue::ReferenceSet(set), true) => {
            let mut edges = Vec::with_capacity(set.len());
            for r in set {
                check_target(entity, rel, r)?;
                edges.push((edge_key(&rel.name, r.target()), r.target().as_str()));
            }
            edges.sort_unstable();
            Ok(Value::Array(
                edges
                    .into_iter()
                    .map(|(key, target)| {
                        Value::object([(REF_FIELD, Value::from(target)), (KEY_FIELD, Value::Text(key))])
                    })
                    .collect(),
            ))
        }
        _ => Err(CoreError::type_mismatch(
            format!("{}.{}", entity.name(), rel.name),
            if rel.is_to_many() {
                "reference set"
            } else {
                "reference"
            },
            value.type_name(),
        )),
    }
}

/// Decode a document record into an instance.
///
/// `exists` reports whether a referenced document is present locally;
/// references to absent documents decode as placeholders instead of
/// failing. Attachments must carry their bytes (see [`load_attachments`]).
///
/// # Errors
///
/// - [`CoreError::TypeMismatch`] if the body does not match the entity
/// - [`CoreError::NumericDomain`] for non-finite numbers, or floats beyond
///   single precision
/// - [`CoreError::MissingAttachment`] for attachments without bytes
pub fn decode(
    record: &DocumentRecord,
    entity: &EntityDescriptor,
    transformers: &TransformerRegistry,
    exists: &dyn Fn(&DocumentId) -> bool,
) -> CoreResult<ObjectInstance> {
    let body = record.body.as_object().ok_or_else(|| {
        CoreError::type_mismatch(
            format!("{} body", record.id),
            "object",
            record.body.type_name(),
        )
    })?;
    match body.get(ENTITY_KEY).and_then(Value::as_text) {
        Some(name) if name == entity.name() => {}
        other => {
            return Err(CoreError::type_mismatch(
                format!("{} {ENTITY_KEY}", record.id),
                entity.name(),
                other.unwrap_or("<missing>"),
            ))
        }
    }

    let mut instance = ObjectInstance::new(entity.name()).with_id(record.id.clone());

    for attr in entity.attributes() {
        match body.get(&attr.name) {
            None | Some(Value::Null) => {}
            Some(value) => {
                let decoded = decode_attribute(record, entity, attr, value, transformers)?;
                instance.values.insert(attr.name.clone(), decoded);
            }
        }
    }

    for rel in entity.relationships() {
        let context = || format!("{}.{}", entity.name(), rel.name);
        let make_ref = |id: &str| {
            let target = DocumentId::new(id);
            if exists(&target) {
                ObjectRef::new(target, rel.target.as_str())
            } else {
                ObjectRef::placeholder(target, rel.target.as_str())
            }
        };
        match (body.get(&rel.name), rel.is_to_many()) {
            (None | Some(Value::Null), _) => {}
            (Some(Value::Text(id)), false) => {
                instance
                    .values
                    .insert(rel.name.clone(), AttrValue::Reference(make_ref(id)));
            }
            (Some(Value::Array(edges)), true) => {
                let mut set = BTreeSet::new();
                for edge in edges {
                    let id = edge_target(edge)
                        .ok_or_else(|| CoreError::type_mismatch(context(), "edge", edge.type_name()))?;
                    set.insert(make_ref(id));
                }
                instance
                    .values
                    .insert(rel.name.clone(), AttrValue::ReferenceSet(set));
            }
            (Some(other), to_many) => {
                return Err(CoreError::type_mismatch(
                    context(),
                    if to_many { "array" } else { "text" },
                    other.type_name(),
                ))
            }
        }
    }

    Ok(instance)
}

fn edge_target(edge: &Value) -> Option<&str> {
    match edge {
        Value::Text(id) => Some(id),
        Value::Object(_) => edge.get(REF_FIELD).and_then(Value::as_text),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn decode_attribute(
    record: &DocumentRecord,
    entity: &EntityDescriptor,
    attr: &AttributeDescriptor,
    value: &Value,
    transformers: &TransformerRegistry,
) -> CoreResult<AttrValue> {
    let context = format!("{}.{}", entity.name(), attr.name);
    let mismatch = || CoreError::type_mismatch(context.clone(), attr.attr_type.name(), value.type_name());
    let integer = || value.as_integer().ok_or_else(mismatch);
    let float = || -> CoreResult<f64> {
        let f = value.as_f64().ok_or_else(mismatch)?;
        check_finite(attr, f)?;
        Ok(f)
    };
    let text = || value.as_text().ok_or_else(mismatch);

    Ok(match attr.attr_type {
        AttributeType::Boolean => AttrValue::Bool(value.as_bool().ok_or_else(mismatch)?),
        AttributeType::Int16 => AttrValue::Int16(i16::try_from(integer()?).map_err(|_| mismatch())?),
        AttributeType::Int32 => AttrValue::Int32(i32::try_from(integer()?).map_err(|_| mismatch())?),
        AttributeType::Int64 => AttrValue::Int64(integer()?),
        AttributeType::Float => AttrValue::Float(narrow_to_f32(attr, float()?)?),
        AttributeType::Double => AttrValue::Double(float()?),
        AttributeType::Decimal => AttrValue::Decimal(Decimal::parse(text()?)?),
        AttributeType::String => AttrValue::String(text()?.to_string()),
        AttributeType::Date => {
            let parsed = DateTime::parse_from_rfc3339(text()?).map_err(|_| mismatch())?;
            AttrValue::Date(parsed.with_timezone(&Utc))
        }
        AttributeType::Binary | AttributeType::Transformable => {
            let name = value
                .get(ATTACHMENT_KEY)
                .and_then(Value::as_text)
                .ok_or_else(mismatch)?;
            let bytes = record
                .attachments
                .get(name)
                .and_then(|a| a.data.as_ref())
                .ok_or_else(|| CoreError::MissingAttachment {
                    doc_id: record.id.to_string(),
                    name: name.to_string(),
                })?;
            if attr.attr_type == AttributeType::Binary {
                AttrValue::Binary(bytes.clone())
            } else {
                AttrValue::Transformable(transformer_for(attr, transformers)?.reverse(bytes)?)
            }
        }
    })
}

/// Outgoing edges `(relationship, target)` of a body, per the entity's
/// relationships. Malformed entries are skipped.
#[must_use]
pub fn body_references(body: &Value, entity: &EntityDescriptor) -> Vec<(String, DocumentId)> {
    let mut out = Vec::new();
    for rel in entity.relationships() {
        match body.get(&rel.name) {
            Some(Value::Text(id)) if !rel.is_to_many() => {
                out.push((rel.name.clone(), DocumentId::new(id.as_str())));
            }
            Some(Value::Array(edges)) if rel.is_to_many() => {
                out.extend(
                    edges
                        .iter()
                        .filter_map(edge_target)
                        .map(|id| (rel.name.clone(), DocumentId::new(id))),
                );
            }
            _ => {}
        }
    }
    out
}

/// Remove the edge to `target` from relationship `rel` in a body.
/// Returns whether the body changed.
pub fn remove_reference(body: &mut Value, rel: &RelationshipDescriptor, target: &DocumentId) -> bool {
    let Value::Object(map) = body else {
        return false;
    };
    let Some(current) = map.get_mut(&rel.name) else {
        return false;
    };
    let clear = match *current {
        Value::Text(ref id) => id.as_str() == target.as_str(),
        Value::Array(ref mut edges) => {
            let before = edges.len();
            edges.retain(|e| edge_target(e) != Some(target.as_str()));
            return edges.len() != before;
        }
        _ => false,
    };
    if clear {
        *current = Value::Null;
    }
    clear
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDef, EntityDef, ObjectModel, RelationshipDef, SchemaDefinition};
    use chrono::TimeZone;

    fn model() -> ObjectModel {
        ObjectModel::load(
            &SchemaDefinition::new()
                .entity(
                    EntityDef::new("Note")
                        .attribute("text", "string")
                        .attribute("count", "int16")
                        .attribute("ratio", "double")
                        .attribute("when", "date")
                        .attribute("price", "decimal")
                        .attribute("blob", "binary")
                        .with_attribute(AttributeDef::new("meta", "transformable").transformer("json"))
                        .with_relationship(RelationshipDef::new("tags", "Tag", true).inverse("note"))
                        .to_one("parent", "Note"),
                )
                .entity(
                    EntityDef::new("Tag")
                        .with_attribute(AttributeDef::new("label", "string").required())
                        .with_relationship(RelationshipDef::new("note", "Note", false).inverse("tags")),
                ),
        )
        .unwrap()
    }

    fn tag_ref(id: &str) -> ObjectRef {
        ObjectRef::new(DocumentId::new(id), "Tag")
    }

    #[test]
    fn encode_body_layout() {
        let model = model();
        let note = model.entity("Note").unwrap();
        let mut instance = ObjectInstance::new("Note")
            .with_id(DocumentId::new("n1"))
            .set("text", "hi")
            .set("count", 7i16)
            .set("when", Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
            .set("blob", vec![1u8, 2, 3]);
        instance.add_reference("tags", tag_ref("t2")).unwrap();
        instance.add_reference("tags", tag_ref("t1")).unwrap();

        let record = encode(&instance, note, &TransformerRegistry::new()).unwrap();
        let body = &record.body;
        assert_eq!(body.get(ENTITY_KEY), Some(&Value::from("Note")));
        assert_eq!(body.get("count"), Some(&Value::Integer(7)));
        assert_eq!(body.get("when"), Some(&Value::from("2024-01-02T03:04:05Z")));
        assert_eq!(body.get("ratio"), Some(&Value::Null));
        assert_eq!(body.get("parent"), Some(&Value::Null));
        assert_eq!(
            body.get("blob").and_then(|b| b.get(ATTACHMENT_KEY)),
            Some(&Value::from("blob"))
        );
        assert_eq!(record.attachments["blob"].length, 3);

        let keys: Vec<&str> = body
            .get("tags")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .map(|e| e.get("key").and_then(Value::as_text).unwrap())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn round_trip_all_types() {
        let model = model();
        let note = model.entity("Note").unwrap();
        let registry = TransformerRegistry::new();
        let mut instance = ObjectInstance::new("Note")
            .with_id(DocumentId::new("n1"))
            .set("text", "hello")
            .set("count", -3i16)
            .set("ratio", 0.125f64)
            .set(
                "when",
                Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
            )
            .set("price", Decimal::parse("19.99").unwrap())
            .set("blob", vec![0u8, 255, 7])
            .set(
                "meta",
                AttrValue::Transformable(Value::object([("k", Value::from("v"))])),
            )
            .set("parent", ObjectRef::new(DocumentId::new("n0"), "Note"));
        instance.add_reference("tags", tag_ref("t1")).unwrap();

        let record = encode(&instance, note, &registry).unwrap();
        let decoded = decode(&record, note, &registry, &|_| true).unwrap();
        assert_eq!(decoded, instance);
    }

    #[test]
    fn unresolved_references_become_placeholders() {
        let model = model();
        let note = model.entity("Note").unwrap();
        let registry = TransformerRegistry::new();
        let instance = ObjectInstance::new("Note")
            .with_id(DocumentId::new("n1"))
            .set("parent", ObjectRef::new(DocumentId::new("gone"), "Note"));
        let record = encode(&instance, note, &registry).unwrap();
        let decoded = decode(&record, note, &registry, &|_| false).unwrap();
        match decoded.get("parent") {
            Some(AttrValue::Reference(r)) => assert!(r.is_placeholder()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(decoded, instance);
    }

    #[test]
    fn non_finite_numbers_rejected() {
        let model = model();
        let note = model.entity("Note").unwrap();
        for f in [f64::NAN, f64::INFINITY] {
            let instance = ObjectInstance::new("Note")
                .with_id(DocumentId::new("n"))
                .set("ratio", f);
            assert!(matches!(
                encode(&instance, note, &TransformerRegistry::new()),
                Err(CoreError::NumericDomain { .. })
            ));
        }
    }

    #[test]
    fn float_outside_single_precision_rejected() {
        let model = ObjectModel::load(
            &SchemaDefinition::new().entity(EntityDef::new("Reading").attribute("level", "float")),
        )
        .unwrap();
        let reading = model.entity("Reading").unwrap();
        let record = |level: f64| {
            DocumentRecord::new(
                DocumentId::new("r"),
                Value::object([
                    (ENTITY_KEY, Value::from("Reading")),
                    ("level", Value::Float(level)),
                ]),
            )
        };

        for level in [1e300, -1e39] {
            assert!(matches!(
                decode(&record(level), reading, &TransformerRegistry::new(), &|_| true),
                Err(CoreError::NumericDomain { .. })
            ));
        }
        let edge = decode(&record(f64::from(f32::MAX)), reading, &TransformerRegistry::new(), &|_| true)
            .unwrap();
        assert_eq!(edge.get("level"), Some(&AttrValue::Float(f32::MAX)));
    }

    #[test]
    fn encode_validation_errors() {
        let model = model();
        let registry = TransformerRegistry::new();
        let note = model.entity("Note").unwrap();
        let tag = model.entity("Tag").unwrap();

        let no_id = ObjectInstance::new("Note");
        assert!(matches!(
            encode(&no_id, note, &registry),
            Err(CoreError::MissingIdentifier { .. })
        ));

        let wrong_type = ObjectInstance::new("Note")
            .with_id(DocumentId::new("n"))
            .set("count", 7i32);
        assert!(matches!(
            encode(&wrong_type, note, &registry),
            Err(CoreError::TypeMismatch { .. })
        ));

        let unknown = ObjectInstance::new("Note")
            .with_id(DocumentId::new("n"))
            .set("nope", true);
        assert!(matches!(
            encode(&unknown, note, &registry),
            Err(CoreError::UnknownProperty { .. })
        ));

        let missing_required = ObjectInstance::new("Tag").with_id(DocumentId::new("t"));
        assert!(matches!(
            encode(&missing_required, tag, &registry),
            Err(CoreError::MissingValue { .. })
        ));

        let wrong_target = ObjectInstance::new("Note")
            .with_id(DocumentId::new("n"))
            .set("parent", tag_ref("t1"));
        assert!(matches!(
            encode(&wrong_target, note, &registry),
            Err(CoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn decode_rejects_foreign_entity_and_bad_values() {
        let model = model();
        let registry = TransformerRegistry::new();
        let note = model.entity("Note").unwrap();

        let foreign = DocumentRecord::new(
            DocumentId::new("x"),
            Value::object([(ENTITY_KEY, Value::from("Tag"))]),
        );
        assert!(decode(&foreign, note, &registry, &|_| true).is_err());

        let overflow = DocumentRecord::new(
            DocumentId::new("x"),
            Value::object([
                (ENTITY_KEY, Value::from("Note")),
                ("count", Value::Integer(70_000)),
            ]),
        );
        assert!(matches!(
            decode(&overflow, note, &registry, &|_| true),
            Err(CoreError::TypeMismatch { .. })
        ));

        let stubbed = DocumentRecord::new(
            DocumentId::new("x"),
            Value::object([
                (ENTITY_KEY, Value::from("Note")),
                ("blob", Value::object([(ATTACHMENT_KEY, Value::from("blob"))])),
            ]),
        )
        .with_attachment("blob", Attachment::new("a/b", vec![1]).to_stub());
        assert!(matches!(
            decode(&stubbed, note, &registry, &|_| true),
            Err(CoreError::MissingAttachment { .. })
        ));
    }

    #[test]
    fn edge_keys_are_stable_and_distinct() {
        let a = DocumentId::new("a");
        assert_eq!(edge_key("tags", &a), edge_key("tags", &a));
        assert_ne!(edge_key("tags", &a), edge_key("files", &a));
        assert_eq!(edge_key("tags", &a).len(), 16);
    }

    #[test]
    fn references_and_removal() {
        let model = model();
        let note = model.entity("Note").unwrap();
        let mut instance = ObjectInstance::new("Note")
            .with_id(DocumentId::new("n1"))
            .set("parent", ObjectRef::new(DocumentId::new("n0"), "Note"));
        instance.add_reference("tags", tag_ref("t1")).unwrap();
        instance.add_reference("tags", tag_ref("t2")).unwrap();
        let mut record = encode(&instance, note, &TransformerRegistry::new()).unwrap();

        let refs = body_references(&record.body, note);
        assert_eq!(refs.len(), 3);

        let tags = note.relationship("tags").unwrap();
        assert!(remove_reference(&mut record.body, tags, &DocumentId::new("t1")));
        assert!(!remove_reference(&mut record.body, tags, &DocumentId::new("t1")));
        let parent = note.relationship("parent").unwrap();
        assert!(remove_reference(&mut record.body, parent, &DocumentId::new("n0")));
        assert_eq!(record.body.get("parent"), Some(&Value::Null));
        assert_eq!(body_references(&record.body, note).len(), 1);
    }
}
