//! Value forms of core types and field access helpers.

use std::collections::BTreeMap;

use docsync_codec::{CodecError, CodecResult, Value};
use docsync_core::{BlobData, DocumentId, RevisionBundle, RevisionId, RevisionNode};

/// Typed access to the fields of a message object.
pub(crate) struct Fields<'a> {
    map: &'a BTreeMap<String, Value>,
    context: &'static str,
}

impl<'a> Fields<'a> {
    pub(crate) fn of(value: &'a Value, context: &'static str) -> CodecResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| CodecError::invalid_structure(format!("{context}: expected object")))?;
        Ok(Self { map, context })
    }

    fn bad(&self, name: &str, what: &str) -> CodecError {
        CodecError::invalid_structure(format!("{}: field '{name}' {what}", self.context))
    }

    pub(crate) fn value(&self, name: &str) -> CodecResult<&'a Value> {
        self.map.get(name).ok_or_else(|| self.bad(name, "is missing"))
    }

    pub(crate) fn text(&self, name: &str) -> CodecResult<&'a str> {
        self.value(name)?
            .as_text()
            .ok_or_else(|| self.bad(name, "must be text"))
    }

    pub(crate) fn opt_text(&self, name: &str) -> CodecResult<Option<&'a str>> {
        match self.map.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(_) => Err(self.bad(name, "must be text or null")),
        }
    }

    pub(crate) fn u64(&self, name: &str) -> CodecResult<u64> {
        self.value(name)?
            .as_integer()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| self.bad(name, "must be a non-negative integer"))
    }

    pub(crate) fn bool(&self, name: &str) -> CodecResult<bool> {
        self.value(name)?
            .as_bool()
            .ok_or_else(|| self.bad(name, "must be a boolean"))
    }

    pub(crate) fn array(&self, name: &str) -> CodecResult<&'a [Value]> {
        self.value(name)?
            .as_array()
            .ok_or_else(|| self.bad(name, "must be an array"))
    }

    pub(crate) fn bytes(&self, name: &str) -> CodecResult<&'a [u8]> {
        self.value(name)?
            .as_bytes()
            .ok_or_else(|| self.bad(name, "must be bytes"))
    }
}

/// Unsigned counter as a wire integer. Values past `i64::MAX` saturate.
pub(crate) fn uint(n: u64) -> Value {
    Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

pub(crate) fn rev_to_value(rev: &RevisionId) -> Value {
    Value::Text(rev.to_string())
}

pub(crate) fn rev_from_value(value: &Value) -> CodecResult<RevisionId> {
    let text = value
        .as_text()
        .ok_or_else(|| CodecError::invalid_structure("revision id must be text"))?;
    text.parse()
        .map_err(|_| CodecError::invalid_structure(format!("malformed revision id '{text}'")))
}

pub(crate) fn revs_to_value(revs: &[RevisionId]) -> Value {
    Value::Array(revs.iter().map(rev_to_value).collect())
}

pub(crate) fn revs_from_values(values: &[Value]) -> CodecResult<Vec<RevisionId>> {
    values.iter().map(rev_from_value).collect()
}

pub(crate) fn doc_ids_to_value(ids: &[DocumentId]) -> Value {
    Value::Array(ids.iter().map(|id| Value::from(id.as_str())).collect())
}

pub(crate) fn doc_ids_from_values(values: &[Value]) -> CodecResult<Vec<DocumentId>> {
    values
        .iter()
        .map(|v| {
            v.as_text()
                .map(DocumentId::new)
                .ok_or_else(|| CodecError::invalid_structure("document id must be text"))
        })
        .collect()
}

/// Revision node in the core value form.
pub(crate) fn node_to_value(node: &RevisionNode) -> Value {
    node.to_value()
}

pub(crate) fn node_from_value(value: &Value) -> CodecResult<RevisionNode> {
    RevisionNode::from_value(value).map_err(|e| CodecError::invalid_structure(e.to_string()))
}

/// Bundle: `{doc_id, revisions, blobs: [{name, digest, data}]}`.
pub(crate) fn bundle_to_value(bundle: &RevisionBundle) -> Value {
    Value::object([
        ("doc_id", Value::from(bundle.doc_id.as_str())),
        (
            "revisions",
            Value::Array(bundle.revisions.iter().map(node_to_value).collect()),
        ),
        (
            "blobs",
            Value::Array(
                bundle
                    .blobs
                    .iter()
                    .map(|b| {
                        Value::object([
                            ("name", Value::from(b.name.as_str())),
                            ("digest", Value::from(b.digest.as_str())),
                            ("data", Value::Bytes(b.data.clone())),
                        ])
                    })
                    .collect(),
            ),
        ),
    ])
}

pub(crate) fn bundle_from_value(value: &Value) -> CodecResult<RevisionBundle> {
    let f = Fields::of(value, "bundle")?;
    let revisions = f
        .array("revisions")?
        .iter()
        .map(node_from_value)
        .collect::<CodecResult<Vec<_>>>()?;
    let blobs = f
        .array("blobs")?
        .iter()
        .map(|b| {
            let b = Fields::of(b, "blob")?;
            Ok(BlobData {
                name: b.text("name")?.to_string(),
                digest: b.text("digest")?.to_string(),
                data: b.bytes("data")?.to_vec(),
            })
        })
        .collect::<CodecResult<Vec<_>>>()?;
    Ok(RevisionBundle {
        doc_id: DocumentId::new(f.text("doc_id")?),
        revisions,
        blobs,
    })
}

/// Map of document id to revision ids, as an object keyed by id.
pub(crate) fn rev_map_to_value(map: &BTreeMap<DocumentId, Vec<RevisionId>>) -> Value {
    Value::Object(
        map.iter()
            .map(|(id, revs)| (id.to_string(), revs_to_value(revs)))
            .collect(),
    )
}

pub(crate) fn rev_map_from_value(value: &Value) -> CodecResult<BTreeMap<DocumentId, Vec<RevisionId>>> {
    let map = value
        .as_object()
        .ok_or_else(|| CodecError::invalid_structure("revision map must be an object"))?;
    map.iter()
        .map(|(id, revs)| {
            let revs = revs
                .as_array()
                .ok_or_else(|| CodecError::invalid_structure("revision list must be an array"))?;
            Ok((DocumentId::new(id.as_str()), revs_from_values(revs)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::Attachment;

    #[test]
    fn node_survives_wire_form() {
        let mut attachments = BTreeMap::new();
        attachments.insert(
            "binary".to_string(),
            Attachment::new("application/octet-stream", vec![1, 2, 3]),
        );
        let root = RevisionNode::build(
            None,
            false,
            Value::object([("text", Value::from("hi")), ("ratio", Value::Float(0.5))]),
            &attachments,
        )
        .unwrap();
        let child = RevisionNode::build(Some(&root.rev), true, Value::empty_object(), &BTreeMap::new())
            .unwrap();
        for node in [root, child] {
            let back = node_from_value(&node_to_value(&node)).unwrap();
            assert!(back.verify().unwrap());
            assert_eq!(back, node);
        }
    }

    #[test]
    fn malformed_revision_rejected() {
        let mut value = node_to_value(
            &RevisionNode::build(None, false, Value::empty_object(), &BTreeMap::new()).unwrap(),
        );
        if let Value::Object(map) = &mut value {
            map.insert("rev".into(), Value::from("nonsense"));
        }
        assert!(node_from_value(&value).is_err());
    }

    #[test]
    fn fields_report_type_errors() {
        let value = Value::object([("n", Value::Integer(-1)), ("t", Value::Bool(true))]);
        let f = Fields::of(&value, "test").unwrap();
        assert!(f.u64("n").is_err());
        assert!(f.text("t").is_err());
        assert!(f.value("missing").is_err());
        assert_eq!(f.opt_text("missing").unwrap(), None);
        assert!(Fields::of(&Value::Null, "test").is_err());
        assert_eq!(uint(u64::MAX), Value::Integer(i64::MAX));
    }
}
