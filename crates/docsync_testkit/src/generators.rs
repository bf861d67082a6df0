//! Property-based test generators using proptest.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use docsync_codec::Value;
use docsync_core::{DocumentId, ObjectInstance, RevisionId};
use proptest::prelude::*;

/// Strategy for document identifiers.
pub fn document_id_strategy() -> impl Strategy<Value = DocumentId> {
    "[a-z0-9]{8,32}".prop_map(DocumentId::new)
}

/// Strategy for well-formed revision identifiers.
pub fn revision_id_strategy() -> impl Strategy<Value = RevisionId> {
    (1u64..64, "[0-9a-f]{64}").prop_map(|(generation, digest)| RevisionId::new(generation, digest))
}

/// Strategy for JSON-compatible values: no byte strings, finite floats.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[ -~]{0,16}".prop_map(Value::Text),
    ];
    leaf.prop_recursive(3, 24, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::btree_map("[a-z][a-zA-Z0-9]{0,7}", inner, 0..5)
                .prop_map(Value::Object),
        ]
    })
}

/// Strategy for a document body: an object without reserved keys.
pub fn body_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z][a-zA-Z0-9]{0,7}", json_value_strategy(), 0..6)
        .prop_map(|map: BTreeMap<String, Value>| Value::Object(map))
}

/// Strategy for fixture `Entry` instances with random scalar attributes.
///
/// Every attribute is independently present or nil.
pub fn entry_strategy() -> impl Strategy<Value = ObjectInstance> {
    (
        prop::option::of("[ -~]{0,24}"),
        prop::option::of(any::<bool>()),
        prop::option::of(any::<i16>()),
        prop::option::of(any::<i32>()),
        prop::option::of(any::<i64>()),
        prop::option::of(-1.0e6f64..1.0e6),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
        prop::option::of(date_strategy()),
    )
        .prop_map(|(text, flag, i16v, i32v, i64v, double, binary, date)| {
            let mut entry = ObjectInstance::new("Entry");
            if let Some(v) = text {
                entry.insert("text", v);
            }
            if let Some(v) = flag {
                entry.insert("bool", v);
            }
            if let Some(v) = i16v {
                entry.insert("i16", v);
            }
            if let Some(v) = i32v {
                entry.insert("i32", v);
            }
            if let Some(v) = i64v {
                entry.insert("i64", v);
            }
            if let Some(v) = double {
                entry.insert("double", v);
            }
            if let Some(v) = binary {
                entry.insert("binary", v);
            }
            if let Some(v) = date {
                entry.insert("date", v);
            }
            entry
        })
}

/// Strategy for whole-second UTC timestamps between 1970 and 2100.
pub fn date_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800).prop_filter_map("valid timestamp", |secs| {
        Utc.timestamp_opt(secs, 0).single()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn bodies_are_objects() {
        let mut runner = TestRunner::default();
        for _ in 0..32 {
            let body = body_strategy().new_tree(&mut runner).unwrap().current();
            assert!(body.as_object().is_some());
        }
    }

    #[test]
    fn entries_use_fixture_entity() {
        let mut runner = TestRunner::default();
        let entry = entry_strategy().new_tree(&mut runner).unwrap().current();
        assert_eq!(entry.entity, "Entry");
        assert!(entry.id.is_none());
    }
}
