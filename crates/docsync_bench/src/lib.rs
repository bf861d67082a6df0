//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;

use docsync_codec::Value;
use docsync_core::{ObjectInstance, RevisionNode};
use rand::Rng;

/// Random bytes of the given size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// A nested object body `depth` levels deep with `width` keys per level.
pub fn nested_body(depth: usize, width: usize) -> Value {
    if depth == 0 {
        return Value::Text("leaf".into());
    }
    Value::Object(
        (0..width)
            .map(|i| (format!("key_{i}"), nested_body(depth - 1, width)))
            .collect(),
    )
}

/// A fixture `Entry` with every scalar attribute set and a binary payload
/// of `binary_size` bytes.
pub fn full_entry(binary_size: usize) -> ObjectInstance {
    let mut rng = rand::thread_rng();
    ObjectInstance::new("Entry")
        .set("text", "benchmark entry")
        .set("bool", true)
        .set("i16", rng.gen::<i16>())
        .set("i32", rng.gen::<i32>())
        .set("i64", rng.gen::<i64>())
        .set("float", 1.5f32)
        .set("double", rng.gen_range(-1.0e6f64..1.0e6))
        .set("binary", random_data(binary_size))
}

/// `count` sibling root revisions, as a replica accumulating concurrent
/// edits would hold them.
pub fn sibling_tips(count: usize) -> Vec<RevisionNode> {
    (0..count)
        .filter_map(|i| {
            let body = Value::object([("n", Value::Integer(i as i64))]);
            RevisionNode::build(None, i % 7 == 0, body, &BTreeMap::new()).ok()
        })
        .collect()
}
