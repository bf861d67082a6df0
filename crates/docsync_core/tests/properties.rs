//! Property tests over the public datastore API.

use std::collections::BTreeMap;

use docsync_codec::Value;
use docsync_core::model::{AttributeDef, EntityDef};
use docsync_core::revision::select_winner;
use docsync_core::{
    AttrValue, Datastore, DatastoreConfig, ObjectInstance, ObjectModel, RevisionNode,
    SchemaDefinition,
};
use proptest::prelude::*;

fn model() -> ObjectModel {
    ObjectModel::load(
        &SchemaDefinition::new().entity(
            EntityDef::new("Entry")
                .attribute("text", "string")
                .attribute("bool", "boolean")
                .attribute("i16", "int16")
                .attribute("i32", "int32")
                .attribute("i64", "int64")
                .attribute("double", "double")
                .with_attribute(AttributeDef::new("binary", "binary")),
        ),
    )
    .unwrap()
}

fn tips(bodies: &[(i64, bool)]) -> Vec<RevisionNode> {
    bodies
        .iter()
        .map(|(n, deleted)| {
            RevisionNode::build(
                None,
                *deleted,
                Value::object([("n", Value::Integer(*n))]),
                &BTreeMap::new(),
            )
            .unwrap()
        })
        .collect()
}

proptest! {
    #[test]
    fn winner_ignores_tip_order(
        bodies in prop::collection::vec((any::<i64>(), any::<bool>()), 1..12),
        rotate in 0usize..12,
    ) {
        let nodes = tips(&bodies);
        let forward: Vec<&RevisionNode> = nodes.iter().collect();
        let mut shuffled = forward.clone();
        shuffled.reverse();
        let len = shuffled.len();
        shuffled.rotate_left(rotate % len);

        let a = select_winner(&forward).map(|n| n.rev.clone());
        let b = select_winner(&shuffled).map(|n| n.rev.clone());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn live_tip_beats_tombstone(n in any::<i64>(), m in any::<i64>()) {
        let nodes = tips(&[(n, true), (m, false)]);
        let refs: Vec<&RevisionNode> = nodes.iter().collect();
        let winner = select_winner(&refs).unwrap();
        prop_assert!(!winner.deleted);
    }

    #[test]
    fn scalars_round_trip(
        text in "[ -~]{0,32}",
        flag in any::<bool>(),
        small in any::<i16>(),
        mid in any::<i32>(),
        large in any::<i64>(),
        double in -1.0e12f64..1.0e12,
        binary in prop::collection::vec(any::<u8>(), 0..128),
    ) {
        let ds = Datastore::in_memory(model()).unwrap();
        let mut entry = ObjectInstance::new("Entry")
            .set("text", text)
            .set("bool", flag)
            .set("i16", small)
            .set("i32", mid)
            .set("i64", large)
            .set("double", double)
            .set("binary", binary);
        let id = ds.assign_identifier(&mut entry);
        ds.save_object(&mut entry, None).unwrap();
        prop_assert_eq!(ds.resolve(&id).unwrap(), entry);
    }

    #[test]
    fn stale_saves_never_overwrite(edits in 1usize..6) {
        let ds = Datastore::in_memory(model()).unwrap();
        let mut entry = ObjectInstance::new("Entry").set("i32", 0i32);
        let first = ds.save_object(&mut entry, None).unwrap();
        let mut current = first.clone();
        for i in 1..=edits {
            entry.insert("i32", i as i32);
            current = ds.save_object(&mut entry, Some(&current)).unwrap();
        }

        entry.insert("i32", -1i32);
        let err = ds.save_object(&mut entry, Some(&first)).unwrap_err();
        prop_assert!(err.is_revision_mismatch());
        let id = entry.id.clone().unwrap();
        prop_assert_eq!(ds.get(&id).unwrap().rev, Some(current));
    }
}

#[test]
fn nan_is_rejected() {
    let ds = Datastore::in_memory(model()).unwrap();
    let mut entry = ObjectInstance::new("Entry").set("double", f64::NAN);
    assert!(ds.save_object(&mut entry, None).is_err());
}

#[test]
fn saved_objects_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut entry = ObjectInstance::new("Entry")
        .set("text", "kept")
        .set("binary", vec![7u8; 32]);
    let rev = {
        let ds = Datastore::open(dir.path(), DatastoreConfig::new().name("disk"), model()).unwrap();
        ds.save_object(&mut entry, None).unwrap()
    };

    let ds = Datastore::open(dir.path(), DatastoreConfig::new().name("reopened"), model()).unwrap();
    let id = entry.id.clone().unwrap();
    let record = ds.get(&id).unwrap();
    assert_eq!(record.rev, Some(rev));
    assert!(record.attachments["binary"].is_stub());
    assert_eq!(ds.resolve(&id).unwrap(), entry);
    assert_eq!(
        ds.resolve(&id).unwrap().get("binary"),
        Some(&AttrValue::Binary(vec![7u8; 32]))
    );
}
