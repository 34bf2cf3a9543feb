//! Property-based test generators using proptest.
//!
//! Provides strategies for ids, documents, patches and device workloads
//! that respect the data model's invariants.

use cloudsync_protocol::{Document, EntityChange, EntityId, Patch, Value, ID_FIELD};
use proptest::prelude::*;

/// Strategy for generating valid collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating valid entity id values.
pub fn id_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..64).prop_map(Value::Int),
        "[a-z0-9]{1,8}".prop_map(Value::Text),
        any::<[u8; 16]>().prop_map(|bytes| Value::Guid(uuid::Uuid::from_bytes(bytes))),
    ]
}

/// Strategy for generating scalar field values.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e6f64..1.0e6).prop_map(Value::Double),
        "[ -~]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

/// Strategy for generating a document with the given id.
pub fn document_strategy(id: Value) -> impl Strategy<Value = Document> {
    prop::collection::vec(("[a-z]{1,6}", field_value_strategy()), 0..4).prop_map(move |fields| {
        let mut document = Document::new().with(ID_FIELD, id.clone());
        for (key, value) in fields {
            if key != ID_FIELD {
                document.insert(key, value);
            }
        }
        document
    })
}

/// Strategy for generating entity ids in a small set of collections, so
/// independently generated patches overlap.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    (
        prop::sample::select(vec!["Notes", "notes", "Tasks"]),
        (0i64..8).prop_map(Value::Int),
    )
        .prop_map(|(collection, id)| EntityId::new(collection, id).expect("Invalid entity id"))
}

/// Strategy for generating a single change.
pub fn change_strategy() -> impl Strategy<Value = EntityChange> {
    (entity_id_strategy(), any::<bool>()).prop_flat_map(|(id, delete)| {
        if delete {
            Just(EntityChange::delete(id)).boxed()
        } else {
            document_strategy(id.id().clone())
                .prop_map(move |document| EntityChange::upsert(id.clone(), document))
                .boxed()
        }
    })
}

/// Strategy for generating a patch. Later duplicates are dropped.
pub fn patch_strategy() -> impl Strategy<Value = Patch> {
    prop::collection::vec(change_strategy(), 0..12).prop_map(|changes| {
        let mut patch = Patch::new();
        for change in changes {
            if !patch.contains(change.id()) {
                patch.insert(change).expect("Duplicate change");
            }
        }
        patch
    })
}

/// One local operation in a device workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    /// Write note `id` on `device`.
    Write {
        /// Device index.
        device: usize,
        /// Note id.
        id: i64,
        /// Note text.
        text: String,
    },
    /// Delete note `id` on `device`.
    Delete {
        /// Device index.
        device: usize,
        /// Note id.
        id: i64,
    },
    /// Run a sync cycle on `device`.
    Sync {
        /// Device index.
        device: usize,
    },
}

/// Strategy for generating a workload over `devices` devices.
pub fn workload_strategy(devices: usize, max_ops: usize) -> impl Strategy<Value = Vec<DeviceOp>> {
    let op = prop_oneof![
        3 => (0..devices, 0i64..6, "[a-z]{1,4}")
            .prop_map(|(device, id, text)| DeviceOp::Write { device, id, text }),
        1 => (0..devices, 0i64..6).prop_map(|(device, id)| DeviceOp::Delete { device, id }),
        2 => (0..devices).prop_map(|device| DeviceOp::Sync { device }),
    ];
    prop::collection::vec(op, 0..max_ops)
}
