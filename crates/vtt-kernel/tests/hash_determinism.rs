use indexmap::IndexMap;
use proptest::prelude::*;
use vtt_kernel::{EngineError, Limits, StateStore, canonical_hash};
use vtt_types::{Path, StateOperation, Value, Version};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e6f64..1.0e6).prop_map(|f| Value::number(f).unwrap()),
        (-1000i64..1000).prop_map(|i| Value::number(i as f64).unwrap()),
        "[a-z]{0,6}".prop_map(Value::String),
    ]
}

fn tree() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(4, 32, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            proptest::collection::vec(("[a-z]{1,4}", inner), 0..5).prop_map(|entries| {
                Value::Map(entries.into_iter().collect::<IndexMap<_, _>>())
            }),
        ]
    })
}

/// Rebuild every map with its entries in reverse insertion order.
fn reversed(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(reversed).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .rev()
                .map(|(k, v)| (k.clone(), reversed(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// `len` successful operations with one that fails at `fail_at`.
fn batch(len: usize, fail_at: usize) -> Vec<StateOperation> {
    (0..len)
        .map(|i| match (i == fail_at, i % 2) {
            (true, _) => StateOperation::inc(Path::new(["missing"]), 1i64),
            (false, 0) => StateOperation::set(Path::new(["round"]), i as i64),
            (false, _) => StateOperation::push(Path::new(["log"]), i as i64),
        })
        .collect()
}

proptest! {
    #[test]
    fn digest_ignores_map_insertion_order(value in tree()) {
        let permuted = reversed(&value);
        prop_assert_eq!(&permuted, &value);
        prop_assert_eq!(canonical_hash(&permuted).unwrap(), canonical_hash(&value).unwrap());
    }

    #[test]
    fn digest_survives_json_transport(value in tree()) {
        let json = serde_json::Value::from(&value);
        let back = Value::from(json);
        prop_assert_eq!(&back, &value);
        prop_assert_eq!(canonical_hash(&back).unwrap(), canonical_hash(&value).unwrap());
    }

    #[test]
    fn integral_floats_hash_like_ints(i in -(1i64 << 52)..(1i64 << 52)) {
        let collapsed = Value::number(i as f64).unwrap();
        prop_assert_eq!(&collapsed, &Value::Int(i));
        prop_assert_eq!(canonical_hash(&collapsed).unwrap(), canonical_hash(&Value::Int(i)).unwrap());
    }

    #[test]
    fn failing_operation_anywhere_rolls_back_the_batch(
        (len, fail_at) in (1usize..10).prop_flat_map(|len| (Just(len), 0..len))
    ) {
        let mut store = StateStore::new(Value::from(serde_json::json!({"round": 0}))).unwrap();
        let before = (store.state().clone(), store.version(), store.hash());

        let err = store
            .apply_batch(Version::ZERO, &batch(len, fail_at), &Limits::default())
            .unwrap_err();
        prop_assert!(
            matches!(err, EngineError::InvalidOperation { index, .. } if index == fail_at),
            "unexpected error {:?}",
            err
        );
        prop_assert_eq!(store.state(), &before.0);
        prop_assert_eq!(store.version(), before.1);
        prop_assert_eq!(store.hash(), before.2);
    }
}
