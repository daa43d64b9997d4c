use vtt_types::Value;

use crate::record::{EntityKind, EntityRecord};

/// Top-level state collections that are mirrored as entity rows.
pub const ENTITY_COLLECTIONS: [(&str, EntityKind); 2] =
    [("actors", EntityKind::Actor), ("items", EntityKind::Item)];

/// Explode the entity collections of `state` into rows.
///
/// A collection may be a map keyed by id or an array of maps carrying an
/// `id` field. Array elements without a usable id are not mirrored.
pub fn extract_entities(state: &Value) -> Vec<EntityRecord> {
    let mut rows = Vec::new();
    for (field, kind) in ENTITY_COLLECTIONS {
        match state.get(field) {
            Some(Value::Map(map)) => {
                rows.extend(map.iter().map(|(id, body)| EntityRecord {
                    kind,
                    id: id.clone(),
                    body: body.clone(),
                }));
            }
            Some(Value::Array(items)) => {
                rows.extend(items.iter().filter_map(|body| {
                    entity_id(body).map(|id| EntityRecord {
                        kind,
                        id,
                        body: body.clone(),
                    })
                }));
            }
            _ => {}
        }
    }
    rows
}

fn entity_id(body: &Value) -> Option<String> {
    match body.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Int(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_and_array_collections_are_exploded() {
        let state = Value::from(json!({
            "actors": {"a1": {"name": "Orc", "hp": 7}, "a2": {"name": "Elf"}},
            "items": [{"id": "i1", "name": "Rope"}, {"id": 2, "name": "Torch"}, {"name": "nameless"}],
            "currentEncounter": {"tokens": [{"id": "t1"}]}
        }));
        let rows = extract_entities(&state);
        let keys: Vec<_> = rows.iter().map(|r| (r.kind, r.id.as_str())).collect();
        assert_eq!(
            keys,
            vec![
                (EntityKind::Actor, "a1"),
                (EntityKind::Actor, "a2"),
                (EntityKind::Item, "i1"),
                (EntityKind::Item, "2"),
            ]
        );
        assert_eq!(rows[0].body, Value::from(json!({"name": "Orc", "hp": 7})));
    }

    #[test]
    fn missing_or_scalar_collections_yield_nothing() {
        assert!(extract_entities(&Value::empty_map()).is_empty());
        assert!(extract_entities(&Value::from(json!({"actors": 3, "items": null}))).is_empty());
    }
}
