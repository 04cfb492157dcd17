//! Tool input schema cleanup.
//!
//! Vendor function-calling APIs accept a narrow subset of JSON Schema, so
//! every schema is reduced before it is sent.

use serde_json::{Map, Value};

/// Keywords that vendors reject.
const STRIPPED_KEYS: &[&str] = &[
    "title",
    "$schema",
    "additionalProperties",
    "$id",
    "default",
    "examples",
];

const COMBINATORS: &[&str] = &["anyOf", "oneOf", "allOf"];

/// Return a vendor-safe copy of `schema`.
pub fn clean_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(clean_object(map)),
        other => other.clone(),
    }
}

fn clean_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = Map::with_capacity(map.len());

    for (key, value) in map {
        if STRIPPED_KEYS.contains(&key.as_str()) {
            continue;
        }

        let value = match (key.as_str(), value) {
            // Multiple types: keep the first
            ("type", Value::Array(types)) => match types.first() {
                Some(first) => first.clone(),
                None => continue,
            },
            ("properties", Value::Object(props)) => Value::Object(
                props
                    .iter()
                    .map(|(name, prop)| (name.clone(), clean_schema(prop)))
                    .collect(),
            ),
            ("items", Value::Object(_)) => clean_schema(value),
            (k, Value::Array(variants)) if COMBINATORS.contains(&k) => {
                Value::Array(variants.iter().map(clean_schema).collect())
            }
            _ => value.clone(),
        };
        cleaned.insert(key.clone(), value);
    }

    cleaned
}

/// Whether a cleaned object schema declares any properties.
pub(crate) fn has_properties(schema: &Value) -> bool {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|props| !props.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strips_unsupported_keywords() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "AddInput",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "a": {"type": "number", "title": "A", "default": 0},
                "b": {"type": ["number", "null"], "examples": [1, 2]}
            },
            "required": ["a", "b"]
        });

        assert_eq!(
            clean_schema(&schema),
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                },
                "required": ["a", "b"]
            })
        );
    }

    #[test]
    fn test_recurses_into_items_and_combinators() {
        let schema = json!({
            "type": "array",
            "items": {
                "$id": "item",
                "anyOf": [
                    {"type": "string", "title": "Name"},
                    {"type": "object", "properties": {"x": {"type": ["integer"], "default": 1}}}
                ]
            }
        });

        assert_eq!(
            clean_schema(&schema),
            json!({
                "type": "array",
                "items": {
                    "anyOf": [
                        {"type": "string"},
                        {"type": "object", "properties": {"x": {"type": "integer"}}}
                    ]
                }
            })
        );
    }

    #[test]
    fn test_property_named_like_a_keyword_survives() {
        let schema = json!({
            "type": "object",
            "properties": {"title": {"type": "string"}, "default": {"type": "boolean"}}
        });
        let cleaned = clean_schema(&schema);
        assert!(cleaned["properties"].get("title").is_some());
        assert!(cleaned["properties"].get("default").is_some());
        assert!(has_properties(&cleaned));
        assert!(!has_properties(&json!({"type": "object", "properties": {}})));
    }
}
