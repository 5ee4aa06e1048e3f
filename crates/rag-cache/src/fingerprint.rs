//! Stable cache keys derived from serializable arguments.

use serde::Serialize;
use serde_json::{Map, Value};

use rag_core::Result;

/// Hash a canonical JSON encoding of `value` into a hex key.
///
/// Object keys are sorted before hashing, so maps hash the same regardless
/// of iteration order; arrays keep their order.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    let encoded = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(blake3::hash(&encoded).as_bytes()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> = map.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::new();
            for (key, field) in fields {
                sorted.insert(key, canonicalize(field));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
