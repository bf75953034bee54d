//! Lenient decoding of `{ "models": [...] }` responses.

use llamatray_core::{ModelRecord, SizeValue};
use serde_json::Value;
use tracing::debug;

/// Extract model records from a response body.
///
/// A null body, a missing or non-array `models` field, and records without a
/// name all decode to nothing rather than failing the fetch.
pub fn decode_models(body: Option<&Value>) -> Vec<ModelRecord> {
    let Some(models) = body.and_then(|b| b.get("models")).and_then(Value::as_array) else {
        return Vec::new();
    };
    models.iter().filter_map(decode_record).collect()
}

fn decode_record(value: &Value) -> Option<ModelRecord> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .or_else(|| value.get("model").and_then(Value::as_str))
        .filter(|n| !n.is_empty());

    let Some(name) = name else {
        debug!("Skipping model record without a name");
        return None;
    };

    Some(ModelRecord {
        name: name.to_string(),
        size: value.get("size").and_then(SizeValue::from_json),
        size_vram: value.get("size_vram").and_then(SizeValue::from_json),
    })
}
