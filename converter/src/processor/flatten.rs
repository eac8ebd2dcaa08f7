use super::types::{FlatRecord, RecordKind};
use common::{Error, Result};
use serde_json::{Map, Value};

/// Parses raw bytes and flattens them as `kind`.
pub fn parse_and_flatten(kind: RecordKind, bytes: &[u8]) -> Result<FlatRecord> {
    let document: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::MalformedInput(format!("invalid JSON: {}", e)))?;
    flatten(kind, &document)
}

/// Flattens one JSON-API document (`{ data: {...}, included?: [...] }`).
///
/// Identity columns (`id`, `type`, `link`) are always present, null when
/// absent. Attributes are copied under their own names and replace an
/// identity column of the same name.
pub fn flatten(kind: RecordKind, document: &Value) -> Result<FlatRecord> {
    let data = document
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::MalformedInput("missing 'data' object".to_string()))?;

    let mut row = Map::new();
    row.insert("id".to_string(), field(data, "id"));
    row.insert("type".to_string(), field(data, "type"));
    row.insert(
        "link".to_string(),
        data.get("links")
            .and_then(|links| links.get("self"))
            .cloned()
            .unwrap_or(Value::Null),
    );

    if let Some(attributes) = data.get("attributes").and_then(Value::as_object) {
        for (name, value) in attributes {
            if !value.is_null() {
                row.insert(name.clone(), value.clone());
            }
        }
    }

    let relationships = data.get("relationships").and_then(Value::as_object);
    if let Some(relationships) = relationships {
        for (name, relationship) in relationships {
            if let Some(items) = relationship.get("data").and_then(Value::as_array) {
                row.insert(format!("{}_count", name), Value::from(items.len()));
            }
        }
    }

    if kind == RecordKind::Comment {
        let attachment_count = relationships
            .and_then(|r| r.get("attachments"))
            .and_then(|a| a.get("data"))
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        row.insert("has_attachments".to_string(), Value::from(attachment_count > 0));
        row.insert("attachment_count".to_string(), Value::from(attachment_count));

        let included_count = document
            .get("included")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        row.insert(
            "has_included_attachments".to_string(),
            Value::from(included_count > 0),
        );
        row.insert(
            "included_attachment_count".to_string(),
            Value::from(included_count),
        );
    }

    Ok(row)
}

fn field(data: &Map<String, Value>, name: &str) -> Value {
    data.get(name).cloned().unwrap_or(Value::Null)
}
