//! Conversion between BSON documents and the Data API's JSON wire format.
//!
//! The API speaks plain JSON with a few extended markers: date-times travel
//! as `{"$date": <epoch millis>}`, object ids as `{"$objectId": "<hex>"}` and
//! UUIDs as `{"$uuid": "<hyphenated>"}`.

use crate::error::{DataApiError, Result};
use bson::{oid::ObjectId, spec::BinarySubtype, Binary, Bson, Document, Uuid};
use serde_json::Value as JsonValue;

/// Convert a BSON document to JSON.
pub fn document_to_json(doc: &Document) -> Result<JsonValue> {
    let mut map = serde_json::Map::new();
    for (k, v) in doc {
        map.insert(k.clone(), bson_to_json(v)?);
    }
    Ok(JsonValue::Object(map))
}

/// Convert a BSON value to JSON.
pub fn bson_to_json(bson: &Bson) -> Result<JsonValue> {
    match bson {
        Bson::Double(v) => serde_json::Number::from_f64(*v)
            .map(JsonValue::Number)
            .ok_or_else(|| DataApiError::Serialization(format!("non-finite number {v}"))),
        Bson::String(v) => Ok(JsonValue::String(v.clone())),
        Bson::Array(arr) => {
            let items: Vec<JsonValue> = arr.iter().map(bson_to_json).collect::<Result<_>>()?;
            Ok(JsonValue::Array(items))
        }
        Bson::Document(doc) => document_to_json(doc),
        Bson::Boolean(v) => Ok(JsonValue::Bool(*v)),
        Bson::Null => Ok(JsonValue::Null),
        Bson::Int32(v) => Ok(serde_json::json!(*v)),
        Bson::Int64(v) => Ok(serde_json::json!(*v)),
        Bson::ObjectId(oid) => Ok(serde_json::json!({ "$objectId": oid.to_hex() })),
        Bson::DateTime(dt) => Ok(serde_json::json!({ "$date": dt.timestamp_millis() })),
        Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes,
        }) => {
            let bytes: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                DataApiError::Serialization(format!("uuid must be 16 bytes, got {}", bytes.len()))
            })?;
            Ok(serde_json::json!({ "$uuid": Uuid::from_bytes(bytes).to_string() }))
        }
        other => Err(DataApiError::Serialization(format!(
            "unsupported value type {:?}",
            other.element_type()
        ))),
    }
}

/// Convert JSON to BSON.
pub fn json_to_bson(json: &JsonValue) -> Bson {
    match json {
        JsonValue::Null => Bson::Null,
        JsonValue::Bool(v) => Bson::Boolean(*v),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else if let Some(f) = n.as_f64() {
                Bson::Double(f)
            } else {
                Bson::Null
            }
        }
        JsonValue::String(s) => Bson::String(s.clone()),
        JsonValue::Array(arr) => Bson::Array(arr.iter().map(json_to_bson).collect()),
        JsonValue::Object(obj) => {
            if obj.len() == 1 {
                if let Some(date) = obj.get("$date").and_then(|v| v.as_i64()) {
                    return Bson::DateTime(bson::DateTime::from_millis(date));
                }
                let oid = obj
                    .get("$objectId")
                    .or_else(|| obj.get("$oid"))
                    .and_then(|v| v.as_str())
                    .and_then(|s| ObjectId::parse_str(s).ok());
                if let Some(oid) = oid {
                    return Bson::ObjectId(oid);
                }
                let uuid = obj
                    .get("$uuid")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok());
                if let Some(uuid) = uuid {
                    return Bson::Binary(Binary {
                        subtype: BinarySubtype::Uuid,
                        bytes: uuid.bytes().to_vec(),
                    });
                }
            }

            let mut doc = Document::new();
            for (k, v) in obj {
                doc.insert(k.clone(), json_to_bson(v));
            }
            Bson::Document(doc)
        }
    }
}

/// Convert JSON to a BSON document.
pub fn json_to_document(json: &JsonValue) -> Result<Document> {
    match json_to_bson(json) {
        Bson::Document(doc) => Ok(doc),
        _ => Err(DataApiError::Deserialization("expected document".to_string())),
    }
}

/// Convert a similarity vector to its JSON array.
pub(crate) fn vector_to_json(vector: &[f64]) -> Result<JsonValue> {
    vector
        .iter()
        .map(|v| {
            serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .ok_or_else(|| DataApiError::invalid_argument("vector components must be finite"))
        })
        .collect::<Result<Vec<_>>>()
        .map(JsonValue::Array)
}
