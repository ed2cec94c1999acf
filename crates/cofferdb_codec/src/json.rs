//! JSON interop.
//!
//! Extended types use single-key wrapper objects on the JSON side:
//! `{"$oid": "<hex>"}`, `{"$date": <millis>}` and `{"$binary": "<hex>"}`.

use crate::document::Document;
use crate::error::{CodecError, CodecResult};
use crate::object_id::ObjectId;
use crate::value::Value;
use serde_json::{Map, Number, Value as Json};

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Text(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => from_json_object(map),
        }
    }
}

fn from_json_object(map: Map<String, Json>) -> Value {
    if map.len() == 1 {
        if let Some(Json::String(hex)) = map.get("$oid") {
            if let Ok(id) = ObjectId::parse_hex(hex) {
                return Value::ObjectId(id);
            }
        }
        if let Some(ms) = map.get("$date").and_then(Json::as_i64) {
            return Value::Timestamp(ms);
        }
        if let Some(bytes) = map.get("$binary").and_then(Json::as_str).and_then(decode_hex) {
            return Value::Bytes(bytes);
        }
    }
    Value::Document(
        map.into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect(),
    )
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(input.get(i..i + 2)?, 16).ok())
        .collect()
}

impl Value {
    /// Renders this value as JSON.
    ///
    /// Non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Integer(n) => Json::Number((*n).into()),
            Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::Text(s) => Json::String(s.clone()),
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                single("$binary", Json::String(hex))
            }
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Document(doc) => doc.to_json(),
            Value::ObjectId(id) => single("$oid", Json::String(id.to_hex())),
            Value::Timestamp(ms) => single("$date", Json::Number((*ms).into())),
        }
    }
}

fn single(key: &str, value: Json) -> Json {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Json::Object(map)
}

impl Document {
    /// Builds a document from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not an object.
    pub fn from_json(json: Json) -> CodecResult<Self> {
        match Value::from(json) {
            Value::Document(doc) => Ok(doc),
            other => Err(CodecError::invalid_structure(format!(
                "expected JSON object, found {}",
                other.type_name()
            ))),
        }
    }

    /// Renders this document as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Json {
        Json::Object(
            self.iter()
                .map(|(k, v)| (k.to_string(), v.to_json()))
                .collect(),
        )
    }
}
