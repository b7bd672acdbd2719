//! Conversion between in-memory values and the wire JSON format.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CouchError, Result};

/// Serialize a value to the bytes sent as a request body.
pub fn to_body<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CouchError::SerializationError(e.to_string()))
}

pub fn to_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CouchError::SerializationError(e.to_string()))
}

/// Decode a response body. An empty body decodes as an empty object.
pub fn from_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return from_value(Value::Object(Map::new()));
    }
    serde_json::from_slice(bytes).map_err(|e| CouchError::DeserializationError(e.to_string()))
}

pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| CouchError::DeserializationError(e.to_string()))
}

/// Borrow `value` as a JSON object or fail with a validation error naming `what`.
pub fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| CouchError::Validation(format!("{what} must be a JSON object")))
}
