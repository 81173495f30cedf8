//! Core document types for docsdb.
//!
//! A `Document` is a stored record with a unique string id and arbitrary
//! key-value fields. `FieldValue` is the closed set of value shapes a field
//! can take; nested arrays and objects compare structurally, which is what
//! field-match queries rely on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A typed field value attached to a document.
///
/// Fields are opaque to the store beyond equality: queries compare them
/// structurally and updates overwrite them wholesale. Nested values nest
/// `FieldValue` itself, so deep equality falls out of the derived
/// `PartialEq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Explicit null.
    Null,
    /// Boolean value (`true` / `false`).
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    Array(Vec<FieldValue>),
    /// Nested field map.
    Object(HashMap<String, FieldValue>),
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Integer(i)
                } else {
                    FieldValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => FieldValue::String(s),
            serde_json::Value::Array(items) => {
                FieldValue::Array(items.into_iter().map(FieldValue::from).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

/// Convert a JSON object into a field map.
///
/// Non-object values produce an empty map; documents are always maps of
/// named fields.
pub fn fields_from_json(value: serde_json::Value) -> HashMap<String, FieldValue> {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, FieldValue::from(v)))
            .collect(),
        _ => HashMap::new(),
    }
}

/// A stored document: unique id plus named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier within the owning collection.
    pub id: String,
    /// Named field values, opaque to the store.
    pub fields: HashMap<String, FieldValue>,
}

impl Document {
    /// Creates a document with a store-generated id (random 128-bit token,
    /// hex-encoded).
    pub fn new(fields: HashMap<String, FieldValue>) -> Self {
        Self {
            id: generate_id(),
            fields,
        }
    }

    /// Creates a document with a caller-supplied id.
    pub fn with_id(id: impl Into<String>, fields: HashMap<String, FieldValue>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
