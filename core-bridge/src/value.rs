//! Native values exchanged with the content store.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Kinds a [`Value`] can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Text,
    Long,
    Int,
    Bool,
    Blob,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Text => "text",
            ValueKind::Long => "long",
            ValueKind::Int => "int",
            ValueKind::Bool => "bool",
            ValueKind::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// A single field value.
///
/// `Absent` is the host's null: a field that is not set. It is distinct
/// from `Text("")` and from `Long(0)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Long(i64),
    Int(i32),
    Bool(bool),
    Blob(Vec<u8>),
    Absent,
}

impl Value {
    /// `None` for `Absent`.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Text(_) => Some(ValueKind::Text),
            Value::Long(_) => Some(ValueKind::Long),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Blob(_) => Some(ValueKind::Blob),
            Value::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    fn kind_name(&self) -> String {
        self.kind()
            .map_or_else(|| "absent".to_string(), |kind| kind.to_string())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Absent, Into::into)
    }
}

/// Insertion-ordered field name to value mapping.
///
/// Used both for writes and for returned rows. Re-inserting an existing key
/// replaces the value but keeps the key's original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueMap(IndexMap<String, Value>);

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(IndexMap::with_capacity(capacity))
    }

    /// Chaining insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Text field. `Ok(None)` when missing or absent.
    pub fn get_text(&self, field: &str) -> Result<Option<&str>> {
        match self.0.get(field) {
            None | Some(Value::Absent) => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text)),
            Some(other) => Err(BridgeError::type_mismatch(ValueKind::Text, other.kind_name())),
        }
    }

    /// 64-bit integer field; 32-bit values widen.
    pub fn get_i64(&self, field: &str) -> Result<Option<i64>> {
        match self.0.get(field) {
            None | Some(Value::Absent) => Ok(None),
            Some(Value::Long(value)) => Ok(Some(*value)),
            Some(Value::Int(value)) => Ok(Some(i64::from(*value))),
            Some(other) => Err(BridgeError::type_mismatch(ValueKind::Long, other.kind_name())),
        }
    }

    /// 32-bit integer field; 64-bit values narrow only when they fit.
    pub fn get_i32(&self, field: &str) -> Result<Option<i32>> {
        match self.0.get(field) {
            None | Some(Value::Absent) => Ok(None),
            Some(Value::Int(value)) => Ok(Some(*value)),
            Some(Value::Long(value)) => i32::try_from(*value)
                .map(Some)
                .map_err(|_| BridgeError::type_mismatch(ValueKind::Int, format!("long {value}"))),
            Some(other) => Err(BridgeError::type_mismatch(ValueKind::Int, other.kind_name())),
        }
    }

    /// Boolean field; integer 0 and 1 are accepted.
    pub fn get_bool(&self, field: &str) -> Result<Option<bool>> {
        match self.0.get(field) {
            None | Some(Value::Absent) => Ok(None),
            Some(Value::Bool(value)) => Ok(Some(*value)),
            Some(Value::Long(0)) | Some(Value::Int(0)) => Ok(Some(false)),
            Some(Value::Long(1)) | Some(Value::Int(1)) => Ok(Some(true)),
            Some(other) => Err(BridgeError::type_mismatch(ValueKind::Bool, other.kind_name())),
        }
    }

    pub fn get_blob(&self, field: &str) -> Result<Option<&[u8]>> {
        match self.0.get(field) {
            None | Some(Value::Absent) => Ok(None),
            Some(Value::Blob(bytes)) => Ok(Some(bytes)),
            Some(other) => Err(BridgeError::type_mismatch(ValueKind::Blob, other.kind_name())),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ValueMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl IntoIterator for ValueMap {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
