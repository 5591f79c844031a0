use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A stored value together with the tag needed to rebuild its shape.
///
/// Values are persisted as an adjacently tagged envelope:
///
/// ```text
/// {"type": "string", "value": "db1"}
/// {"type": "typed", "value": {"type_name": "flow.Trigger", "payload": {...}}}
/// ```
///
/// Namespaces hold heterogeneous values, so the tag travels with every entry
/// instead of being implied by a schema. Application types that do not map
/// onto a primitive variant go through [`Value::typed`], which records the
/// caller's type name next to the serde payload.
///
/// Floats must be finite; JSON has no encoding for NaN or infinities.
/// [`Value::validate`] enforces this and the stores call it before writing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Typed {
        type_name: String,
        payload: serde_json::Value,
    },
}

impl Value {
    /// Wrap an application value under an explicit type name.
    pub fn typed<T: Serialize>(type_name: impl Into<String>, value: &T) -> Result<Self, TypeError> {
        let payload =
            serde_json::to_value(value).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Ok(Self::Typed {
            type_name: type_name.into(),
            payload,
        })
    }

    /// Rebuild an application value previously stored with [`Value::typed`].
    ///
    /// Fails with [`TypeError::TypeMismatch`] if the envelope carries a
    /// different type name or is not a typed envelope at all.
    pub fn decode_typed<T: DeserializeOwned>(&self, type_name: &str) -> Result<T, TypeError> {
        match self {
            Self::Typed {
                type_name: stored,
                payload,
            } if stored == type_name => serde_json::from_value(payload.clone())
                .map_err(|e| TypeError::Serialization(e.to_string())),
            Self::Typed {
                type_name: stored, ..
            } => Err(TypeError::TypeMismatch {
                expected: type_name.to_string(),
                found: stored.clone(),
            }),
            other => Err(TypeError::TypeMismatch {
                expected: type_name.to_string(),
                found: other.type_tag().to_string(),
            }),
        }
    }

    /// Check that the value survives a write and a read unchanged.
    ///
    /// Rejects NaN and infinite floats anywhere in the value, including
    /// inside lists and maps. `serde_json` would write them as `null`, which
    /// then fails to decode as a float and poisons the whole document.
    pub fn validate(&self) -> Result<(), TypeError> {
        match self {
            Self::Float(f) if !f.is_finite() => Err(TypeError::InvalidValue {
                reason: format!("float {f} has no JSON encoding"),
            }),
            Self::List(items) => items.iter().try_for_each(Self::validate),
            Self::Map(entries) => entries.values().try_for_each(Self::validate),
            _ => Ok(()),
        }
    }

    /// The envelope tag as written to disk.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Typed { .. } => "typed",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Parse a value from a command-line style literal.
    ///
    /// `null`, `true`/`false`, integers and floats map to their variants;
    /// anything else is a string. Used by the CLI's `kv put`.
    pub fn parse_literal(literal: &str) -> Self {
        match literal {
            "null" => Self::Null,
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => {
                if let Ok(n) = literal.parse::<i64>() {
                    Self::Int(n)
                } else if let Some(f) = literal.parse::<f64>().ok().filter(|f| f.is_finite()) {
                    Self::Float(f)
                } else {
                    Self::String(literal.to_string())
                }
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
