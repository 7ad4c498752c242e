//! Scalar values and their one-line storage encoding.
//!
//! Every column value travels through the change log as a single string: a
//! one-character type tag, a `:` separator and the literal payload.
//!
//! | Value | Encoding |
//! |-------|----------|
//! | null | `0:` |
//! | number | `N:42` |
//! | string | `S:hello` |
//! | boolean | `B:true` |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from encoding or decoding values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported value type: {0}")]
    UnsupportedValueType(String),

    #[error("Invalid encoding: {0:?}")]
    InvalidEncoding(String),
}

/// The scalar kinds a column can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Number,
    Text,
    Boolean,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Number => write!(f, "number"),
            ValueKind::Text => write!(f, "text"),
            ValueKind::Boolean => write!(f, "boolean"),
        }
    }
}

/// A column value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    /// Encode into the tagged storage form.
    ///
    /// Non-finite numbers have no stable textual form and are rejected.
    pub fn encode(&self) -> Result<String, CodecError> {
        match self {
            Value::Null => Ok("0:".to_string()),
            Value::Number(n) if !n.is_finite() => {
                Err(CodecError::UnsupportedValueType(format!("non-finite number {}", n)))
            }
            Value::Number(n) => Ok(format!("N:{}", n)),
            Value::Text(s) => Ok(format!("S:{}", s)),
            Value::Boolean(b) => Ok(format!("B:{}", b)),
        }
    }

    /// Decode the tagged storage form.
    pub fn decode(encoded: &str) -> Result<Value, CodecError> {
        let invalid = || CodecError::InvalidEncoding(encoded.to_string());
        let (tag, payload) = encoded.split_once(':').ok_or_else(invalid)?;

        match tag {
            "0" if payload.is_empty() => Ok(Value::Null),
            "N" => payload
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Value::Number)
                .ok_or_else(invalid),
            "S" => Ok(Value::Text(payload.to_string())),
            "B" => match payload {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }

    /// The kind of a non-null value.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Number(_) => Some(ValueKind::Number),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Boolean(_) => Some(ValueKind::Boolean),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = CodecError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(b)),
            serde_json::Value::String(s) => Ok(Value::Text(s)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| CodecError::UnsupportedValueType(format!("number {}", n))),
            serde_json::Value::Array(_) => Err(CodecError::UnsupportedValueType("array".into())),
            serde_json::Value::Object(_) => Err(CodecError::UnsupportedValueType("object".into())),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Boolean(b) => serde_json::Value::Bool(b),
        }
    }
}
