//! Attribute Values
//!
//! Open, dynamically-typed values stored in agent state, environment
//! parameters and history entries.
//!
//! Every value carries a type tag so that history can be flattened to plain
//! text and reloaded without losing its kind.
//!
//! # Example
//!
//! ```
//! use sim_history::Value;
//!
//! let v = Value::from(12);
//! assert_eq!(v.type_tag(), "int");
//! assert_eq!(Value::from_text("int", &v.to_text()).unwrap(), v);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A single attribute value.
///
/// Serializes untagged, so `{"id": 0, "skill_level": "God"}` maps naturally
/// onto a state mapping in both TOML and JSON. TOML has no null, so
/// [`Value::Null`] only survives JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    #[default]
    Null,
}

/// Error produced when a tagged text value cannot be decoded.
#[derive(Debug, Error, PartialEq)]
pub enum ValueParseError {
    #[error("unknown value type tag: {0}")]
    UnknownTag(String),
    #[error("cannot read {text:?} as {tag}")]
    Invalid { tag: String, text: String },
}

impl Value {
    /// Returns the semantic type tag used in flattened history rows.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Renders the value as plain text. Pair with [`Value::type_tag`] to
    /// decode it again via [`Value::from_text`].
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Map(_) => serde_json::to_string(self).unwrap_or_default(),
        }
    }

    /// Decodes a value from its text form and type tag.
    pub fn from_text(tag: &str, text: &str) -> Result<Self, ValueParseError> {
        let invalid = || ValueParseError::Invalid {
            tag: tag.to_string(),
            text: text.to_string(),
        };
        match tag {
            "null" => Ok(Value::Null),
            "bool" => text.parse().map(Value::Bool).map_err(|_| invalid()),
            "int" => text.parse().map(Value::Int).map_err(|_| invalid()),
            "float" => text.parse().map(Value::Float).map_err(|_| invalid()),
            "str" => Ok(Value::Str(text.to_string())),
            "list" => match serde_json::from_str(text) {
                Ok(list @ Value::List(_)) => Ok(list),
                _ => Err(invalid()),
            },
            "map" => match serde_json::from_str(text) {
                Ok(map @ Value::Map(_)) => Ok(map),
                _ => Err(invalid()),
            },
            other => Err(ValueParseError::UnknownTag(other.to_string())),
        }
    }

    /// Equality that treats NaN as equal to itself, so an unchanged NaN
    /// attribute is not seen as a change.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|((ka, va), (kb, vb))| ka == kb && va.same(vb))
            }
            _ => self == other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// True for values that are neither lists nor maps.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_) | Value::Map(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Str(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}
