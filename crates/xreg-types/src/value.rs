//! The property value sum type.
//!
//! Every property tree handled by xreg is made of [`Value`]s. Values are
//! produced once at the JSON boundary (see the `From<serde_json::Value>`
//! impl) and matched exhaustively from then on.
//!
//! Integers that fit in an `i64` are always represented as [`Value::Int`];
//! only unsigned values above `i64::MAX` use [`Value::UInt`]. Keeping a
//! single canonical form means two equal numbers always compare equal.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A property tree: attribute name to value, ordered by name.
pub type Object = BTreeMap<String, Value>;

/// A dynamically-typed property value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / explicit deletion marker.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(Object),
}

impl Value {
    /// An empty map value.
    pub fn empty_map() -> Self {
        Value::Map(Object::new())
    }

    /// An empty array value.
    pub fn empty_array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` for maps and arrays.
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Map(_) | Value::Array(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_) | Value::Float(_))
    }

    /// Short name of the variant, used in error details.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::UInt(_) => "integer",
            Value::Float(_) => "decimal",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral view of the value. Floats qualify only when they have no
    /// fractional part and fit in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Float(f) => float_to_i64(*f),
            _ => None,
        }
    }

    /// Non-negative integral view of the value.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(i) => u64::try_from(*i).ok(),
            Value::UInt(u) => Some(*u),
            Value::Float(f) if f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64 => {
                Some(*f as u64)
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Object> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Object> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Build an integer value in canonical form.
    pub fn from_u64(u: u64) -> Self {
        match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::UInt(u),
        }
    }

    /// Plain string rendering used when matching trigger values and in error
    /// details: strings are unquoted, composites render as JSON.
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Map(_) => serde_json::Value::from(self.clone()).to_string(),
        }
    }

    /// Copy of the value with every null map entry removed, recursively.
    ///
    /// Null array elements are kept; the schema engine rejects them before
    /// anything is persisted.
    pub fn strip_nulls(&self) -> Value {
        match self {
            Value::Map(m) => Value::Map(strip_object_nulls(m)),
            Value::Array(a) => Value::Array(a.iter().map(Value::strip_nulls).collect()),
            other => other.clone(),
        }
    }
}

/// Copy of `obj` without null entries, recursively.
pub fn strip_object_nulls(obj: &Object) -> Object {
    obj.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.strip_nulls()))
        .collect()
}

fn float_to_i64(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}

// ---------------------------------------------------------------------------
// JSON boundary
// ---------------------------------------------------------------------------

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(m) => {
                Value::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::UInt(u) => serde_json::Value::from(u),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(a) => {
                serde_json::Value::Array(a.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(m) => serde_json::Value::Object(
                m.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
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
        Value::Int(i64::from(i))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::from_u64(u)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Object> for Value {
    fn from(m: Object) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

/// Parse a JSON document into an [`Object`].
///
/// Returns `None` if the text is not valid JSON or is not a JSON object.
pub fn object_from_json(text: &str) -> Option<Object> {
    match Value::from(serde_json::from_str::<serde_json::Value>(text).ok()?) {
        Value::Map(m) => Some(m),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_integers_are_canonical() {
        assert_eq!(Value::from(json!(5)), Value::Int(5));
        assert_eq!(Value::from(json!(u64::MAX)), Value::UInt(u64::MAX));
        assert_eq!(Value::from(5u64), Value::Int(5));
    }

    #[test]
    fn json_roundtrip_preserves_structure() {
        let doc = json!({"a": [1, "two", {"three": true}], "b": null, "c": 1.5});
        let value = Value::from(doc.clone());
        assert_eq!(serde_json::Value::from(value), doc);
    }

    #[test]
    fn integral_float_views() {
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::Float(-1.0).as_u64(), None);
        assert_eq!(Value::Int(-1).as_u64(), None);
    }

    #[test]
    fn strip_nulls_removes_map_entries_recursively() {
        let value = Value::from(json!({"a": null, "b": {"c": null, "d": 1}}));
        assert_eq!(value.strip_nulls(), Value::from(json!({"b": {"d": 1}})));
    }

    #[test]
    fn plain_string_rendering() {
        assert_eq!(Value::from("x").to_plain_string(), "x");
        assert_eq!(Value::Bool(true).to_plain_string(), "true");
        assert_eq!(Value::Int(42).to_plain_string(), "42");
    }

    #[test]
    fn serde_untagged_roundtrip() {
        let value = Value::from(json!({"n": 1, "s": "x", "l": [true, null]}));
        let text = serde_json::to_string(&value).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn object_from_json_rejects_non_objects() {
        assert!(object_from_json("[1,2]").is_none());
        assert!(object_from_json("{").is_none());
        assert_eq!(object_from_json(r#"{"a":1}"#).unwrap()["a"], Value::Int(1));
    }
}
