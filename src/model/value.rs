// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Core value type for query expressions and sequence elements

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::ordered_map::OrderedMap;
use crate::error::{QueryError, Result};

/// A key/value pair flowing through a sequence
pub type Entry = (Value, Value);

/// Host value produced by expressions and carried by sequences
///
/// Equality is strict and structural: `Int(1)` and `Float(1.0)` are different
/// values, floats are compared by their (sign-normalized) bit pattern, and
/// arrays are equal when their entries are equal in order.
#[derive(Clone, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit signed)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(Arc<str>),
    /// Ordered key/value array
    Array(Arc<OrderedMap>),
    /// Instance of a named class with properties
    Object(Arc<Object>),
}

/// An object value: a class name plus ordered properties
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Object {
    /// Class name
    pub class: String,
    /// Property table
    pub properties: OrderedMap,
}

impl Value {
    /// Create a string value
    pub fn string(value: impl AsRef<str>) -> Self {
        Self::String(Arc::from(value.as_ref()))
    }

    /// Create an array value from a map
    pub fn array(map: OrderedMap) -> Self {
        Self::Array(Arc::new(map))
    }

    /// Create a list-like array keyed 0..n
    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Self::array(OrderedMap::from_values(values))
    }

    /// Create an object value
    pub fn object(class: impl Into<String>, properties: OrderedMap) -> Self {
        Self::Object(Arc::new(Object {
            class: class.into(),
            properties,
        }))
    }

    /// Get the type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Check if this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the integer if this is an integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the string slice if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the boolean if this is a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the map if this is an array value
    pub fn as_array(&self) -> Option<&OrderedMap> {
        match self {
            Self::Array(map) => Some(map),
            _ => None,
        }
    }

    /// Get the entries of an enumerable value (arrays and object properties)
    pub fn as_entries(&self) -> Option<&OrderedMap> {
        match self {
            Self::Array(map) => Some(map),
            Self::Object(object) => Some(&object.properties),
            _ => None,
        }
    }

    /// Host truthiness: null, false, 0, 0.0, "", "0" and empty arrays are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !(s.is_empty() || &**s == "0"),
            Self::Array(map) => !map.is_empty(),
            Self::Object(_) => true,
        }
    }

    /// Check whether the value may be used as an equality key
    ///
    /// NaN never equals itself, so any key containing one is rejected.
    pub fn ensure_hashable(&self, operation: &str) -> Result<()> {
        match self {
            Self::Float(f) if f.is_nan() => {
                Err(QueryError::incomparable_key(operation, self.describe()))
            }
            Self::Array(map) => map.iter().try_for_each(|(key, value)| {
                key.ensure_hashable(operation)?;
                value.ensure_hashable(operation)
            }),
            Self::Object(object) => object
                .properties
                .iter()
                .try_for_each(|(_, value)| value.ensure_hashable(operation)),
            _ => Ok(()),
        }
    }

    /// Compare two values for ordering
    ///
    /// Nulls sort first, numbers compare across integer/float, strings and
    /// booleans compare within their type and arrays compare element-wise.
    /// Every other pairing is incomparable.
    pub fn compare(&self, other: &Value, operation: &str) -> Result<Ordering> {
        let incomparable =
            || QueryError::incomparable(operation, self.describe(), other.describe());

        match (self, other) {
            (Self::Null, Self::Null) => Ok(Ordering::Equal),
            (Self::Null, _) => Ok(Ordering::Less),
            (_, Self::Null) => Ok(Ordering::Greater),
            (Self::Bool(a), Self::Bool(b)) => Ok(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Ok(a.cmp(b)),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b).ok_or_else(incomparable),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)).ok_or_else(incomparable),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b).ok_or_else(incomparable),
            (Self::String(a), Self::String(b)) => Ok(a.cmp(b)),
            (Self::Array(a), Self::Array(b)) => {
                for ((_, left), (_, right)) in a.iter().zip(b.iter()) {
                    match left.compare(right, operation)? {
                        Ordering::Equal => continue,
                        unequal => return Ok(unequal),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(incomparable()),
        }
    }

    /// Literal-style description used in diagnostics and compiled source text
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.write_literal(&mut out);
        out
    }

    fn write_literal(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(true) => out.push_str("true"),
            Self::Bool(false) => out.push_str("false"),
            Self::Int(i) => out.push_str(&i.to_string()),
            Self::Float(f) => out.push_str(&format_float_literal(*f)),
            Self::String(s) => {
                out.push('\'');
                for ch in s.chars() {
                    if ch == '\'' || ch == '\\' {
                        out.push('\\');
                    }
                    out.push(ch);
                }
                out.push('\'');
            }
            Self::Array(map) => write_map_literal(map, out),
            Self::Object(object) => {
                if object.class == "stdClass" {
                    out.push_str("(object)");
                } else {
                    out.push_str(&object.class);
                    out.push_str("::__set_state(");
                }
                write_map_literal(&object.properties, out);
                if object.class != "stdClass" {
                    out.push(')');
                }
            }
        }
    }
}

fn write_map_literal(map: &OrderedMap, out: &mut String) {
    out.push('[');
    let list = map.is_list();
    for (position, (key, value)) in map.iter().enumerate() {
        if position > 0 {
            out.push_str(", ");
        }
        if !list {
            key.write_literal(out);
            out.push_str(" => ");
        }
        value.write_literal(out);
    }
    out.push(']');
}

fn format_float_literal(f: f64) -> String {
    if f.is_nan() {
        "NAN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "INF" } else { "-INF" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn float_bits(f: f64) -> u64 {
    if f == 0.0 {
        0
    } else if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        f.to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => float_bits(*a) == float_bits(*b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b) || a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => float_bits(*f).hash(state),
            Self::String(s) => s.hash(state),
            Self::Array(map) => map.hash(state),
            Self::Object(object) => object.hash(state),
        }
    }
}

/// String conversion following the host rules
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null | Self::Bool(false) => Ok(()),
            Self::Bool(true) => write!(f, "1"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) if x.is_nan() => write!(f, "NAN"),
            Self::Float(x) if x.is_infinite() => {
                write!(f, "{}", if *x > 0.0 { "INF" } else { "-INF" })
            }
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Array(_) => write!(f, "Array"),
            Self::Object(object) => write!(f, "{}", object.class),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        i64::try_from(value).map_or(Self::Float(value as f64), Self::Int)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<OrderedMap> for Value {
    fn from(map: OrderedMap) -> Self {
        Self::array(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::from(s),
            serde_json::Value::Array(items) => Self::list(items.into_iter().map(Value::from)),
            serde_json::Value::Object(fields) => Self::array(OrderedMap::from_entries(
                fields
                    .into_iter()
                    .map(|(key, value)| (Value::from(key), Value::from(value))),
            )),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(map) => map_to_json(map),
            Value::Object(object) => map_to_json(&object.properties),
        }
    }
}

fn map_to_json(map: &OrderedMap) -> serde_json::Value {
    if map.is_list() {
        serde_json::Value::Array(map.values().map(serde_json::Value::from).collect())
    } else {
        serde_json::Value::Object(
            map.iter()
                .map(|(key, value)| (key.to_string(), serde_json::Value::from(value)))
                .collect(),
        )
    }
}
