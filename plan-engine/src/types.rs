// Runtime Values and Types
// Dynamic values passed between steps and the declared types that check them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Runtime value produced by a step output or supplied through configuration.
///
/// Integers and floats are kept apart so that 64-bit integers survive storage exactly;
/// `Int(2)` and `Float(2.0)` still compare equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Exact integer view; integral floats convert only when no precision is lost
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => exact_int(*f),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// First non-finite float in this value, depth first
    pub fn find_non_finite(&self) -> Option<f64> {
        match self {
            Value::Float(f) if !f.is_finite() => Some(*f),
            Value::Array(items) => items.iter().find_map(Value::find_non_finite),
            Value::Object(map) => map.values().find_map(Value::find_non_finite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key when this value is an object
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::Null => "".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => format_float(*n),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => self.to_json(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }

    /// Short rendering used in events and CLI output
    pub fn preview(&self, max_len: usize) -> String {
        let text = match self {
            Value::String(s) => format!("{:?}", s),
            Value::Int(_) | Value::Float(_) => self.as_string(),
            other => other.to_json(),
        };
        if text.chars().count() <= max_len {
            text
        } else {
            let cut: String = text.chars().take(max_len).collect();
            format!("{}...", cut)
        }
    }
}

fn format_float(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

/// `f` as an i64 when it names exactly that integer
fn exact_int(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is out of range
    if f.fract() != 0.0 || !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return None;
    }
    let n = f as i64;
    (n as f64 == f).then_some(n)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => {
                exact_int(*f) == Some(*i)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Declared type of an input or output port
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuntimeType {
    Any,
    Bool,
    Int,
    Float,
    String,
    List(Box<RuntimeType>),
    Nullable(Box<RuntimeType>),
    /// User-named type; values are not structurally checked
    Named(String),
}

impl RuntimeType {
    pub fn list(inner: RuntimeType) -> Self {
        RuntimeType::List(Box::new(inner))
    }

    pub fn nullable(inner: RuntimeType) -> Self {
        RuntimeType::Nullable(Box::new(inner))
    }

    pub fn named(name: impl Into<String>) -> Self {
        RuntimeType::Named(name.into())
    }

    /// Type name used for storage plugin lookup
    pub fn name(&self) -> String {
        match self {
            RuntimeType::Any => "Any".to_string(),
            RuntimeType::Bool => "Bool".to_string(),
            RuntimeType::Int => "Int".to_string(),
            RuntimeType::Float => "Float".to_string(),
            RuntimeType::String => "String".to_string(),
            RuntimeType::List(inner) => format!("List[{}]", inner.name()),
            RuntimeType::Nullable(inner) => format!("Nullable[{}]", inner.name()),
            RuntimeType::Named(name) => name.clone(),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, RuntimeType::List(_) | RuntimeType::Nullable(_))
    }

    /// All types nested inside a list/nullable wrapper, outermost first
    pub fn inner_types(&self) -> Vec<&RuntimeType> {
        let mut result = Vec::new();
        let mut current = self;
        while let RuntimeType::List(inner) | RuntimeType::Nullable(inner) = current {
            result.push(inner.as_ref());
            current = inner.as_ref();
        }
        result
    }

    /// Check a value against this type
    pub fn type_check(&self, value: &Value) -> Result<(), String> {
        let ok = match (self, value) {
            (RuntimeType::Any, _) | (RuntimeType::Named(_), _) => true,
            (RuntimeType::Nullable(_), Value::Null) => true,
            (RuntimeType::Nullable(inner), other) => return inner.type_check(other),
            (RuntimeType::Bool, Value::Bool(_)) => true,
            (RuntimeType::Int, Value::Int(_)) => true,
            (RuntimeType::Int, Value::Float(f)) => exact_int(*f).is_some(),
            (RuntimeType::Float, Value::Int(_) | Value::Float(_)) => true,
            (RuntimeType::String, Value::String(_)) => true,
            (RuntimeType::List(inner), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner
                        .type_check(item)
                        .map_err(|e| format!("element {}: {}", i, e))?;
                }
                true
            }
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(format!(
                "value {} is not of type {}",
                value.preview(40),
                self.name()
            ))
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
