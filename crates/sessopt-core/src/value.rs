use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A parsed argument value handed to a session body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::Str(value) => !value.is_empty(),
            Value::List(values) => !values.is_empty(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value:?}"),
            Value::List(values) => {
                write!(f, "[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

pub type ConvertFn = dyn Fn(&str) -> Result<Value, String> + Send + Sync;

/// A named single-argument converter from a raw command-line string.
///
/// Two converters are equal only when they share the same function object,
/// so cloning keeps equality while two separately built closures never match.
#[derive(Clone)]
pub struct Converter {
    name: String,
    func: Arc<ConvertFn>,
}

impl Converter {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn convert(&self, raw: &str) -> Result<Value, String> {
        (self.func)(raw)
    }
}

impl PartialEq for Converter {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && std::ptr::addr_eq(Arc::as_ptr(&self.func), Arc::as_ptr(&other.func))
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Converter").field(&self.name).finish()
    }
}

/// The type a raw string is converted into.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
    Custom(Converter),
}

impl ValueType {
    /// Looks up one of the builtin types by the name used in manifests.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "bool" => Some(ValueType::Bool),
            "int" => Some(ValueType::Int),
            "float" => Some(ValueType::Float),
            "str" | "string" | "path" => Some(ValueType::Str),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::Custom(converter) => converter.name(),
        }
    }

    pub fn convert(&self, raw: &str) -> Result<Value, String> {
        match self {
            ValueType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Value::Bool(true)),
                "0" | "false" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(format!("invalid bool value: {raw:?}")),
            },
            ValueType::Int => raw
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|err| format!("invalid int value: {raw:?} ({err})")),
            ValueType::Float => raw
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|err| format!("invalid float value: {raw:?} ({err})")),
            ValueType::Str => Ok(Value::Str(raw.to_string())),
            ValueType::Custom(converter) => converter.convert(raw),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
