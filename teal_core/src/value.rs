use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer, ser};

/// Identifier of a session, and of the task handle that resolves when it halts.
pub type TaskId = u64;

/// Values manipulated by the Teal machine.
///
/// Every variant serializes to a composition of strings, numbers, booleans,
/// null, sequences and maps, which is what lets instructions and suspended
/// sessions be written to any document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(#[serde(serialize_with = "serialize_finite")] f64),
    String(String),
    Symbol(String),
    List(Vec<Value>),
    /// Insertion-ordered key/value pairs.
    Hash(Vec<(Value, Value)>),
    /// A named function: either a compiled definition or a builtin.
    Function(String),
    Closure {
        function: String,
        captured: BTreeMap<String, Value>,
    },
    Future(TaskId),
}

/// Coarse classification used for operand checks and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Boolean,
    Integer,
    Float,
    String,
    Symbol,
    List,
    Hash,
    Function,
    Closure,
    Future,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Symbol => "symbol",
            ValueKind::List => "list",
            ValueKind::Hash => "hash",
            ValueKind::Function => "function",
            ValueKind::Closure => "closure",
            ValueKind::Future => "future",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Symbol(_) => ValueKind::Symbol,
            Value::List(_) => ValueKind::List,
            Value::Hash(_) => ValueKind::Hash,
            Value::Function(_) => ValueKind::Function,
            Value::Closure { .. } => ValueKind::Closure,
            Value::Future(_) => ValueKind::Future,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Hash(pairs) => !pairs.is_empty(),
            Value::Symbol(_) | Value::Function(_) | Value::Closure { .. } | Value::Future(_) => {
                true
            }
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) | Value::Symbol(text) => Some(text),
            _ => None,
        }
    }

    /// Serialized form used by instructions and persisted state. Fails on
    /// non-finite floats, which have no JSON number form.
    pub fn to_serial(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_serial(data: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(data)
    }

    /// Render a value the way it appears nested inside a container: strings
    /// are quoted, everything else matches `Display`.
    pub fn repr(&self) -> String {
        match self {
            Value::String(text) => format!("{text:?}"),
            other => other.to_string(),
        }
    }
}

fn serialize_finite<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(ser::Error::custom(format!("non-finite float `{value}`")));
    }
    serializer.serialize_f64(*value)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(flag) => write!(f, "{flag}"),
            Value::Integer(int) => write!(f, "{int}"),
            Value::Float(float) => write!(f, "{float}"),
            Value::String(text) => write!(f, "{text}"),
            Value::Symbol(name) => write!(f, ":{name}"),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Hash(pairs) => {
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key.repr(), value.repr()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Function(name) => write!(f, "<function {name}>"),
            Value::Closure { function, .. } => write!(f, "<closure {function}>"),
            Value::Future(id) => write!(f, "<future {id}>"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_form_is_plain_json() {
        let mut captured = BTreeMap::new();
        captured.insert("x".to_string(), Value::Integer(1));
        let value = Value::List(vec![
            Value::Null,
            Value::Symbol("name".into()),
            Value::Hash(vec![(Value::from("k"), Value::Float(1.5))]),
            Value::Closure {
                function: "lambda:0".into(),
                captured,
            },
            Value::Future(7),
        ]);
        let serial = value.to_serial().expect("finite values serialize");
        let text = serde_json::to_string(&serial).expect("json");
        let back: serde_json::Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(Value::from_serial(back).expect("decode"), value);
    }

    #[test]
    fn integers_and_floats_stay_distinct() {
        let serial = Value::Integer(3).to_serial().unwrap();
        assert_ne!(Value::from_serial(serial).expect("decode"), Value::Float(3.0));
    }

    #[test]
    fn non_finite_floats_refuse_to_serialize() {
        assert!(Value::Float(f64::INFINITY).to_serial().is_err());
        let nested = Value::List(vec![Value::Integer(1), Value::Float(f64::NAN)]);
        let err = nested.to_serial().unwrap_err();
        assert!(err.to_string().contains("non-finite"), "{err}");
    }

    #[test]
    fn display_quotes_nested_strings_only() {
        let value = Value::List(vec![Value::from("a"), Value::Integer(2)]);
        assert_eq!(value.to_string(), "[\"a\", 2]");
        assert_eq!(Value::from("a").to_string(), "a");
    }

    #[test]
    fn truthiness_follows_emptiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::List(Vec::new()).is_truthy());
        assert!(Value::Future(0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
    }
}
