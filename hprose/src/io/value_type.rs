use bytes::Bytes;

use super::Value;
use crate::{Error, ErrorKind, Result};

/// Declared type of a parameter slot.
///
/// Besides the wire value types there are context carriers: slots the wire
/// never fills, which a [`Fixer`](crate::Fixer) may bind to the live call
/// or transport context instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueType {
    Any,
    Bool,
    Int,
    Double,
    String,
    Bytes,
    List,
    Map,
    /// The generic per-call [`ServiceContext`](crate::ServiceContext).
    Context,
    /// A carrier defined by a transport, identified by name.
    Transport(&'static str),
}

impl ValueType {
    /// The value an unfilled slot of this type starts with.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Double => Value::Double(0.0),
            ValueType::String => Value::String(String::new()),
            ValueType::Bytes => Value::Bytes(Bytes::new()),
            ValueType::List => Value::List(Vec::new()),
            ValueType::Map => Value::Map(Vec::new()),
            ValueType::Any | ValueType::Context | ValueType::Transport(_) => Value::Nil,
        }
    }

    /// Converts a decoded value into this slot type.
    ///
    /// `nil` becomes the type's default value, numbers convert between
    /// integer and double, and numbers and strings convert to each other.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::DecodeFailed`] when no conversion exists.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        let converted = match (self, value) {
            (ValueType::Any | ValueType::Context | ValueType::Transport(_), v) => Some(v),
            (_, Value::Nil) => Some(self.default_value()),
            (ValueType::Bool, Value::Bool(b)) => Some(Value::Bool(b)),
            (ValueType::Bool, Value::Int(i)) => Some(Value::Bool(i != 0)),
            (ValueType::Bool, Value::String(s)) => s.parse().ok().map(Value::Bool),
            (ValueType::Int, Value::Int(i)) => Some(Value::Int(i)),
            #[allow(clippy::cast_possible_truncation)]
            (ValueType::Int, Value::Double(d)) if d.fract() == 0.0 => Some(Value::Int(d as i64)),
            (ValueType::Int, Value::Bool(b)) => Some(Value::Int(i64::from(b))),
            (ValueType::Int, Value::String(s)) => s.parse().ok().map(Value::Int),
            (ValueType::Double, Value::Double(d)) => Some(Value::Double(d)),
            #[allow(clippy::cast_precision_loss)]
            (ValueType::Double, Value::Int(i)) => Some(Value::Double(i as f64)),
            (ValueType::Double, Value::String(s)) => s.parse().ok().map(Value::Double),
            (ValueType::String, Value::String(s)) => Some(Value::String(s)),
            (ValueType::String, Value::Int(i)) => Some(Value::String(i.to_string())),
            (ValueType::String, Value::Double(d)) => Some(Value::String(d.to_string())),
            (ValueType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ValueType::String, Value::Bytes(b)) => {
                Some(Value::String(std::str::from_utf8(&b)?.to_string()))
            }
            (ValueType::Bytes, Value::Bytes(b)) => Some(Value::Bytes(b)),
            (ValueType::Bytes, Value::String(s)) => Some(Value::Bytes(Bytes::from(s))),
            (ValueType::List, Value::List(l)) => Some(Value::List(l)),
            (ValueType::Map, Value::Map(m)) => Some(Value::Map(m)),
            (ty, v) => {
                return Err(Error::new(
                    ErrorKind::DecodeFailed,
                    format!("cannot convert {} to {ty:?}", v.type_name()),
                ));
            }
        };
        converted.ok_or_else(|| {
            Error::new(
                ErrorKind::DecodeFailed,
                format!("cannot convert string to {self:?}"),
            )
        })
    }
}
