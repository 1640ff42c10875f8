//! Operation parameters: a typed value bag plus per-operation schemas.
//!
//! Every operation publishes a static [`PropertyInfo`] schema; setters
//! validate names and types against it and report [`PropertyError`] instead
//! of silently coercing.

use crate::buffer::SharedBuffer;
use miette::Diagnostic;
use strum::EnumIs;
use thiserror::Error;
use ustr::Ustr;

#[derive(Debug, Clone, EnumIs)]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    String(String),
    Buffer(SharedBuffer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Float,
    Int,
    Bool,
    String,
    Buffer,
}

impl Value {
    pub fn ty(&self) -> ValueType {
        match self {
            Value::Float(_) => ValueType::Float,
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
            Value::String(_) => ValueType::String,
            Value::Buffer(_) => ValueType::Buffer,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&SharedBuffer> {
        match self {
            Value::Buffer(v) => Some(v),
            _ => None,
        }
    }

    pub fn expect_float(&self, name: Ustr) -> Result<f64, PropertyError> {
        self.as_float().ok_or(PropertyError::TypeMismatch {
            name,
            expected: ValueType::Float,
            got: self.ty(),
        })
    }

    pub fn expect_string(&self, name: Ustr) -> Result<&str, PropertyError> {
        match self {
            Value::String(v) => Ok(v),
            _ => Err(PropertyError::TypeMismatch {
                name,
                expected: ValueType::String,
                got: self.ty(),
            }),
        }
    }

    pub fn expect_buffer(&self, name: Ustr) -> Result<SharedBuffer, PropertyError> {
        match self {
            Value::Buffer(v) => Ok(v.clone()),
            _ => Err(PropertyError::TypeMismatch {
                name,
                expected: ValueType::Buffer,
                got: self.ty(),
            }),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<SharedBuffer> for Value {
    fn from(value: SharedBuffer) -> Self {
        Value::Buffer(value)
    }
}

/// One entry of an operation's property schema.
#[derive(Debug, Clone, Copy)]
pub struct PropertyInfo {
    pub name: &'static str,
    pub ty: ValueType,
    pub description: &'static str,
}

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum PropertyError {
    #[error("no property named `{name}`")]
    Unknown { name: Ustr },
    #[error("property `{name}` expects {expected:?}, got {got:?}")]
    TypeMismatch {
        name: Ustr,
        expected: ValueType,
        got: ValueType,
    },
}
