// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

use ordered_float::OrderedFloat;
use parse_display::Display;
use serde::{Deserialize, Serialize};

use super::FieldType;

/// A wrapper around floats providing implementations of `Eq`, `Ord`, and
/// `Hash`, so float fields order the same way decoded as encoded.
pub type F32 = OrderedFloat<f32>;
pub type F64 = OrderedFloat<f64>;

/// Run-time value of a single tuple field.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    // NOTE: Absent comes first.
    // => the absent value is less than any present value.
    #[display("absent")]
    Absent,
    #[display("{0}")]
    Bool(bool),
    #[display("{0}")]
    Int(i32),
    #[display("{0}")]
    Long(i64),
    #[display("{0}")]
    Float(F32),
    #[display("{0}")]
    Double(F64),
    #[display("'{0}'")]
    String(String),
    #[display("<bytes>")]
    Bytes(Vec<u8>),
    #[display("#{0}")]
    Enum(u32),
    #[display("<object>")]
    Object(Vec<u8>),
}

impl Value {
    /// Returns `true` if this is the absent value.
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Whether this value can legally fill a field of the given type.
    ///
    /// `Int` values fill both fixed and varint encodings of 32-bit integers,
    /// likewise `Long` for 64-bit ones. Absence is a nullability concern, not
    /// a type mismatch, and is checked separately.
    pub fn matches(&self, ty: &FieldType) -> bool {
        match (self, ty) {
            (Self::Absent, _) => true,
            (Self::Bool(_), FieldType::Bool) => true,
            (Self::Int(_), FieldType::Int | FieldType::VInt) => true,
            (Self::Long(_), FieldType::Long | FieldType::VLong) => true,
            (Self::Float(_), FieldType::Float) => true,
            (Self::Double(_), FieldType::Double) => true,
            (Self::String(_), FieldType::String) => true,
            (Self::Bytes(_), FieldType::Bytes) => true,
            (Self::Enum(ordinal), FieldType::Enum(e)) => (*ordinal as usize) < e.len(),
            (Self::Object(_), FieldType::Object) => true,
            _ => false,
        }
    }

    /// Short name of the value's own kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Enum(_) => "enum",
            Self::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(OrderedFloat(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(OrderedFloat(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnumType;

    #[test]
    fn test_absent_sorts_first() {
        assert!(Value::Absent < Value::Bool(false));
        assert!(Value::Absent < Value::Int(i32::MIN));
        assert!(Value::Absent < Value::Object(vec![]));
    }

    #[test]
    fn test_matches() {
        let color = FieldType::Enum(EnumType::new("color", ["RED", "GREEN"]).unwrap());
        assert!(Value::Int(3).matches(&FieldType::Int));
        assert!(Value::Int(3).matches(&FieldType::VInt));
        assert!(!Value::Int(3).matches(&FieldType::Long));
        assert!(Value::Enum(1).matches(&color));
        assert!(!Value::Enum(2).matches(&color));
        assert!(Value::Absent.matches(&FieldType::String));
    }

    #[test]
    fn test_float_total_order() {
        let a = Value::Double(OrderedFloat(f64::NAN));
        let b = Value::Double(OrderedFloat(1.0));
        assert!(a > b);
        assert_eq!(a, a.clone());
    }
}
