// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Per-field wire encoding.
//!
//! Wire rules by type:
//! * fixed-width types in big-endian form
//! * `VInt`/`VLong` as zig-zag varints
//! * strings and bytes varint-length-prefixed
//! * enums as the varint ordinal
//! * objects as a varint of blob length + 1, with `0` meaning absent
//! * any other nullable field carries a one-byte presence marker
//!   (`0` absent, `1` present) before its payload

use bytes::{Buf, BufMut};

use super::varint::{get_vi32, get_vi64, get_vu64, put_vi32, put_vi64, put_vu64, varint_len};
use super::CodecError;
use crate::schema::Field;
use crate::types::{FieldType, Value, F32, F64};

pub fn encode_field(
    field: &Field,
    value: &Value,
    buf: &mut impl BufMut,
) -> Result<(), CodecError> {
    if value.is_absent() {
        if field.ty().is_object() {
            put_vu64(buf, 0);
            return Ok(());
        }
        if field.is_nullable() {
            buf.put_u8(0);
            return Ok(());
        }
        return Err(CodecError::AbsentValue {
            field: field.name().into(),
            ty: field.ty().clone(),
        });
    }
    if !value.matches(field.ty()) {
        return Err(CodecError::TypeMismatch {
            field: field.name().into(),
            expected: field.ty().clone(),
            found: value.kind(),
        });
    }
    if field.is_nullable() && !field.ty().is_object() {
        buf.put_u8(1);
    }
    match (field.ty(), value) {
        (FieldType::Bool, Value::Bool(v)) => buf.put_u8(*v as u8),
        (FieldType::Int, Value::Int(v)) => buf.put_i32(*v),
        (FieldType::Long, Value::Long(v)) => buf.put_i64(*v),
        (FieldType::VInt, Value::Int(v)) => put_vi32(buf, *v),
        (FieldType::VLong, Value::Long(v)) => put_vi64(buf, *v),
        (FieldType::Float, Value::Float(v)) => buf.put_f32(v.0),
        (FieldType::Double, Value::Double(v)) => buf.put_f64(v.0),
        (FieldType::String, Value::String(s)) => {
            put_vu64(buf, s.len() as u64);
            buf.put_slice(s.as_bytes());
        }
        (FieldType::Bytes, Value::Bytes(b)) => {
            put_vu64(buf, b.len() as u64);
            buf.put_slice(b);
        }
        (FieldType::Enum(_), Value::Enum(ordinal)) => put_vu64(buf, u64::from(*ordinal)),
        (FieldType::Object, Value::Object(b)) => {
            put_vu64(buf, b.len() as u64 + 1);
            buf.put_slice(b);
        }
        _ => unreachable!("value kind checked against field type"),
    }
    Ok(())
}

pub fn decode_field(field: &Field, buf: &mut &[u8]) -> Result<Value, CodecError> {
    if field.ty().is_object() {
        let len = get_vu64(buf)?;
        if len == 0 {
            return Ok(Value::Absent);
        }
        let len = (len - 1) as usize;
        if buf.remaining() < len {
            return Err(CodecError::Truncated);
        }
        let blob = buf[..len].to_vec();
        buf.advance(len);
        return Ok(Value::Object(blob));
    }
    if field.is_nullable() {
        if !buf.has_remaining() {
            return Err(CodecError::Truncated);
        }
        match buf.get_u8() {
            0 => return Ok(Value::Absent),
            1 => {}
            _ => return Err(CodecError::Corrupt("bad presence marker")),
        }
    }
    match field.ty() {
        FieldType::Bool => {
            if !buf.has_remaining() {
                return Err(CodecError::Truncated);
            }
            match buf.get_u8() {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                _ => Err(CodecError::Corrupt("bad boolean byte")),
            }
        }
        FieldType::Int => {
            if buf.remaining() < 4 {
                return Err(CodecError::Truncated);
            }
            Ok(Value::Int(buf.get_i32()))
        }
        FieldType::Long => {
            if buf.remaining() < 8 {
                return Err(CodecError::Truncated);
            }
            Ok(Value::Long(buf.get_i64()))
        }
        FieldType::VInt => Ok(Value::Int(get_vi32(buf)?)),
        FieldType::VLong => Ok(Value::Long(get_vi64(buf)?)),
        FieldType::Float => {
            if buf.remaining() < 4 {
                return Err(CodecError::Truncated);
            }
            Ok(Value::Float(F32::from(buf.get_f32())))
        }
        FieldType::Double => {
            if buf.remaining() < 8 {
                return Err(CodecError::Truncated);
            }
            Ok(Value::Double(F64::from(buf.get_f64())))
        }
        FieldType::String => {
            let len = get_vu64(buf)? as usize;
            if buf.remaining() < len {
                return Err(CodecError::Truncated);
            }
            let s = std::str::from_utf8(&buf[..len])?.to_owned();
            buf.advance(len);
            Ok(Value::String(s))
        }
        FieldType::Bytes => {
            let len = get_vu64(buf)? as usize;
            if buf.remaining() < len {
                return Err(CodecError::Truncated);
            }
            let b = buf[..len].to_vec();
            buf.advance(len);
            Ok(Value::Bytes(b))
        }
        FieldType::Enum(e) => {
            let ordinal = get_vu64(buf)?;
            if ordinal >= e.len() as u64 {
                return Err(CodecError::BadOrdinal {
                    field: field.name().into(),
                    ordinal,
                    len: e.len(),
                });
            }
            Ok(Value::Enum(ordinal as u32))
        }
        FieldType::Object => unreachable!("object fields handled above"),
    }
}

/// Total length in bytes of the encoded field at the start of `buf`.
///
/// Errors with [`CodecError::Truncated`] when `buf` does not hold the whole
/// field, so callers may index the returned span unchecked.
pub fn field_len(field: &Field, buf: &[u8]) -> Result<usize, CodecError> {
    if field.ty().is_object() {
        let head = varint_len(buf)?;
        let len = get_vu64(&mut &buf[..])?;
        let total = if len == 0 { head } else { head + (len - 1) as usize };
        return checked(total, buf);
    }
    if field.is_nullable() {
        if buf.is_empty() {
            return Err(CodecError::Truncated);
        }
        return match buf[0] {
            0 => Ok(1),
            1 => Ok(1 + payload_len(field, &buf[1..])?),
            _ => Err(CodecError::Corrupt("bad presence marker")),
        };
    }
    payload_len(field, buf)
}

fn payload_len(field: &Field, buf: &[u8]) -> Result<usize, CodecError> {
    let total = match field.ty() {
        FieldType::Bool => 1,
        FieldType::Int | FieldType::Float => 4,
        FieldType::Long | FieldType::Double => 8,
        FieldType::VInt | FieldType::VLong | FieldType::Enum(_) => varint_len(buf)?,
        FieldType::String | FieldType::Bytes => {
            let head = varint_len(buf)?;
            head + get_vu64(&mut &buf[..])? as usize
        }
        FieldType::Object => unreachable!("object fields handled by field_len"),
    };
    checked(total, buf)
}

fn checked(total: usize, buf: &[u8]) -> Result<usize, CodecError> {
    if buf.len() < total {
        Err(CodecError::Truncated)
    } else {
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnumType;

    fn roundtrip(field: &Field, value: Value) {
        let mut buf = vec![];
        encode_field(field, &value, &mut buf).unwrap();
        assert_eq!(field_len(field, &buf).unwrap(), buf.len());
        let mut slice = &buf[..];
        assert_eq!(decode_field(field, &mut slice).unwrap(), value);
        assert!(slice.is_empty());
    }

    #[test]
    fn test_roundtrip_every_type() {
        let color = EnumType::new("color", ["RED", "GREEN", "BLUE"]).unwrap();
        roundtrip(&Field::new("b", FieldType::Bool), Value::Bool(true));
        roundtrip(&Field::new("i", FieldType::Int), Value::Int(-42));
        roundtrip(&Field::new("l", FieldType::Long), Value::Long(i64::MIN));
        roundtrip(&Field::new("vi", FieldType::VInt), Value::Int(300));
        roundtrip(&Field::new("vl", FieldType::VLong), Value::Long(-1));
        roundtrip(&Field::new("f", FieldType::Float), Value::from(3.5f32));
        roundtrip(&Field::new("d", FieldType::Double), Value::from(-0.25f64));
        roundtrip(
            &Field::new("s", FieldType::String),
            Value::String("héllo".into()),
        );
        roundtrip(&Field::new("s", FieldType::String), Value::String("".into()));
        roundtrip(
            &Field::new("by", FieldType::Bytes),
            Value::Bytes(vec![0, 255, 7]),
        );
        roundtrip(&Field::new("e", FieldType::Enum(color)), Value::Enum(2));
        roundtrip(
            &Field::new("o", FieldType::Object),
            Value::Object(vec![1, 2, 3]),
        );
        roundtrip(&Field::new("o", FieldType::Object), Value::Object(vec![]));
        roundtrip(&Field::new("o", FieldType::Object), Value::Absent);
    }

    #[test]
    fn test_roundtrip_nullable() {
        for field in [
            Field::new("i", FieldType::Int).nullable(),
            Field::new("s", FieldType::String).nullable(),
        ] {
            roundtrip(&field, Value::Absent);
        }
        roundtrip(&Field::new("i", FieldType::Int).nullable(), Value::Int(7));
    }

    #[test]
    fn test_absent_non_nullable_is_a_defect() {
        let field = Field::new("count", FieldType::VInt);
        let mut buf = vec![];
        let err = encode_field(&field, &Value::Absent, &mut buf).unwrap_err();
        assert_eq!(
            err,
            CodecError::AbsentValue {
                field: "count".into(),
                ty: FieldType::VInt,
            }
        );
    }

    #[test]
    fn test_type_mismatch() {
        let field = Field::new("count", FieldType::Int);
        let mut buf = vec![];
        let err = encode_field(&field, &Value::String("7".into()), &mut buf).unwrap_err();
        assert_eq!(
            err,
            CodecError::TypeMismatch {
                field: "count".into(),
                expected: FieldType::Int,
                found: "string",
            }
        );
    }

    #[test]
    fn test_bad_ordinal_on_decode() {
        let color = EnumType::new("color", ["RED"]).unwrap();
        let field = Field::new("e", FieldType::Enum(color));
        let mut buf = vec![];
        put_vu64(&mut buf, 9);
        let err = decode_field(&field, &mut &buf[..]).unwrap_err();
        assert!(matches!(err, CodecError::BadOrdinal { ordinal: 9, .. }));
    }

    #[test]
    fn test_truncated() {
        let field = Field::new("l", FieldType::Long);
        let mut buf = vec![];
        encode_field(&field, &Value::Long(1), &mut buf).unwrap();
        assert_eq!(
            decode_field(&field, &mut &buf[..4]).unwrap_err(),
            CodecError::Truncated
        );
        assert_eq!(field_len(&field, &buf[..4]).unwrap_err(), CodecError::Truncated);
    }
}
