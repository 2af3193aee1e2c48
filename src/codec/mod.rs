// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! The binary tuple codec.
//!
//! Converts between [`Tuple`]s and the unified wire layout used for both
//! shuffled bytes and persisted tuple streams:
//!
//! ```text
//! [common-schema fields, declared order] [specific-schema fields of the
//!                                         writing source, declared order]
//! ```
//!
//! With two or more sources the common schema carries the synthetic
//! source-identifier field at its declared (or auto-appended) position. The
//! wire format does not embed a schema; both ends resolve fields against the
//! configuration they already share.

mod field;
pub mod varint;

use std::sync::Arc;

pub use self::field::{decode_field, encode_field, field_len};
use self::varint::{get_vi32, put_vi32};
use crate::conf::CoGroupConfig;
use crate::tuple::Tuple;
use crate::types::FieldType;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("field `{field}` of type {ty} has no value")]
    AbsentValue { field: String, ty: FieldType },
    #[error("field `{field}` declared {expected} but was given a {found} value")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: &'static str,
    },
    #[error("ordinal {ordinal} out of range for enum field `{field}` ({len} symbols)")]
    BadOrdinal {
        field: String,
        ordinal: u64,
        len: usize,
    },
    #[error("input truncated")]
    Truncated,
    #[error("corrupt input: {0}")]
    Corrupt(&'static str),
    #[error("invalid UTF-8 string: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("unknown source ordinal: {0}")]
    UnknownSource(i64),
    #[error("tuple schema `{0}` is not a declared source")]
    NotASource(String),
    #[error("tuple schema `{0}` does not match the declared source schema")]
    SchemaMismatch(String),
}

/// Encodes tuples into the unified wire layout.
pub struct TupleSerializer {
    config: Arc<CoGroupConfig>,
}

impl TupleSerializer {
    pub fn new(config: Arc<CoGroupConfig>) -> Self {
        Self { config }
    }

    /// Appends the encoding of `tuple` to `buf`. The tuple's schema decides
    /// which declared source it writes as.
    pub fn serialize(&self, tuple: &Tuple, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        let resolved = self.config.resolved();
        let source = self
            .config
            .source_index(tuple.schema().name())
            .ok_or_else(|| CodecError::NotASource(tuple.schema().name().into()))?;
        if !tuple.schema().same_layout(&self.config.sources()[source]) {
            return Err(CodecError::SchemaMismatch(tuple.schema().name().into()));
        }

        for (slot, common_field) in resolved.common.fields().iter().enumerate() {
            if Some(slot) == resolved.source_slot {
                put_vi32(buf, source as i32);
                continue;
            }
            let i = resolved.common_to_tuple[source][slot]
                .expect("non-source common slot maps to a tuple field");
            let value = tuple.get(i);
            // the unified common field may be laxer about absence than this
            // particular source declares
            let source_field = tuple.schema().field(i);
            if value.is_absent() && !source_field.accepts_absent() {
                return Err(CodecError::AbsentValue {
                    field: source_field.name().into(),
                    ty: source_field.ty().clone(),
                });
            }
            encode_field(common_field, value, buf)?;
        }
        for (slot, specific_field) in resolved.specifics[source].fields().iter().enumerate() {
            let i = resolved.specific_to_tuple[source][slot];
            encode_field(specific_field, tuple.get(i), buf)?;
        }
        Ok(())
    }
}

/// Decodes wire records back into caller-supplied scratch tuples.
pub struct TupleDeserializer {
    config: Arc<CoGroupConfig>,
}

impl TupleDeserializer {
    pub fn new(config: Arc<CoGroupConfig>) -> Self {
        Self { config }
    }

    /// Reads the source ordinal of `record` without decoding it, skipping
    /// over the common fields that precede the source-identifier slot.
    pub fn peek_source(&self, record: &[u8]) -> Result<usize, CodecError> {
        let resolved = self.config.resolved();
        let Some(source_slot) = resolved.source_slot else {
            return Ok(0);
        };
        let mut pos = 0;
        for slot in 0..source_slot {
            pos += field_len(resolved.common.field(slot), &record[pos..])?;
        }
        let id = get_vi32(&mut &record[pos..])?;
        let source = usize::try_from(id)
            .map_err(|_| CodecError::UnknownSource(i64::from(id)))?;
        if source >= self.config.sources().len() {
            return Err(CodecError::UnknownSource(i64::from(id)));
        }
        Ok(source)
    }

    /// Decodes `record` into `tuple`, which must be bound to the writing
    /// source's schema. Returns the source ordinal.
    pub fn deserialize(&self, record: &[u8], tuple: &mut Tuple) -> Result<usize, CodecError> {
        let resolved = self.config.resolved();
        let source = self.peek_source(record)?;
        if !tuple.schema().same_layout(&self.config.sources()[source]) {
            return Err(CodecError::SchemaMismatch(tuple.schema().name().into()));
        }

        let mut buf = record;
        for (slot, common_field) in resolved.common.fields().iter().enumerate() {
            if Some(slot) == resolved.source_slot {
                get_vi32(&mut buf)?;
                continue;
            }
            let value = decode_field(common_field, &mut buf)?;
            let i = resolved.common_to_tuple[source][slot]
                .expect("non-source common slot maps to a tuple field");
            tuple.set(i, value);
        }
        for (slot, specific_field) in resolved.specifics[source].fields().iter().enumerate() {
            let value = decode_field(specific_field, &mut buf)?;
            tuple.set(resolved.specific_to_tuple[source][slot], value);
        }
        if !buf.is_empty() {
            return Err(CodecError::Corrupt("trailing bytes in record"));
        }
        Ok(source)
    }
}
