// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Self-describing persisted tuple streams.
//!
//! Layout: an 8-byte magic, a format version byte, the writer's schema as a
//! length-prefixed JSON header, then records framed as
//! `varint payload length + payload + crc32`. Records encode exactly like
//! the shuffled wire form of a single-source configuration; the schema
//! travels once in the header, never per record.
//!
//! Readers open the file with their own (possibly evolved) schema and
//! resolve fields once, by name: same-name fields must keep their type,
//! writer-only fields are skipped byte-exactly, reader-only fields take
//! their declared default.

use std::io::{Read, Write};

use bytes::BufMut;

use crate::codec::varint::put_vu64;
use crate::codec::{decode_field, encode_field, field_len, CodecError};
use crate::schema::Schema;
use crate::tuple::Tuple;
use crate::types::{FieldType, Value};

const MAGIC: [u8; 8] = *b"COTUPLE\0";
const VERSION: u8 = 1;

#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a tuple stream (bad magic)")]
    BadMagic,
    #[error("unsupported tuple stream version: {0}")]
    BadVersion(u8),
    #[error("invalid checksum: found {0}, expected {1}")]
    Checksum(u32, u32),
    #[error("field `{field}` changed type from {written} to {declared}")]
    IncompatibleField {
        field: String,
        written: FieldType,
        declared: FieldType,
    },
    #[error("field `{0}` is missing from the stream and declares no default")]
    MissingField(String),
    #[error("tuple schema `{0}` does not match stream schema `{1}`")]
    SchemaMismatch(String, String),
}

/// Writes a tuple stream with an embedded schema header.
pub struct TupleWriter<W: Write> {
    writer: W,
    schema: Schema,
    payload: Vec<u8>,
    frame: Vec<u8>,
}

impl<W: Write> TupleWriter<W> {
    pub fn create(mut writer: W, schema: Schema) -> Result<Self, StreamError> {
        let header = serde_json::to_vec(&schema)?;
        writer.write_all(&MAGIC)?;
        writer.write_all(&[VERSION])?;
        writer.write_all(&(header.len() as u32).to_be_bytes())?;
        writer.write_all(&header)?;
        Ok(Self {
            writer,
            schema,
            payload: vec![],
            frame: vec![],
        })
    }

    pub fn write(&mut self, tuple: &Tuple) -> Result<(), StreamError> {
        if !tuple.schema().same_layout(&self.schema) {
            return Err(StreamError::SchemaMismatch(
                tuple.schema().name().into(),
                self.schema.name().into(),
            ));
        }
        self.payload.clear();
        for (i, field) in self.schema.fields().iter().enumerate() {
            encode_field(field, tuple.get(i), &mut self.payload)?;
        }
        self.frame.clear();
        put_vu64(&mut self.frame, self.payload.len() as u64);
        self.frame.extend_from_slice(&self.payload);
        self.frame.put_u32(crc32fast::hash(&self.payload));
        self.writer.write_all(&self.frame)?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, StreamError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

enum ReadStep {
    /// Decode into this slot of the target tuple.
    Decode(usize),
    /// Writer-only field: step over its bytes.
    Skip,
}

/// Reads a tuple stream back, resolving the embedded writer schema against
/// the caller's target schema.
pub struct TupleReader<R: Read> {
    reader: R,
    writer_schema: Schema,
    target: Schema,
    plan: Vec<ReadStep>,
    /// Target slots absent from the written data, with their substitutes.
    missing: Vec<(usize, Value)>,
    scratch: Vec<u8>,
}

impl<R: Read> TupleReader<R> {
    pub fn open(mut reader: R, target: Schema) -> Result<Self, StreamError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(StreamError::BadMagic);
        }
        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != VERSION {
            return Err(StreamError::BadVersion(version[0]));
        }
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let mut header = vec![0u8; u32::from_be_bytes(len) as usize];
        reader.read_exact(&mut header)?;
        let writer_schema: Schema = serde_json::from_slice(&header)?;

        // resolve once: the per-record path below never looks at names again
        let mut plan = Vec::with_capacity(writer_schema.len());
        for field in writer_schema.fields() {
            match target.field_by_name(field.name()) {
                Some(declared) if declared.ty() != field.ty() => {
                    return Err(StreamError::IncompatibleField {
                        field: field.name().into(),
                        written: field.ty().clone(),
                        declared: declared.ty().clone(),
                    });
                }
                Some(_) => plan.push(ReadStep::Decode(
                    target.index_of(field.name()).expect("field resolved above"),
                )),
                None => plan.push(ReadStep::Skip),
            }
        }
        let mut missing = vec![];
        for (i, field) in target.fields().iter().enumerate() {
            if writer_schema.field_by_name(field.name()).is_some() {
                continue;
            }
            match field.default() {
                Some(default) => missing.push((i, default.clone())),
                None if field.accepts_absent() => missing.push((i, Value::Absent)),
                None => return Err(StreamError::MissingField(field.name().into())),
            }
        }
        Ok(Self {
            reader,
            writer_schema,
            target,
            plan,
            missing,
            scratch: vec![],
        })
    }

    /// The schema embedded by the writing side.
    pub fn writer_schema(&self) -> &Schema {
        &self.writer_schema
    }

    /// Reads the next record into `tuple`, returning `false` at a clean end
    /// of stream. The tuple must be bound to the reader's target schema.
    pub fn read(&mut self, tuple: &mut Tuple) -> Result<bool, StreamError> {
        if !tuple.schema().same_layout(&self.target) {
            return Err(StreamError::SchemaMismatch(
                tuple.schema().name().into(),
                self.target.name().into(),
            ));
        }
        let Some(len) = self.read_frame_len()? else {
            return Ok(false);
        };
        self.scratch.resize(len, 0);
        self.reader.read_exact(&mut self.scratch)?;
        let mut crc = [0u8; 4];
        self.reader.read_exact(&mut crc)?;
        let expected = u32::from_be_bytes(crc);
        let found = crc32fast::hash(&self.scratch);
        if found != expected {
            return Err(StreamError::Checksum(found, expected));
        }

        let mut buf = &self.scratch[..];
        for (field, step) in self.writer_schema.fields().iter().zip(&self.plan) {
            match step {
                ReadStep::Decode(slot) => {
                    let value = decode_field(field, &mut buf)?;
                    tuple.set(*slot, value);
                }
                ReadStep::Skip => {
                    let skip = field_len(field, buf)?;
                    buf = &buf[skip..];
                }
            }
        }
        if !buf.is_empty() {
            return Err(StreamError::Codec(CodecError::Corrupt(
                "trailing bytes in record",
            )));
        }
        for (slot, value) in &self.missing {
            tuple.set(*slot, value.clone());
        }
        Ok(true)
    }

    /// Varint frame length, or `None` at a clean end of stream.
    fn read_frame_len(&mut self) -> Result<Option<usize>, StreamError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let mut byte = [0u8; 1];
            match self.reader.read(&mut byte) {
                Ok(0) if shift == 0 => return Ok(None),
                Ok(0) => return Err(StreamError::Codec(CodecError::Truncated)),
                Ok(_) => {
                    value |= u64::from(byte[0] & 0x7f) << shift;
                    if byte[0] & 0x80 == 0 {
                        return Ok(Some(value as usize));
                    }
                    shift += 7;
                    if shift >= 70 {
                        return Err(StreamError::Codec(CodecError::Corrupt("varint too long")));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
