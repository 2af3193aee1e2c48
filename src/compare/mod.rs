// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Byte-level comparators over encoded records.
//!
//! The external sort engine orders opaque byte buffers, so both comparators
//! walk fields left-to-right directly on the wire form, tracking one cursor
//! per buffer (a custom comparator may declare ties between encodings of
//! different lengths). The object-form twins run the same criteria over
//! decoded tuples; the two must agree in sign for every pair of valid
//! records.

mod partition;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

pub use self::partition::Partitioner;
use crate::codec::varint::{get_vi32, get_vi64, get_vu64};
use crate::codec::{decode_field, field_len, CodecError};
use crate::conf::CoGroupConfig;
use crate::schema::Field;
use crate::tuple::Tuple;
use crate::types::{FieldType, Value, F32, F64};

/// Compares two decoded values of one field; plugged in per sort entry.
///
/// Implementations must be antisymmetric and transitive — a violation
/// silently corrupts grouping and is only caught by property tests.
pub trait ValueComparator: Send + Sync {
    fn compare(&self, a: &Value, b: &Value) -> Ordering;
}

impl<F> ValueComparator for F
where
    F: Fn(&Value, &Value) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        self(a, b)
    }
}

/// Named custom comparators, consulted once at configuration-build time.
#[derive(Default, Clone)]
pub struct ComparatorRegistry {
    map: HashMap<String, Arc<dyn ValueComparator>>,
}

impl ComparatorRegistry {
    pub fn register(&mut self, name: impl Into<String>, comparator: Arc<dyn ValueComparator>) {
        self.map.insert(name.into(), comparator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ValueComparator>> {
        self.map.get(name).cloned()
    }
}

/// Engine-facing contract: a total order over encoded records.
pub trait RawComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering, CodecError>;
}

/// Orders records by the full primary ordering, falling through to the
/// writing source's secondary ordering when both records share a source.
pub struct SortComparator {
    config: Arc<CoGroupConfig>,
}

impl SortComparator {
    pub fn new(config: Arc<CoGroupConfig>) -> Self {
        Self { config }
    }

    /// Same criteria over decoded tuples.
    pub fn compare_tuples(&self, a: &Tuple, b: &Tuple) -> Result<Ordering, CodecError> {
        let resolved = self.config.resolved();
        match compare_tuple_prefix(&self.config, a, b, resolved.common.len())? {
            Prefix::Decided(ord) => Ok(ord),
            Prefix::Tied { source } => {
                for (slot, criterion) in resolved.specific_cmp[source].iter().enumerate() {
                    let i = resolved.specific_to_tuple[source][slot];
                    let ord = criterion.direction.apply(compare_values(
                        criterion.custom.as_deref(),
                        a.get(i),
                        b.get(i),
                    ));
                    if ord != Ordering::Equal {
                        return Ok(ord);
                    }
                }
                Ok(Ordering::Equal)
            }
        }
    }
}

impl RawComparator for SortComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering, CodecError> {
        let resolved = self.config.resolved();
        match compare_encoded_prefix(resolved, a, b, resolved.common.len())? {
            Prefix::Decided(ord) => Ok(ord),
            Prefix::Tied { source, pa, pb } => {
                if source >= resolved.specifics.len() {
                    return Err(CodecError::UnknownSource(source as i64));
                }
                let mut pa = pa;
                let mut pb = pb;
                let schema = &resolved.specifics[source];
                for (slot, criterion) in resolved.specific_cmp[source].iter().enumerate() {
                    let field = schema.field(slot);
                    let la = field_len(field, &a[pa..])?;
                    let lb = field_len(field, &b[pb..])?;
                    let ord = criterion.direction.apply(compare_spans(
                        field,
                        criterion.custom.as_deref(),
                        &a[pa..pa + la],
                        &b[pb..pb + lb],
                    )?);
                    if ord != Ordering::Equal {
                        return Ok(ord);
                    }
                    pa += la;
                    pb += lb;
                }
                Ok(Ordering::Equal)
            }
        }
    }
}

/// Orders records by the group-by prefix only: records with equal group-by
/// values compare equal no matter what the remaining bytes hold.
pub struct GroupComparator {
    config: Arc<CoGroupConfig>,
}

impl GroupComparator {
    pub fn new(config: Arc<CoGroupConfig>) -> Self {
        Self { config }
    }

    /// Same criteria over decoded tuples.
    pub fn compare_tuples(&self, a: &Tuple, b: &Tuple) -> Result<Ordering, CodecError> {
        let n = self.config.resolved().group_len();
        match compare_tuple_prefix(&self.config, a, b, n)? {
            Prefix::Decided(ord) => Ok(ord),
            Prefix::Tied { .. } => Ok(Ordering::Equal),
        }
    }
}

impl RawComparator for GroupComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Result<Ordering, CodecError> {
        let resolved = self.config.resolved();
        match compare_encoded_prefix(resolved, a, b, resolved.group_len())? {
            Prefix::Decided(ord) => Ok(ord),
            Prefix::Tied { .. } => Ok(Ordering::Equal),
        }
    }
}

enum Prefix {
    Decided(Ordering),
    /// Every compared field tied. For the byte form, `pa`/`pb` are the
    /// cursor positions past the compared prefix.
    Tied { source: usize, pa: usize, pb: usize },
}

fn compare_encoded_prefix(
    resolved: &crate::conf::Resolved,
    a: &[u8],
    b: &[u8],
    fields: usize,
) -> Result<Prefix, CodecError> {
    let mut pa = 0;
    let mut pb = 0;
    let mut source = 0usize;
    for slot in 0..fields {
        let field = resolved.common.field(slot);
        let la = field_len(field, &a[pa..])?;
        let lb = field_len(field, &b[pb..])?;
        let criterion = &resolved.common_cmp[slot];
        let ord = if Some(slot) == resolved.source_slot {
            let ia = get_vi32(&mut &a[pa..pa + la])?;
            let ib = get_vi32(&mut &b[pb..pb + lb])?;
            source = ia.max(0) as usize;
            ia.cmp(&ib)
        } else {
            compare_spans(
                field,
                criterion.custom.as_deref(),
                &a[pa..pa + la],
                &b[pb..pb + lb],
            )?
        };
        let ord = criterion.direction.apply(ord);
        if ord != Ordering::Equal {
            return Ok(Prefix::Decided(ord));
        }
        pa += la;
        pb += lb;
    }
    Ok(Prefix::Tied { source, pa, pb })
}

fn compare_tuple_prefix(
    config: &CoGroupConfig,
    a: &Tuple,
    b: &Tuple,
    fields: usize,
) -> Result<Prefix, CodecError> {
    let resolved = config.resolved();
    let sa = config
        .source_index(a.schema().name())
        .ok_or_else(|| CodecError::NotASource(a.schema().name().into()))?;
    let sb = config
        .source_index(b.schema().name())
        .ok_or_else(|| CodecError::NotASource(b.schema().name().into()))?;
    for slot in 0..fields {
        let criterion = &resolved.common_cmp[slot];
        let ord = if Some(slot) == resolved.source_slot {
            sa.cmp(&sb)
        } else {
            let ia = resolved.common_to_tuple[sa][slot]
                .expect("non-source common slot maps to a tuple field");
            let ib = resolved.common_to_tuple[sb][slot]
                .expect("non-source common slot maps to a tuple field");
            compare_values(criterion.custom.as_deref(), a.get(ia), b.get(ib))
        };
        let ord = criterion.direction.apply(ord);
        if ord != Ordering::Equal {
            return Ok(Prefix::Decided(ord));
        }
    }
    Ok(Prefix::Tied {
        source: sa,
        pa: 0,
        pb: 0,
    })
}

fn compare_values(custom: Option<&dyn ValueComparator>, a: &Value, b: &Value) -> Ordering {
    match custom {
        Some(custom) => custom.compare(a, b),
        None => a.cmp(b),
    }
}

/// Default or custom comparison of two exact field spans.
fn compare_spans(
    field: &Field,
    custom: Option<&dyn ValueComparator>,
    a: &[u8],
    b: &[u8],
) -> Result<Ordering, CodecError> {
    if let Some(custom) = custom {
        // custom comparators see decoded values; only this field is decoded,
        // never the whole record
        let va = decode_field(field, &mut &a[..])?;
        let vb = decode_field(field, &mut &b[..])?;
        return Ok(custom.compare(&va, &vb));
    }
    default_compare(field, a, b)
}

/// Decode-free comparison of two exact field spans.
fn default_compare(field: &Field, a: &[u8], b: &[u8]) -> Result<Ordering, CodecError> {
    if field.ty().is_object() {
        let mut sa = a;
        let mut sb = b;
        let la = get_vu64(&mut sa)?;
        let lb = get_vu64(&mut sb)?;
        return Ok(match (la, lb) {
            (0, 0) => Ordering::Equal,
            (0, _) => Ordering::Less,
            (_, 0) => Ordering::Greater,
            _ => sa.cmp(sb),
        });
    }
    let (a, b) = if field.is_nullable() {
        match (a[0], b[0]) {
            (0, 0) => return Ok(Ordering::Equal),
            (0, _) => return Ok(Ordering::Less),
            (_, 0) => return Ok(Ordering::Greater),
            _ => (&a[1..], &b[1..]),
        }
    } else {
        (a, b)
    };
    Ok(match field.ty() {
        FieldType::Bool => a[0].cmp(&b[0]),
        FieldType::Int => {
            let x = i32::from_be_bytes(a[..4].try_into().unwrap());
            let y = i32::from_be_bytes(b[..4].try_into().unwrap());
            x.cmp(&y)
        }
        FieldType::Long => {
            let x = i64::from_be_bytes(a[..8].try_into().unwrap());
            let y = i64::from_be_bytes(b[..8].try_into().unwrap());
            x.cmp(&y)
        }
        FieldType::Float => {
            let x = F32::from(f32::from_be_bytes(a[..4].try_into().unwrap()));
            let y = F32::from(f32::from_be_bytes(b[..4].try_into().unwrap()));
            x.cmp(&y)
        }
        FieldType::Double => {
            let x = F64::from(f64::from_be_bytes(a[..8].try_into().unwrap()));
            let y = F64::from(f64::from_be_bytes(b[..8].try_into().unwrap()));
            x.cmp(&y)
        }
        FieldType::VInt | FieldType::VLong => {
            get_vi64(&mut &a[..])?.cmp(&get_vi64(&mut &b[..])?)
        }
        FieldType::Enum(_) => get_vu64(&mut &a[..])?.cmp(&get_vu64(&mut &b[..])?),
        FieldType::String | FieldType::Bytes => {
            let mut sa = a;
            let mut sb = b;
            get_vu64(&mut sa)?;
            get_vu64(&mut sb)?;
            sa.cmp(sb)
        }
        FieldType::Object => unreachable!("object fields handled above"),
    })
}
