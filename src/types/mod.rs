// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Logical field types and run-time values.

mod value;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use self::value::*;

/// Physical type of a tuple field.
///
/// The type fixes both the wire encoding and the default byte-level
/// comparison. `Int`/`Long` are fixed-width big-endian; `VInt`/`VLong` carry
/// the same logical values as zig-zag varints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int,
    Long,
    VInt,
    VLong,
    Float,
    Double,
    String,
    Bytes,
    Enum(EnumType),
    Object,
}

impl FieldType {
    /// Object fields may always hold the absent value; everything else needs
    /// an explicit nullable marker on the field.
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "BOOL"),
            Self::Int => write!(f, "INT"),
            Self::Long => write!(f, "LONG"),
            Self::VInt => write!(f, "VINT"),
            Self::VLong => write!(f, "VLONG"),
            Self::Float => write!(f, "FLOAT"),
            Self::Double => write!(f, "DOUBLE"),
            Self::String => write!(f, "STRING"),
            Self::Bytes => write!(f, "BYTES"),
            Self::Enum(e) => write!(f, "ENUM({})", e.name()),
            Self::Object => write!(f, "OBJECT"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("duplicated symbol in enum `{0}`: {1}")]
    DuplicatedSymbol(String, String),
    #[error("enum `{0}` has no symbols")]
    EmptySymbols(String),
}

/// A closed enumeration with stable ordinals.
///
/// Symbols encode by ordinal, so the symbol list order is part of the wire
/// contract. The symbol table is built once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "EnumTypeRepr", into = "EnumTypeRepr")]
pub struct EnumType {
    inner: Arc<EnumTypeInner>,
}

#[derive(Debug)]
struct EnumTypeInner {
    name: String,
    symbols: Vec<String>,
    ordinals: HashMap<String, u32>,
}

impl EnumType {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        symbols: impl IntoIterator<Item = S>,
    ) -> Result<Self, TypeError> {
        let name = name.into();
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        if symbols.is_empty() {
            return Err(TypeError::EmptySymbols(name));
        }
        let mut ordinals = HashMap::with_capacity(symbols.len());
        for (ordinal, symbol) in symbols.iter().enumerate() {
            if ordinals.insert(symbol.clone(), ordinal as u32).is_some() {
                return Err(TypeError::DuplicatedSymbol(name, symbol.clone()));
            }
        }
        Ok(Self {
            inner: Arc::new(EnumTypeInner {
                name,
                symbols,
                ordinals,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn symbols(&self) -> &[String] {
        &self.inner.symbols
    }

    pub fn len(&self) -> usize {
        self.inner.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        // a valid enum always has at least one symbol
        false
    }

    pub fn ordinal(&self, symbol: &str) -> Option<u32> {
        self.inner.ordinals.get(symbol).copied()
    }

    pub fn symbol(&self, ordinal: u32) -> Option<&str> {
        self.inner.symbols.get(ordinal as usize).map(|s| s.as_str())
    }
}

impl PartialEq for EnumType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.name == other.inner.name && self.inner.symbols == other.inner.symbols)
    }
}

impl Eq for EnumType {}

impl std::hash::Hash for EnumType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.name.hash(state);
        self.inner.symbols.hash(state);
    }
}

#[derive(Serialize, Deserialize)]
struct EnumTypeRepr {
    name: String,
    symbols: Vec<String>,
}

impl TryFrom<EnumTypeRepr> for EnumType {
    type Error = TypeError;

    fn try_from(repr: EnumTypeRepr) -> Result<Self, TypeError> {
        EnumType::new(repr.name, repr.symbols)
    }
}

impl From<EnumType> for EnumTypeRepr {
    fn from(e: EnumType) -> Self {
        Self {
            name: e.inner.name.clone(),
            symbols: e.inner.symbols.clone(),
        }
    }
}
