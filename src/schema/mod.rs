// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Record shapes: named, ordered, immutable field lists.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{FieldType, Value};

/// Reserved name of the synthetic source-identifier field.
///
/// User schemas may not declare it; it appears in an ordering only when two
/// or more sources are co-grouped.
pub const SOURCE_ID_FIELD: &str = "source_id";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("duplicated {0}: {1}")]
    Duplicated(&'static str, String),
    #[error("{0}({1}) not found")]
    NotFound(&'static str, String),
    #[error("field name `{0}` is reserved")]
    Reserved(String),
    #[error("schema `{0}` has no fields")]
    Empty(String),
    #[error("default value {value} does not match field `{field}` of type {ty}")]
    DefaultMismatch {
        field: String,
        ty: FieldType,
        value: Value,
    },
    #[error("field `{0}` is not an enum")]
    NotEnum(String),
}

/// A single field of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    name: String,
    ty: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            default: None,
        }
    }

    /// Allows the absent value in this field.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Declares the value readers substitute when the field is missing from
    /// written data (schema evolution).
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &FieldType {
        &self.ty
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Name+type equality, the notion shared across sources. Nullability and
    /// defaults are per-source concerns.
    pub fn matches(&self, other: &Field) -> bool {
        self.name == other.name && self.ty == other.ty
    }

    /// Whether the absent value is legal for this field.
    pub fn accepts_absent(&self) -> bool {
        self.nullable || self.ty.is_object()
    }
}

/// An immutable, ordered, name-unique list of fields.
///
/// Field order defines wire order. Schemas are cheap to clone and share; the
/// name→index map is built exactly once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchemaRepr", into = "SchemaRepr")]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

#[derive(Debug)]
struct SchemaInner {
    name: String,
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self, SchemaError> {
        let name = name.into();
        if fields.is_empty() {
            return Err(SchemaError::Empty(name));
        }
        for field in &fields {
            if field.name() == SOURCE_ID_FIELD {
                return Err(SchemaError::Reserved(field.name().into()));
            }
            if let Some(default) = field.default() {
                if default.is_absent() || !default.matches(field.ty()) {
                    return Err(SchemaError::DefaultMismatch {
                        field: field.name().into(),
                        ty: field.ty().clone(),
                        value: default.clone(),
                    });
                }
            }
        }
        Self::build(name, fields)
    }

    /// Derived common/specific schemas bypass the reserved-name and
    /// non-empty checks: the source-identifier field is theirs to declare,
    /// and a source whose every field is shared has an empty specific part.
    pub(crate) fn for_wire(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::build(name.into(), fields).expect("wire schema fields are pre-validated")
    }

    fn build(name: String, fields: Vec<Field>) -> Result<Self, SchemaError> {
        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.name().to_owned(), i).is_some() {
                return Err(SchemaError::Duplicated("field", field.name().into()));
            }
        }
        Ok(Self {
            inner: Arc::new(SchemaInner {
                name,
                fields,
                index,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.inner.fields
    }

    pub fn len(&self) -> usize {
        self.inner.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.is_empty()
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.inner.fields[i]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.inner.index.get(name).copied()
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.index_of(name).map(|i| self.field(i))
    }

    /// Schemas are interchangeable on the wire iff their ordered
    /// (name, type) lists agree.
    pub fn same_layout(&self, other: &Schema) -> bool {
        self.len() == other.len()
            && self
                .fields()
                .iter()
                .zip(other.fields())
                .all(|(a, b)| a.matches(b))
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.name == other.inner.name && self.inner.fields == other.inner.fields)
    }
}

impl Eq for Schema {}

#[derive(Serialize, Deserialize)]
struct SchemaRepr {
    name: String,
    fields: Vec<Field>,
}

impl TryFrom<SchemaRepr> for Schema {
    type Error = SchemaError;

    fn try_from(repr: SchemaRepr) -> Result<Self, SchemaError> {
        Schema::new(repr.name, repr.fields)
    }
}

impl From<Schema> for SchemaRepr {
    fn from(schema: Schema) -> Self {
        Self {
            name: schema.inner.name.clone(),
            fields: schema.inner.fields.clone(),
        }
    }
}
