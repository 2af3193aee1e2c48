// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Schema-bound, reusable record instances.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::schema::{Schema, SchemaError};
use crate::types::{FieldType, Value};

/// A mutable record bound to a [`Schema`].
///
/// One tuple is created per record source and reused across records:
/// producers and the decoder overwrite field slots in place instead of
/// allocating a new record per input. Field access is index-based; name
/// resolution goes through the schema's index, built once.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    schema: Schema,
    values: Vec<Value>,
}

impl Tuple {
    /// Creates a tuple with every field set to its declared default, or the
    /// absent value when no default is declared.
    pub fn new(schema: Schema) -> Self {
        let values = schema
            .fields()
            .iter()
            .map(|f| f.default().cloned().unwrap_or(Value::Absent))
            .collect();
        Self { schema, values }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at field position `i`. Panics when out of range.
    pub fn get(&self, i: usize) -> &Value {
        &self.values[i]
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    /// Overwrites the value at field position `i`. Panics when out of range.
    pub fn set(&mut self, i: usize, value: impl Into<Value>) {
        self.values[i] = value.into();
    }

    pub fn set_named(&mut self, name: &str, value: impl Into<Value>) -> Result<(), SchemaError> {
        let i = self
            .schema
            .index_of(name)
            .ok_or_else(|| SchemaError::NotFound("field", name.into()))?;
        self.values[i] = value.into();
        Ok(())
    }

    /// Sets an enum field by symbol, resolving the ordinal through the
    /// schema's symbol table.
    pub fn set_enum(&mut self, name: &str, symbol: &str) -> Result<(), SchemaError> {
        let i = self
            .schema
            .index_of(name)
            .ok_or_else(|| SchemaError::NotFound("field", name.into()))?;
        let FieldType::Enum(e) = self.schema.field(i).ty() else {
            return Err(SchemaError::NotEnum(name.into()));
        };
        let ordinal = e
            .ordinal(symbol)
            .ok_or_else(|| SchemaError::NotFound("enum symbol", symbol.into()))?;
        self.values[i] = Value::Enum(ordinal);
        Ok(())
    }

    /// Resolves an enum field's current ordinal back to its symbol.
    pub fn enum_symbol(&self, name: &str) -> Option<&str> {
        let i = self.schema.index_of(name)?;
        let FieldType::Enum(e) = self.schema.field(i).ty() else {
            return None;
        };
        match &self.values[i] {
            Value::Enum(ordinal) => e.symbol(*ordinal),
            _ => None,
        }
    }
}

/// Two backing tuples with an explicit swap.
///
/// After decoding record N+1 into the fresh slot, record N is still readable
/// as `previous()` without a deep copy; the grouping engine compares the
/// incoming key against the previous one this way.
#[derive(Debug)]
pub struct DoubleBufferedTuple {
    slots: [Tuple; 2],
    active: usize,
}

impl DoubleBufferedTuple {
    pub fn new(schema: Schema) -> Self {
        Self {
            slots: [Tuple::new(schema.clone()), Tuple::new(schema)],
            active: 0,
        }
    }

    pub fn current(&self) -> &Tuple {
        &self.slots[self.active]
    }

    pub fn current_mut(&mut self) -> &mut Tuple {
        &mut self.slots[self.active]
    }

    pub fn previous(&self) -> &Tuple {
        &self.slots[1 - self.active]
    }

    /// Makes the previous slot current; the next decode overwrites what is
    /// now `previous()`.
    pub fn swap(&mut self) {
        self.active = 1 - self.active;
    }

    pub(crate) fn active_slot(&self) -> usize {
        self.active
    }

    pub(crate) fn slot(&self, i: usize) -> &Tuple {
        &self.slots[i]
    }
}

/// An owned snapshot of one group's group-by values, in group order.
///
/// Handlers receive this restricted view instead of the full record: the
/// backing tuple is a reused decode buffer and does not outlive the group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupKey {
    names: Arc<[String]>,
    values: SmallVec<[Value; 4]>,
}

impl GroupKey {
    pub(crate) fn new(names: Arc<[String]>, values: SmallVec<[Value; 4]>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at group depth `d`. Panics when out of range.
    pub fn get(&self, d: usize) -> &Value {
        &self.values[d]
    }

    pub fn name(&self, d: usize) -> &str {
        &self.names[d]
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.values[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::types::EnumType;

    fn schema() -> Schema {
        Schema::new(
            "visit",
            vec![
                Field::new("url", FieldType::String),
                Field::new("hits", FieldType::VInt).with_default(1i32),
                Field::new(
                    "kind",
                    FieldType::Enum(EnumType::new("kind", ["WEB", "MOBILE"]).unwrap()),
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_tuple_defaults_and_set() {
        let mut t = Tuple::new(schema());
        assert_eq!(t.get(0), &Value::Absent);
        assert_eq!(t.get(1), &Value::Int(1));

        t.set_named("url", "http://a").unwrap();
        assert_eq!(t.get_named("url"), Some(&Value::String("http://a".into())));
        assert!(t.set_named("nope", 1i32).is_err());
    }

    #[test]
    fn test_enum_symbols() {
        let mut t = Tuple::new(schema());
        t.set_enum("kind", "MOBILE").unwrap();
        assert_eq!(t.get(2), &Value::Enum(1));
        assert_eq!(t.enum_symbol("kind"), Some("MOBILE"));
        assert_eq!(
            t.set_enum("kind", "TV").unwrap_err(),
            SchemaError::NotFound("enum symbol", "TV".into())
        );
        assert_eq!(
            t.set_enum("url", "WEB").unwrap_err(),
            SchemaError::NotEnum("url".into())
        );
    }

    #[test]
    fn test_double_buffer_swap() {
        let mut pair = DoubleBufferedTuple::new(schema());
        pair.current_mut().set_named("url", "first").unwrap();
        pair.swap();
        pair.current_mut().set_named("url", "second").unwrap();

        assert_eq!(
            pair.previous().get_named("url"),
            Some(&Value::String("first".into()))
        );
        assert_eq!(
            pair.current().get_named("url"),
            Some(&Value::String("second".into()))
        );

        // the slot holding "first" is overwritten only after another swap
        pair.swap();
        pair.current_mut().set_named("url", "third").unwrap();
        assert_eq!(
            pair.previous().get_named("url"),
            Some(&Value::String("second".into()))
        );
    }
}
