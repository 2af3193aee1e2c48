// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Ordering specifications: which fields order a co-group, in which
//! direction, compared how.

use std::cmp::Ordering;

use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::schema::SOURCE_ID_FIELD;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[display("ASC")]
    Asc,
    #[display("DESC")]
    Desc,
}

impl Direction {
    /// Scales a raw comparison by this direction.
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            Self::Asc => ord,
            Self::Desc => ord.reverse(),
        }
    }
}

/// One entry of a [`SortOrder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub name: String,
    pub direction: Direction,
    /// Registry name of a custom comparator, resolved once at
    /// configuration-build time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparator: Option<String>,
}

/// An ordered list of sort criteria.
///
/// Used both for the primary ordering shared by every source (where it may
/// contain one source-identifier entry) and for per-source secondary
/// orderings over source-specific fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortOrder {
    fields: Vec<SortField>,
}

impl SortOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(self, name: impl Into<String>) -> Self {
        self.field(name, Direction::Asc)
    }

    pub fn desc(self, name: impl Into<String>) -> Self {
        self.field(name, Direction::Desc)
    }

    pub fn field(mut self, name: impl Into<String>, direction: Direction) -> Self {
        self.fields.push(SortField {
            name: name.into(),
            direction,
            comparator: None,
        });
        self
    }

    /// Orders by a custom comparator looked up from the registry by name.
    pub fn custom(
        mut self,
        name: impl Into<String>,
        direction: Direction,
        comparator: impl Into<String>,
    ) -> Self {
        self.fields.push(SortField {
            name: name.into(),
            direction,
            comparator: Some(comparator.into()),
        });
        self
    }

    /// Adds the synthetic source-identifier entry: records tying on every
    /// preceding field order by their source ordinal.
    pub fn by_source(self, direction: Direction) -> Self {
        self.field(SOURCE_ID_FIELD, direction)
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the source-identifier entry, if present.
    pub fn source_position(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.name == SOURCE_ID_FIELD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction() {
        assert_eq!(Direction::Asc.apply(Ordering::Less), Ordering::Less);
        assert_eq!(Direction::Desc.apply(Ordering::Less), Ordering::Greater);
        assert_eq!(Direction::Desc.apply(Ordering::Equal), Ordering::Equal);
    }

    #[test]
    fn test_sort_order_builder() {
        let order = SortOrder::new()
            .asc("url")
            .desc("date")
            .by_source(Direction::Asc);
        assert_eq!(order.len(), 3);
        assert_eq!(order.fields()[1].direction, Direction::Desc);
        assert_eq!(order.source_position(), Some(2));
    }

    #[test]
    fn test_sort_order_serde() {
        let order = SortOrder::new()
            .asc("a")
            .custom("b", Direction::Desc, "by_domain");
        let json = serde_json::to_string(&order).unwrap();
        let back: SortOrder = serde_json::from_str(&json).unwrap();
        assert_eq!(order, back);
    }
}
