// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Step-by-step construction of a [`CoGroupConfig`].
//!
//! Every rule is checked here, once, at build time. Record-processing code
//! never re-validates: it runs against the derived [`Resolved`] layout.

use itertools::Itertools;
use tracing::debug;

use super::resolved::Resolved;
use super::{CoGroupConfig, ConfigError};
use crate::compare::ComparatorRegistry;
use crate::schema::{Schema, SOURCE_ID_FIELD};
use crate::sort::{Direction, SortOrder};

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    sources: Vec<Schema>,
    group_by: Vec<String>,
    sort: Option<SortOrder>,
    specific_sorts: Vec<(String, SortOrder)>,
    rollup_from: Option<String>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares one named input source. Source ordinals follow declaration
    /// order.
    pub fn add_source(mut self, schema: Schema) -> Self {
        self.sources.push(schema);
        self
    }

    /// Declares the fields defining record equality for grouping. They must
    /// lead the primary ordering.
    pub fn group_by<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.group_by = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declares the primary ordering. Defaults to every group-by field
    /// ascending.
    pub fn sort_by(mut self, order: SortOrder) -> Self {
        self.sort = Some(order);
        self
    }

    /// Declares a secondary ordering over `source`'s non-shared fields.
    pub fn specific_sort_by(mut self, source: impl Into<String>, order: SortOrder) -> Self {
        self.specific_sorts.push((source.into(), order));
        self
    }

    /// Sets the rollup boundary: open/close events fire from this group-by
    /// field inwards.
    pub fn rollup_from(mut self, field: impl Into<String>) -> Self {
        self.rollup_from = Some(field.into());
        self
    }

    pub fn build(self) -> Result<CoGroupConfig, ConfigError> {
        self.build_with(&ComparatorRegistry::default())
    }

    /// Builds, resolving custom comparator names through `registry`.
    pub fn build_with(self, registry: &ComparatorRegistry) -> Result<CoGroupConfig, ConfigError> {
        // rule 1: at least one source, at least one group-by field
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if self.group_by.is_empty() {
            return Err(ConfigError::NoGroupBy);
        }
        if let Some(name) = self.sources.iter().map(Schema::name).duplicates().next() {
            return Err(ConfigError::Duplicated("source", name.into()));
        }
        if let Some(name) = self.group_by.iter().duplicates().next() {
            return Err(ConfigError::Duplicated("group-by field", name.clone()));
        }

        // rule 2: group-by fields exist, with identical name+type, everywhere
        for name in &self.group_by {
            if name == SOURCE_ID_FIELD {
                return Err(ConfigError::SourceInGroupBy);
            }
            self.check_shared_field(name, true)?;
        }

        let mut sort = self
            .sort
            .clone()
            .unwrap_or_else(|| {
                self.group_by
                    .iter()
                    .fold(SortOrder::new(), |order, name| order.asc(name))
            });

        if let Some(name) = sort.fields().iter().map(|f| f.name.as_str()).duplicates().next() {
            return Err(ConfigError::Duplicated("sort field", name.into()));
        }
        // the group-by fields are a prefix of the ordering (in any order)
        if sort.len() < self.group_by.len() {
            return Err(ConfigError::GroupNotSortPrefix {
                field: self
                    .group_by
                    .iter()
                    .find(|g| !sort.fields().iter().any(|f| &f.name == *g))
                    .cloned()
                    .unwrap_or_default(),
                expected: self.group_by.len(),
            });
        }
        for entry in &sort.fields()[..self.group_by.len()] {
            if !self.group_by.contains(&entry.name) {
                return Err(ConfigError::GroupNotSortPrefix {
                    field: entry.name.clone(),
                    expected: self.group_by.len(),
                });
            }
        }

        // rules 3 and 5: ordering fields shared and identical across sources;
        // the source identifier only with two or more sources
        for entry in sort.fields() {
            if entry.name == SOURCE_ID_FIELD {
                if self.sources.len() < 2 {
                    return Err(ConfigError::SourceOrderSingleSource);
                }
                if entry.comparator.is_some() {
                    return Err(ConfigError::SourceCustomComparator);
                }
                continue;
            }
            self.check_shared_field(&entry.name, false)?;
        }
        // rule 5: auto-append the source identifier when it was not placed
        if self.sources.len() > 1 && sort.source_position().is_none() {
            sort = sort.by_source(Direction::Asc);
        }

        // rule 4 and per-source secondary orderings
        let mut specific_sorts = vec![SortOrder::new(); self.sources.len()];
        for (source_name, order) in &self.specific_sorts {
            let s = self
                .sources
                .iter()
                .position(|schema| schema.name() == source_name)
                .ok_or_else(|| ConfigError::UnknownSource(source_name.clone()))?;
            if let Some(name) = order.fields().iter().map(|f| f.name.as_str()).duplicates().next() {
                return Err(ConfigError::Duplicated("specific sort field", name.into()));
            }
            for entry in order.fields() {
                if sort.fields().iter().any(|f| f.name == entry.name) {
                    return Err(ConfigError::SortedTwice {
                        field: entry.name.clone(),
                        source: source_name.clone(),
                    });
                }
                if self.sources[s].field_by_name(&entry.name).is_none() {
                    return Err(ConfigError::SortFieldMissing {
                        field: entry.name.clone(),
                        source: source_name.clone(),
                    });
                }
            }
            specific_sorts[s] = order.clone();
        }

        // rule 6: the rollup boundary is a group-by field
        if let Some(rollup) = &self.rollup_from {
            if !self.group_by.contains(rollup) {
                return Err(ConfigError::RollupNotInGroup(rollup.clone()));
            }
        }

        let resolved = Resolved::derive(
            &self.sources,
            self.group_by.len(),
            &sort,
            &specific_sorts,
            self.rollup_from.as_deref(),
            registry,
        )?;
        debug!(
            sources = self.sources.len(),
            common = resolved.common.len(),
            rollup = resolved.rollup_depth.is_some(),
            "co-group configuration built"
        );
        Ok(CoGroupConfig {
            sources: self.sources,
            group_by: self.group_by,
            sort,
            specific_sorts,
            rollup_from: self.rollup_from,
            resolved,
        })
    }

    /// Rules 2/3: `name` must exist, with identical name+type, in every
    /// source. A field known to only some sources is a configuration error,
    /// never a partial-union schema.
    fn check_shared_field(&self, name: &str, group: bool) -> Result<(), ConfigError> {
        let missing = |source: &Schema| {
            if group {
                ConfigError::GroupFieldMissing {
                    field: name.into(),
                    source: source.name().into(),
                }
            } else {
                ConfigError::SortFieldMissing {
                    field: name.into(),
                    source: source.name().into(),
                }
            }
        };
        let Some(proto) = self.sources[0].field_by_name(name) else {
            return Err(missing(&self.sources[0]));
        };
        for schema in &self.sources[1..] {
            match schema.field_by_name(name) {
                None => return Err(missing(schema)),
                Some(field) if proto.matches(field) => {}
                Some(_) => {
                    return Err(ConfigError::FieldMismatch {
                        field: name.into(),
                        source: schema.name().into(),
                    })
                }
            }
        }
        Ok(())
    }
}
