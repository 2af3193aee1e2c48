// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! The unified wire layout derived from a validated configuration.
//!
//! Computed exactly once per job configuration; every other component
//! treats it as read-only infrastructure.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::ConfigError;
use crate::compare::{ComparatorRegistry, ValueComparator};
use crate::schema::{Field, Schema, SOURCE_ID_FIELD};
use crate::sort::{Direction, SortField, SortOrder};
use crate::types::FieldType;

/// Direction plus optional custom comparator for one wire slot, resolved
/// from the registry at configuration-build time.
#[derive(Clone)]
pub(crate) struct ResolvedCmp {
    pub(crate) direction: Direction,
    pub(crate) custom: Option<Arc<dyn ValueComparator>>,
}

impl fmt::Debug for ResolvedCmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCmp")
            .field("direction", &self.direction)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

/// Common/specific schemas plus the per-source translation tables between
/// tuple positions and wire positions.
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    /// Primary-ordering fields in order, with the source-identifier at its
    /// declared or auto-appended slot when two or more sources exist.
    pub(crate) common: Schema,
    pub(crate) source_slot: Option<usize>,
    /// Per source: secondary-ordered fields first, then the source's
    /// remaining non-shared fields in declaration order.
    pub(crate) specifics: Vec<Schema>,
    /// Per source: common wire slot → tuple slot (`None` at the
    /// source-identifier slot).
    pub(crate) common_to_tuple: Vec<SmallVec<[Option<usize>; 8]>>,
    /// Per source: specific wire slot → tuple slot.
    pub(crate) specific_to_tuple: Vec<SmallVec<[usize; 8]>>,
    /// Per source: group depth → tuple slot.
    pub(crate) group_to_tuple: Vec<SmallVec<[usize; 4]>>,
    /// Group-by fields in comparator order (the leading sort entries).
    pub(crate) group_names: Arc<[String]>,
    /// Depth of the rollup boundary within `group_names`.
    pub(crate) rollup_depth: Option<usize>,
    /// One entry per common wire slot.
    pub(crate) common_cmp: Vec<ResolvedCmp>,
    /// Per source: one entry per secondary-ordered specific slot. Specific
    /// fields beyond the secondary ordering are encoded but never compared.
    pub(crate) specific_cmp: Vec<Vec<ResolvedCmp>>,
}

impl Resolved {
    /// Derives the unified layout. Assumes the builder has already enforced
    /// the validation rules; this only adds comparator resolution failures.
    pub(crate) fn derive(
        sources: &[Schema],
        group_len: usize,
        sort: &SortOrder,
        specific_sorts: &[SortOrder],
        rollup_from: Option<&str>,
        registry: &ComparatorRegistry,
    ) -> Result<Self, ConfigError> {
        let mut common_fields = Vec::with_capacity(sort.len());
        let mut common_cmp = Vec::with_capacity(sort.len());
        let mut source_slot = None;
        for (slot, entry) in sort.fields().iter().enumerate() {
            if entry.name == SOURCE_ID_FIELD {
                source_slot = Some(slot);
                common_fields.push(Field::new(SOURCE_ID_FIELD, FieldType::VInt));
                common_cmp.push(ResolvedCmp {
                    direction: entry.direction,
                    custom: None,
                });
                continue;
            }
            let base = sources[0]
                .field_by_name(&entry.name)
                .expect("ordering fields are validated against every source");
            let mut field = Field::new(&entry.name, base.ty().clone());
            // the wire layout must admit the absent value when any source may
            // produce it
            if sources
                .iter()
                .any(|s| s.field_by_name(&entry.name).is_some_and(Field::is_nullable))
            {
                field = field.nullable();
            }
            common_fields.push(field);
            common_cmp.push(ResolvedCmp {
                direction: entry.direction,
                custom: resolve_custom(registry, entry)?,
            });
        }
        let common = Schema::for_wire("common", common_fields);

        let group_names: Arc<[String]> = sort.fields()[..group_len]
            .iter()
            .map(|f| f.name.clone())
            .collect();
        let rollup_depth = rollup_from.map(|name| {
            group_names
                .iter()
                .position(|n| n == name)
                .expect("rollup field is validated against the group-by list")
        });

        let ordered: HashSet<&str> = sort.fields().iter().map(|f| f.name.as_str()).collect();
        let mut specifics = Vec::with_capacity(sources.len());
        let mut common_to_tuple = Vec::with_capacity(sources.len());
        let mut specific_to_tuple = Vec::with_capacity(sources.len());
        let mut group_to_tuple = Vec::with_capacity(sources.len());
        let mut specific_cmp = Vec::with_capacity(sources.len());
        for (s, schema) in sources.iter().enumerate() {
            let c2t: SmallVec<[Option<usize>; 8]> = common
                .fields()
                .iter()
                .enumerate()
                .map(|(slot, f)| {
                    if Some(slot) == source_slot {
                        None
                    } else {
                        Some(
                            schema
                                .index_of(f.name())
                                .expect("ordering fields are validated against every source"),
                        )
                    }
                })
                .collect();
            common_to_tuple.push(c2t);

            let secondary = &specific_sorts[s];
            let mut fields = Vec::new();
            let mut s2t: SmallVec<[usize; 8]> = SmallVec::new();
            let mut cmp = Vec::with_capacity(secondary.len());
            for entry in secondary.fields() {
                let i = schema
                    .index_of(&entry.name)
                    .expect("secondary ordering fields are validated against their source");
                fields.push(schema.field(i).clone());
                s2t.push(i);
                cmp.push(ResolvedCmp {
                    direction: entry.direction,
                    custom: resolve_custom(registry, entry)?,
                });
            }
            for (i, field) in schema.fields().iter().enumerate() {
                if ordered.contains(field.name())
                    || secondary.fields().iter().any(|e| e.name == field.name())
                {
                    continue;
                }
                fields.push(field.clone());
                s2t.push(i);
            }
            specifics.push(Schema::for_wire(schema.name(), fields));
            specific_to_tuple.push(s2t);
            specific_cmp.push(cmp);

            group_to_tuple.push(
                group_names
                    .iter()
                    .map(|n| {
                        schema
                            .index_of(n)
                            .expect("group-by fields are validated against every source")
                    })
                    .collect(),
            );
        }

        Ok(Self {
            common,
            source_slot,
            specifics,
            common_to_tuple,
            specific_to_tuple,
            group_to_tuple,
            group_names,
            rollup_depth,
            common_cmp,
            specific_cmp,
        })
    }

    pub(crate) fn group_len(&self) -> usize {
        self.group_names.len()
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.group_len() - 1
    }

    /// First depth that emits open/close events. Depths below never change
    /// inside the runs a partition receives.
    pub(crate) fn min_depth(&self) -> usize {
        self.rollup_depth.unwrap_or_else(|| self.max_depth())
    }

    /// How many leading common fields the partitioner hashes: the rollup
    /// field and everything before it, or the whole group prefix without
    /// rollup.
    pub(crate) fn partition_prefix(&self) -> usize {
        match self.rollup_depth {
            Some(d) => d + 1,
            None => self.group_len(),
        }
    }
}

fn resolve_custom(
    registry: &ComparatorRegistry,
    entry: &SortField,
) -> Result<Option<Arc<dyn ValueComparator>>, ConfigError> {
    entry
        .comparator
        .as_ref()
        .map(|name| {
            registry
                .get(name)
                .ok_or_else(|| ConfigError::UnknownComparator(name.clone()))
        })
        .transpose()
}
