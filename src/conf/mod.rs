// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Job configuration: source schemas, orderings, the derived unified
//! layout, and job-level bindings.

mod builder;
mod job;
pub(crate) mod resolved;

use serde::{Deserialize, Serialize};

pub use self::builder::ConfigBuilder;
pub use self::job::{Input, Job, JobBuilder};
pub(crate) use self::resolved::Resolved;
use crate::compare::ComparatorRegistry;
use crate::schema::Schema;
use crate::sort::SortOrder;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no source schemas declared")]
    NoSources,
    #[error("no group-by fields declared")]
    NoGroupBy,
    #[error("duplicated {0}: {1}")]
    Duplicated(&'static str, String),
    #[error("group-by field `{field}` is missing from source `{source}`")]
    GroupFieldMissing { field: String, source: String },
    #[error("sort field `{field}` is missing from source `{source}`")]
    SortFieldMissing { field: String, source: String },
    #[error("field `{field}` is not declared with the same type in every source (source `{source}` disagrees)")]
    FieldMismatch { field: String, source: String },
    #[error("the first {expected} sort fields must be exactly the group-by fields, found `{field}`")]
    GroupNotSortPrefix { field: String, expected: usize },
    #[error("field `{field}` appears in both the common ordering and source `{source}`'s specific ordering")]
    SortedTwice { field: String, source: String },
    #[error("the source identifier may only be ordered when at least two sources are declared")]
    SourceOrderSingleSource,
    #[error("the source identifier cannot use a custom comparator")]
    SourceCustomComparator,
    #[error("the source identifier cannot be a group-by field")]
    SourceInGroupBy,
    #[error("rollup field `{0}` is not a group-by field")]
    RollupNotInGroup(String),
    #[error("unknown source `{0}`")]
    UnknownSource(String),
    #[error("unknown comparator `{0}`")]
    UnknownComparator(String),
    #[error("missing {0} binding")]
    MissingBinding(&'static str),
    #[error("invalid configuration JSON: {0}")]
    Json(String),
}

/// The immutable, validated co-grouping configuration.
///
/// Built once by [`ConfigBuilder`], shipped to workers as JSON, and treated
/// as read-only infrastructure by the codec, the comparators and the
/// grouping engine for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct CoGroupConfig {
    sources: Vec<Schema>,
    group_by: Vec<String>,
    /// Effective primary ordering, including the source-identifier entry
    /// when two or more sources exist.
    sort: SortOrder,
    /// One per source, possibly empty.
    specific_sorts: Vec<SortOrder>,
    rollup_from: Option<String>,
    resolved: Resolved,
}

impl CoGroupConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn sources(&self) -> &[Schema] {
        &self.sources
    }

    pub fn source_index(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name() == name)
    }

    /// Group-by fields as declared.
    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    /// Group-by fields in comparator order (the leading entries of the
    /// primary ordering); rollup depths index this list.
    pub fn group_fields(&self) -> &[String] {
        &self.resolved.group_names
    }

    pub fn sort_order(&self) -> &SortOrder {
        &self.sort
    }

    pub fn specific_sort(&self, source: usize) -> &SortOrder {
        &self.specific_sorts[source]
    }

    pub fn rollup_from(&self) -> Option<&str> {
        self.rollup_from.as_deref()
    }

    /// The unified common schema, source identifier included.
    pub fn common_schema(&self) -> &Schema {
        &self.resolved.common
    }

    /// The non-shared remainder of one source, in wire order.
    pub fn specific_schema(&self, source: usize) -> &Schema {
        &self.resolved.specifics[source]
    }

    pub(crate) fn resolved(&self) -> &Resolved {
        &self.resolved
    }

    /// Serializes the configuration for transport to worker processes.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&ConfigRepr::from(self)).expect("config serialization is infallible")
    }

    /// Rebuilds a configuration shipped by [`to_json`](Self::to_json),
    /// re-running validation and re-resolving custom comparators against
    /// `registry`.
    pub fn from_json(json: &str, registry: &ComparatorRegistry) -> Result<Self, ConfigError> {
        let repr: ConfigRepr =
            serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        let mut builder = ConfigBuilder::new();
        for schema in repr.sources {
            builder = builder.add_source(schema);
        }
        builder = builder.group_by(repr.group_by).sort_by(repr.sort);
        for (source, order) in repr.specific_sorts {
            builder = builder.specific_sort_by(source, order);
        }
        if let Some(rollup) = repr.rollup_from {
            builder = builder.rollup_from(rollup);
        }
        builder.build_with(registry)
    }
}

impl PartialEq for CoGroupConfig {
    fn eq(&self, other: &Self) -> bool {
        self.sources == other.sources
            && self.group_by == other.group_by
            && self.sort == other.sort
            && self.specific_sorts == other.specific_sorts
            && self.rollup_from == other.rollup_from
    }
}

#[derive(Serialize, Deserialize)]
struct ConfigRepr {
    sources: Vec<Schema>,
    group_by: Vec<String>,
    sort: SortOrder,
    /// Keyed by source name; sources without a secondary ordering are
    /// omitted.
    specific_sorts: Vec<(String, SortOrder)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rollup_from: Option<String>,
}

impl From<&CoGroupConfig> for ConfigRepr {
    fn from(config: &CoGroupConfig) -> Self {
        Self {
            sources: config.sources.clone(),
            group_by: config.group_by.clone(),
            sort: config.sort.clone(),
            specific_sorts: config
                .sources
                .iter()
                .zip(&config.specific_sorts)
                .filter(|(_, order)| !order.is_empty())
                .map(|(schema, order)| (schema.name().to_owned(), order.clone()))
                .collect(),
            rollup_from: config.rollup_from.clone(),
        }
    }
}
