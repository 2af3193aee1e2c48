// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! A tuple co-grouping engine.
//!
//! Heterogeneous, named record sources are unified into one wire layout,
//! encoded by a binary tuple codec, ordered and partitioned by byte-level
//! comparators inside an external shuffle engine, then decoded and fed
//! through a rollup grouping state machine that emits open/close events per
//! hierarchy depth and one iterable run per leaf group.
//!
//! The engine is single-threaded and synchronous per partition; everything
//! distributed (sort, shuffle, scheduling, retries) belongs to the external
//! engine, which only ever sees bytes, the comparators and the partitioner.

#![deny(unused_must_use)]

pub mod codec;
pub mod compare;
pub mod conf;
pub mod group;
pub mod schema;
pub mod sort;
pub mod stream;
pub mod tuple;
pub mod types;

pub use conf::{CoGroupConfig, ConfigBuilder, ConfigError, Job, JobBuilder};
pub use group::{Collector, GroupDriver, GroupHandler, GroupRun};
pub use schema::{Field, Schema, SOURCE_ID_FIELD};
pub use sort::{Direction, SortOrder};
pub use tuple::{DoubleBufferedTuple, GroupKey, Tuple};
pub use types::{EnumType, FieldType, Value};

/// Boxed error raised by user callbacks; propagated unchanged.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("type error: {0}")]
    Type(#[from] types::TypeError),
    #[error("schema error: {0}")]
    Schema(#[from] schema::SchemaError),
    #[error("configuration error: {0}")]
    Config(#[from] conf::ConfigError),
    #[error("codec error: {0}")]
    Codec(#[from] codec::CodecError),
    #[error("stream error: {0}")]
    Stream(#[from] stream::StreamError),
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),
}

impl Error {
    /// Wraps a user-callback error without reinterpreting it.
    pub fn handler(e: impl Into<BoxError>) -> Self {
        Self::Handler(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
