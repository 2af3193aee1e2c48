// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Routes encoded records to workers by their group prefix.

use std::sync::Arc;

use crate::codec::{field_len, CodecError};
use crate::conf::CoGroupConfig;

/// Hashes the encoded group-prefix bytes modulo the worker count.
///
/// Field encodings are canonical, so equal group-by values produce identical
/// prefix bytes: the partitioner inspects exactly the span the group
/// comparator does, and records that compare equal land on one worker. With
/// a rollup boundary only the fields up to and including the boundary are
/// hashed, so every run sharing the rollup prefix reaches the same worker.
pub struct Partitioner {
    config: Arc<CoGroupConfig>,
}

impl Partitioner {
    pub fn new(config: Arc<CoGroupConfig>) -> Self {
        Self { config }
    }

    pub fn partition(&self, record: &[u8], partitions: usize) -> Result<usize, CodecError> {
        debug_assert!(partitions > 0);
        let resolved = self.config.resolved();
        let mut len = 0;
        for slot in 0..resolved.partition_prefix() {
            len += field_len(resolved.common.field(slot), &record[len..])?;
        }
        Ok(crc32fast::hash(&record[..len]) as usize % partitions)
    }
}
