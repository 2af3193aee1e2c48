// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! The rollup grouping engine and its user-facing contracts.
//!
//! A partition arrives as a stream the external engine already sorted into
//! contiguous runs sharing the group-by prefix. The driver decodes it
//! record-by-record into a per-source pair of scratch tuples, detects group
//! boundaries by comparing against the previous key, and emits open/close
//! events per rollup depth plus one leaf run per innermost key.

mod rollup;

pub use self::rollup::{GroupDriver, GroupRun};
use crate::conf::CoGroupConfig;
use crate::schema::Field;
use crate::tuple::{GroupKey, Tuple};

/// Receives output records.
pub trait Collector {
    fn collect(&mut self, tuple: &Tuple) -> crate::Result<()>;
}

/// Collecting into a `Vec` clones each tuple out of the shared decode
/// buffer.
impl Collector for Vec<Tuple> {
    fn collect(&mut self, tuple: &Tuple) -> crate::Result<()> {
        self.push(tuple.clone());
        Ok(())
    }
}

/// User code that turns external input into tuples of one source schema.
pub trait TupleProducer {
    fn produce(&mut self, out: &mut dyn Collector) -> crate::Result<()>;
}

/// Per-partition context handed to handlers.
pub struct Context<'a> {
    pub partition: usize,
    pub config: &'a CoGroupConfig,
}

/// Receives group boundaries and leaf runs.
///
/// `open_group`/`close_group` fire only when a rollup boundary is
/// configured; simple grouping delivers leaf runs alone. Errors returned
/// here propagate unchanged and abort the partition.
pub trait GroupHandler {
    /// A group at `depth` starts; `key` is the first record of the group.
    fn open_group(
        &mut self,
        depth: usize,
        field: &Field,
        key: &Tuple,
        ctx: &Context<'_>,
        out: &mut dyn Collector,
    ) -> crate::Result<()> {
        let _ = (depth, field, key, ctx, out);
        Ok(())
    }

    /// A group at `depth` ends; `key` is the last record of the group.
    fn close_group(
        &mut self,
        depth: usize,
        field: &Field,
        key: &Tuple,
        ctx: &Context<'_>,
        out: &mut dyn Collector,
    ) -> crate::Result<()> {
        let _ = (depth, field, key, ctx, out);
        Ok(())
    }

    /// One leaf run: every tuple sharing the innermost group-by key, in sort
    /// order. The run is a forward-only cursor and cannot be re-iterated;
    /// whatever the handler leaves unconsumed, the driver drains.
    fn on_group(
        &mut self,
        key: &GroupKey,
        tuples: &mut GroupRun<'_>,
        ctx: &Context<'_>,
        out: &mut dyn Collector,
    ) -> crate::Result<()>;
}
