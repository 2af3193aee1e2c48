// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! The grouping state machine.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::{Collector, Context, GroupHandler};
use crate::codec::TupleDeserializer;
use crate::compare::ValueComparator;
use crate::conf::CoGroupConfig;
use crate::tuple::{DoubleBufferedTuple, GroupKey, Tuple};

/// Where the stream stands after a leaf run is exhausted.
enum Boundary {
    /// Still inside a run; only valid while a [`GroupRun`] is live.
    Pending,
    /// The freshly decoded key first differs from the previous one at this
    /// group depth.
    Mismatch(usize),
    Eof,
}

/// Drives sorted partitions through a [`GroupHandler`], one at a time.
///
/// The driver is single-threaded: it owns one pair of decode buffers per
/// source and reuses them for every record it processes. Nothing here is
/// shared across threads.
pub struct GroupDriver {
    config: Arc<CoGroupConfig>,
    deserializer: TupleDeserializer,
    pool: Vec<DoubleBufferedTuple>,
    /// `(source, slot)` of the most recently decoded record.
    cur: Option<(usize, usize)>,
    /// `(source, slot)` of the record before it. Distinct from
    /// `pool[source].previous()`: the previous record may live in another
    /// source's buffer pair.
    prev: Option<(usize, usize)>,
    boundary: Boundary,
}

impl GroupDriver {
    pub fn new(config: Arc<CoGroupConfig>) -> Self {
        let pool = config
            .sources()
            .iter()
            .map(|schema| DoubleBufferedTuple::new(schema.clone()))
            .collect();
        Self {
            deserializer: TupleDeserializer::new(config.clone()),
            config,
            pool,
            cur: None,
            prev: None,
            boundary: Boundary::Pending,
        }
    }

    /// Processes one sorted partition, emitting rollup events per the
    /// configured boundary. A decode or handler failure aborts the partition
    /// and surfaces unchanged.
    pub fn process(
        &mut self,
        partition: usize,
        records: impl IntoIterator<Item = crate::Result<Bytes>>,
        handler: &mut dyn GroupHandler,
        out: &mut dyn Collector,
    ) -> crate::Result<()> {
        let mut records = records.into_iter();
        self.run(partition, &mut records, handler, out, true)
    }

    /// The map-local pre-aggregation pass: the same machine over a
    /// map-local sorted run, leaf groups only, no rollup events. It may run
    /// zero, one or many times per key before the real grouping.
    pub fn combine(
        &mut self,
        partition: usize,
        records: impl IntoIterator<Item = crate::Result<Bytes>>,
        handler: &mut dyn GroupHandler,
        out: &mut dyn Collector,
    ) -> crate::Result<()> {
        let mut records = records.into_iter();
        self.run(partition, &mut records, handler, out, false)
    }

    fn run(
        &mut self,
        partition: usize,
        records: &mut dyn Iterator<Item = crate::Result<Bytes>>,
        handler: &mut dyn GroupHandler,
        out: &mut dyn Collector,
        rollup: bool,
    ) -> crate::Result<()> {
        let config = self.config.clone();
        let config: &CoGroupConfig = &config;
        let resolved = config.resolved();
        let ctx = Context { partition, config };
        let emit = rollup && resolved.rollup_depth.is_some();
        let min_depth = resolved.min_depth();
        let max_depth = resolved.max_depth();

        self.cur = None;
        self.prev = None;
        self.boundary = Boundary::Pending;

        let Some(first) = records.next() else {
            return Ok(());
        };
        self.decode_record(&first?)?;
        debug!(partition, rollup = emit, "partition started");

        if emit {
            for depth in min_depth..=max_depth {
                handler.open_group(
                    depth,
                    resolved.common.field(depth),
                    self.current_tuple(),
                    &ctx,
                    out,
                )?;
            }
        }
        loop {
            let key = self.group_key();
            {
                let mut tuples = GroupRun {
                    driver: &mut *self,
                    records: &mut *records,
                    state: RunState::First,
                };
                handler.on_group(&key, &mut tuples, &ctx, out)?;
                // the run is forward-only; whatever the handler left behind
                // still has to move the stream to the next boundary
                while tuples.next_tuple()?.is_some() {}
            }
            match std::mem::replace(&mut self.boundary, Boundary::Pending) {
                Boundary::Eof => {
                    if emit {
                        for depth in (min_depth..=max_depth).rev() {
                            handler.close_group(
                                depth,
                                resolved.common.field(depth),
                                self.current_tuple(),
                                &ctx,
                                out,
                            )?;
                        }
                    }
                    debug!(partition, "partition finished");
                    return Ok(());
                }
                Boundary::Mismatch(depth) => {
                    // depths below the rollup boundary never emit events
                    let depth = depth.max(min_depth);
                    if emit {
                        for d in (depth..=max_depth).rev() {
                            handler.close_group(
                                d,
                                resolved.common.field(d),
                                self.previous_tuple(),
                                &ctx,
                                out,
                            )?;
                        }
                        for d in depth..=max_depth {
                            handler.open_group(
                                d,
                                resolved.common.field(d),
                                self.current_tuple(),
                                &ctx,
                                out,
                            )?;
                        }
                    }
                }
                Boundary::Pending => unreachable!("drained group run always leaves a boundary"),
            }
        }
    }

    /// Decodes into the writing source's inactive buffer slot; the record
    /// decoded before stays readable through `prev`.
    fn decode_record(&mut self, record: &[u8]) -> crate::Result<()> {
        let source = self.deserializer.peek_source(record)?;
        self.pool[source].swap();
        self.deserializer
            .deserialize(record, self.pool[source].current_mut())?;
        self.prev = self.cur;
        self.cur = Some((source, self.pool[source].active_slot()));
        Ok(())
    }

    fn current_tuple(&self) -> &Tuple {
        let (source, slot) = self.cur.expect("a record has been decoded");
        self.pool[source].slot(slot)
    }

    fn previous_tuple(&self) -> &Tuple {
        let (source, slot) = self.prev.expect("two records have been decoded");
        self.pool[source].slot(slot)
    }

    /// Lowest group depth at which the current and previous keys differ,
    /// under the same per-field comparators the group comparator uses.
    fn mismatch_depth(&self) -> Option<usize> {
        let resolved = self.config.resolved();
        let prev = self.previous_tuple();
        let cur = self.current_tuple();
        let (ps, _) = self.prev.expect("two records have been decoded");
        let (cs, _) = self.cur.expect("a record has been decoded");
        (0..resolved.group_len()).find(|&depth| {
            let a = prev.get(resolved.group_to_tuple[ps][depth]);
            let b = cur.get(resolved.group_to_tuple[cs][depth]);
            !group_values_equal(resolved.common_cmp[depth].custom.as_deref(), a, b)
        })
    }

    fn group_key(&self) -> GroupKey {
        let resolved = self.config.resolved();
        let (source, slot) = self.cur.expect("a record has been decoded");
        let tuple = self.pool[source].slot(slot);
        let values = resolved.group_to_tuple[source]
            .iter()
            .map(|&i| tuple.get(i).clone())
            .collect();
        GroupKey::new(resolved.group_names.clone(), values)
    }
}

fn group_values_equal(
    custom: Option<&dyn ValueComparator>,
    a: &crate::types::Value,
    b: &crate::types::Value,
) -> bool {
    match custom {
        Some(custom) => custom.compare(a, b).is_eq(),
        None => a == b,
    }
}

enum RunState {
    First,
    Streaming,
    Done,
}

/// A forward-only cursor over one leaf group's tuples.
///
/// Each call to [`next_tuple`](Self::next_tuple) overwrites the shared
/// decode buffer of the previous one, so the run cannot be re-iterated;
/// consume it in order and clone what must outlive the iteration.
pub struct GroupRun<'a> {
    driver: &'a mut GroupDriver,
    records: &'a mut dyn Iterator<Item = crate::Result<Bytes>>,
    state: RunState,
}

impl GroupRun<'_> {
    /// The next tuple of this group, or `None` once the group is exhausted.
    pub fn next_tuple(&mut self) -> crate::Result<Option<&Tuple>> {
        match self.state {
            RunState::First => {
                self.state = RunState::Streaming;
                Ok(Some(self.driver.current_tuple()))
            }
            RunState::Streaming => match self.records.next() {
                None => {
                    self.driver.boundary = Boundary::Eof;
                    self.state = RunState::Done;
                    Ok(None)
                }
                Some(record) => {
                    self.driver.decode_record(&record?)?;
                    match self.driver.mismatch_depth() {
                        None => Ok(Some(self.driver.current_tuple())),
                        Some(depth) => {
                            self.driver.boundary = Boundary::Mismatch(depth);
                            self.state = RunState::Done;
                            Ok(None)
                        }
                    }
                }
            },
            RunState::Done => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TupleSerializer;
    use crate::compare::{RawComparator, SortComparator};
    use crate::conf::ConfigBuilder;
    use crate::schema::{Field, Schema};
    use crate::types::FieldType;

    /// Records every event as a compact string.
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        /// How many tuples of each run to consume before returning; `None`
        /// consumes everything.
        consume: Option<usize>,
    }

    impl GroupHandler for Recorder {
        fn open_group(
            &mut self,
            depth: usize,
            field: &Field,
            key: &Tuple,
            _ctx: &Context<'_>,
            _out: &mut dyn Collector,
        ) -> crate::Result<()> {
            self.events
                .push(format!("open({depth},{})", key.get_named(field.name()).unwrap()));
            Ok(())
        }

        fn close_group(
            &mut self,
            depth: usize,
            field: &Field,
            key: &Tuple,
            _ctx: &Context<'_>,
            _out: &mut dyn Collector,
        ) -> crate::Result<()> {
            self.events
                .push(format!("close({depth},{})", key.get_named(field.name()).unwrap()));
            Ok(())
        }

        fn on_group(
            &mut self,
            key: &GroupKey,
            tuples: &mut GroupRun<'_>,
            _ctx: &Context<'_>,
            _out: &mut dyn Collector,
        ) -> crate::Result<()> {
            let mut n = 0;
            while self.consume.map_or(true, |limit| n < limit) {
                if tuples.next_tuple()?.is_none() {
                    break;
                }
                n += 1;
            }
            self.events
                .push(format!("group({},{n})", key.get(key.len() - 1)));
            Ok(())
        }
    }

    fn config(rollup: bool) -> Arc<CoGroupConfig> {
        let people = Schema::new(
            "people",
            vec![
                Field::new("country", FieldType::String),
                Field::new("age", FieldType::VInt),
                Field::new("name", FieldType::String),
            ],
        )
        .unwrap();
        let builder = ConfigBuilder::new()
            .add_source(people)
            .group_by(["country", "age"]);
        let builder = if rollup {
            builder.rollup_from("country")
        } else {
            builder
        };
        Arc::new(builder.build().unwrap())
    }

    fn encode_sorted(config: &Arc<CoGroupConfig>, rows: &[(&str, i32, &str)]) -> Vec<Vec<u8>> {
        let ser = TupleSerializer::new(config.clone());
        let cmp = SortComparator::new(config.clone());
        let mut records: Vec<Vec<u8>> = rows
            .iter()
            .map(|(country, age, name)| {
                let mut t = Tuple::new(config.sources()[0].clone());
                t.set_named("country", *country).unwrap();
                t.set_named("age", *age).unwrap();
                t.set_named("name", *name).unwrap();
                let mut buf = vec![];
                ser.serialize(&t, &mut buf).unwrap();
                buf
            })
            .collect();
        records.sort_by(|a, b| cmp.compare(a, b).unwrap());
        records
    }

    fn drive(config: &Arc<CoGroupConfig>, records: Vec<Vec<u8>>, recorder: &mut Recorder) {
        let mut driver = GroupDriver::new(config.clone());
        let mut sink: Vec<Tuple> = vec![];
        driver
            .process(
                0,
                records.into_iter().map(|r| Ok(Bytes::from(r))),
                recorder,
                &mut sink,
            )
            .unwrap();
    }

    #[test]
    fn test_rollup_scenario() {
        let config = config(true);
        let records = encode_sorted(
            &config,
            &[("ES", 20, "ana"), ("US", 14, "bob"), ("ES", 20, "eva")],
        );
        let mut recorder = Recorder::default();
        drive(&config, records, &mut recorder);
        assert_eq!(
            recorder.events,
            vec![
                "open(0,'ES')",
                "open(1,20)",
                "group(20,2)",
                "close(1,20)",
                "close(0,'ES')",
                "open(0,'US')",
                "open(1,14)",
                "group(14,1)",
                "close(1,14)",
                "close(0,'US')",
            ]
        );
    }

    #[test]
    fn test_rollup_mid_depth_mismatch() {
        let config = config(true);
        let records = encode_sorted(
            &config,
            &[("ES", 20, "a"), ("ES", 21, "b"), ("FR", 20, "c")],
        );
        let mut recorder = Recorder::default();
        drive(&config, records, &mut recorder);
        assert_eq!(
            recorder.events,
            vec![
                "open(0,'ES')",
                "open(1,20)",
                "group(20,1)",
                "close(1,20)",
                "open(1,21)",
                "group(21,1)",
                "close(1,21)",
                "close(0,'ES')",
                "open(0,'FR')",
                "open(1,20)",
                "group(20,1)",
                "close(1,20)",
                "close(0,'FR')",
            ]
        );
    }

    #[test]
    fn test_open_close_balance() {
        let config = config(true);
        let records = encode_sorted(
            &config,
            &[
                ("ES", 20, "a"),
                ("ES", 20, "b"),
                ("ES", 31, "c"),
                ("FR", 20, "d"),
                ("FR", 20, "e"),
                ("FR", 44, "f"),
                ("US", 14, "g"),
            ],
        );
        let mut recorder = Recorder::default();
        drive(&config, records, &mut recorder);

        for depth in 0..2 {
            let opens = recorder
                .events
                .iter()
                .filter(|e| e.starts_with(&format!("open({depth},")))
                .count();
            let closes = recorder
                .events
                .iter()
                .filter(|e| e.starts_with(&format!("close({depth},")))
                .count();
            assert_eq!(opens, closes, "unbalanced at depth {depth}");
            assert!(opens > 0);
        }
        // nesting: a running open/close counter never goes negative and ends
        // at zero
        let mut open = 0i32;
        for event in &recorder.events {
            if event.starts_with("open(") {
                open += 1;
            } else if event.starts_with("close(") {
                open -= 1;
                assert!(open >= 0);
            }
        }
        assert_eq!(open, 0);
    }

    #[test]
    fn test_simple_mode_emits_no_boundary_events() {
        let config = config(false);
        let records = encode_sorted(
            &config,
            &[("ES", 20, "a"), ("ES", 20, "b"), ("US", 14, "c")],
        );
        let mut recorder = Recorder::default();
        drive(&config, records, &mut recorder);
        assert_eq!(recorder.events, vec!["group(20,2)", "group(14,1)"]);
    }

    #[test]
    fn test_unconsumed_runs_are_drained() {
        let config = config(false);
        let records = encode_sorted(
            &config,
            &[("ES", 20, "a"), ("ES", 20, "b"), ("ES", 20, "c"), ("US", 14, "d")],
        );
        let mut recorder = Recorder {
            consume: Some(1),
            ..Recorder::default()
        };
        drive(&config, records, &mut recorder);
        // the driver still advanced to the next group even though the
        // handler stopped after one tuple
        assert_eq!(recorder.events, vec!["group(20,1)", "group(14,1)"]);
    }

    #[test]
    fn test_empty_partition() {
        let config = config(true);
        let mut recorder = Recorder::default();
        drive(&config, vec![], &mut recorder);
        assert!(recorder.events.is_empty());
    }

    #[test]
    fn test_driver_reuse_across_partitions() {
        let config = config(false);
        let mut driver = GroupDriver::new(config.clone());
        let mut sink: Vec<Tuple> = vec![];
        for _ in 0..2 {
            let records = encode_sorted(&config, &[("ES", 20, "a"), ("US", 14, "b")]);
            let mut recorder = Recorder::default();
            driver
                .process(
                    0,
                    records.into_iter().map(|r| Ok(Bytes::from(r))),
                    &mut recorder,
                    &mut sink,
                )
                .unwrap();
            assert_eq!(recorder.events, vec!["group(20,1)", "group(14,1)"]);
        }
    }

    #[test]
    fn test_handler_error_aborts_partition() {
        struct Failing;
        impl GroupHandler for Failing {
            fn on_group(
                &mut self,
                _key: &GroupKey,
                _tuples: &mut GroupRun<'_>,
                _ctx: &Context<'_>,
                _out: &mut dyn Collector,
            ) -> crate::Result<()> {
                Err(crate::Error::handler("boom"))
            }
        }
        let config = config(false);
        let records = encode_sorted(&config, &[("ES", 20, "a")]);
        let mut driver = GroupDriver::new(config.clone());
        let mut sink: Vec<Tuple> = vec![];
        let err = driver
            .process(
                0,
                records.into_iter().map(|r| Ok(Bytes::from(r))),
                &mut Failing,
                &mut sink,
            )
            .unwrap_err();
        assert!(matches!(err, crate::Error::Handler(_)));
    }

    #[test]
    fn test_group_key_values() {
        struct KeyCheck;
        impl GroupHandler for KeyCheck {
            fn on_group(
                &mut self,
                key: &GroupKey,
                tuples: &mut GroupRun<'_>,
                _ctx: &Context<'_>,
                _out: &mut dyn Collector,
            ) -> crate::Result<()> {
                assert_eq!(key.len(), 2);
                assert_eq!(key.name(0), "country");
                assert_eq!(key.get_named("age"), Some(key.get(1)));
                // the key view is restricted to the group-by fields
                assert_eq!(key.get_named("name"), None);
                while let Some(tuple) = tuples.next_tuple()? {
                    assert_eq!(tuple.get_named("country"), Some(key.get(0)));
                }
                Ok(())
            }
        }
        let config = config(false);
        let records = encode_sorted(&config, &[("ES", 20, "a"), ("ES", 20, "b")]);
        let mut driver = GroupDriver::new(config.clone());
        let mut sink: Vec<Tuple> = vec![];
        driver
            .process(
                0,
                records.into_iter().map(|r| Ok(Bytes::from(r))),
                &mut KeyCheck,
                &mut sink,
            )
            .unwrap();
    }
}
