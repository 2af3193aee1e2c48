// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! End-to-end pipeline tests with a minimal local stand-in for the external
//! engine: producers emit tuples, the codec turns them into bytes, the
//! partitioner buckets them, the byte comparator sorts each bucket, and the
//! grouping driver replays every partition through the bound handler.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use cotuple::codec::TupleSerializer;
use cotuple::compare::{Partitioner, RawComparator, SortComparator};
use cotuple::group::{Context, TupleProducer};
use cotuple::{
    CoGroupConfig, Collector, ConfigBuilder, Direction, Field, FieldType, GroupDriver,
    GroupHandler, GroupKey, GroupRun, Job, JobBuilder, Schema, SortOrder, Tuple, Value,
};

/// Output collector both the job and the test can observe.
#[derive(Clone, Default)]
struct SharedSink(Rc<RefCell<Vec<Tuple>>>);

impl Collector for SharedSink {
    fn collect(&mut self, tuple: &Tuple) -> cotuple::Result<()> {
        self.0.borrow_mut().push(tuple.clone());
        Ok(())
    }
}

/// Map-side sink: encodes each produced tuple and buckets it by partition.
struct ShuffleSink {
    serializer: TupleSerializer,
    partitioner: Partitioner,
    buckets: Vec<Vec<Vec<u8>>>,
}

impl ShuffleSink {
    fn new(config: Arc<CoGroupConfig>, partitions: usize) -> Self {
        Self {
            serializer: TupleSerializer::new(config.clone()),
            partitioner: Partitioner::new(config),
            buckets: vec![vec![]; partitions],
        }
    }
}

impl Collector for ShuffleSink {
    fn collect(&mut self, tuple: &Tuple) -> cotuple::Result<()> {
        let mut record = vec![];
        self.serializer.serialize(tuple, &mut record)?;
        let p = self.partitioner.partition(&record, self.buckets.len())?;
        self.buckets[p].push(record);
        Ok(())
    }
}

/// Runs a fully bound job on `partitions` in-memory workers.
fn run_local(job: Job, partitions: usize) -> cotuple::Result<()> {
    let (config, inputs, mut handler, _combiner, mut output) = job.into_parts();
    let config = Arc::new(config);

    // map + shuffle
    let mut shuffle = ShuffleSink::new(config.clone(), partitions);
    for mut input in inputs {
        input.producer.produce(&mut shuffle)?;
    }

    // the engine's contract: per-partition order comes from the byte
    // comparator alone
    let comparator = SortComparator::new(config.clone());
    let mut driver = GroupDriver::new(config.clone());
    for (p, mut bucket) in shuffle.buckets.into_iter().enumerate() {
        bucket.sort_by(|a, b| comparator.compare(a, b).unwrap());
        driver.process(
            p,
            bucket.into_iter().map(|r| Ok(Bytes::from(r))),
            &mut *handler,
            &mut *output,
        )?;
    }
    Ok(())
}

fn crawl_config() -> CoGroupConfig {
    let a = Schema::new(
        "a",
        vec![
            Field::new("url", FieldType::String),
            Field::new("date", FieldType::Long),
            Field::new("content", FieldType::String),
        ],
    )
    .unwrap();
    let b = Schema::new(
        "b",
        vec![
            Field::new("url", FieldType::String),
            Field::new("date", FieldType::Long),
            Field::new("name", FieldType::String),
        ],
    )
    .unwrap();
    ConfigBuilder::new()
        .add_source(a)
        .add_source(b)
        .group_by(["url"])
        .sort_by(
            SortOrder::new()
                .asc("url")
                .desc("date")
                .by_source(Direction::Asc),
        )
        .build()
        .unwrap()
}

fn out_schema() -> Schema {
    Schema::new(
        "lines",
        vec![
            Field::new("url", FieldType::String),
            Field::new("line", FieldType::String),
        ],
    )
    .unwrap()
}

/// Emits rows of one source through the producer contract.
struct Rows {
    schema: Schema,
    rows: Vec<(String, i64, String)>,
    payload_field: &'static str,
}

impl TupleProducer for Rows {
    fn produce(&mut self, out: &mut dyn Collector) -> cotuple::Result<()> {
        let mut tuple = Tuple::new(self.schema.clone());
        for (url, date, payload) in &self.rows {
            tuple.set_named("url", url.as_str()).unwrap();
            tuple.set_named("date", *date).unwrap();
            tuple.set_named(self.payload_field, payload.as_str()).unwrap();
            out.collect(&tuple)?;
        }
        Ok(())
    }
}

/// Formats each leaf run into one output line per element.
struct LineHandler {
    out_schema: Schema,
}

impl GroupHandler for LineHandler {
    fn on_group(
        &mut self,
        key: &GroupKey,
        tuples: &mut GroupRun<'_>,
        _ctx: &Context<'_>,
        out: &mut dyn Collector,
    ) -> cotuple::Result<()> {
        let mut line = Tuple::new(self.out_schema.clone());
        line.set_named("url", key.get(0).clone()).unwrap();
        while let Some(tuple) = tuples.next_tuple()? {
            let source = tuple.schema().name().to_owned();
            let payload_field = if source == "a" { "content" } else { "name" };
            let Some(Value::String(payload)) = tuple.get_named(payload_field) else {
                panic!("missing payload field");
            };
            let Some(Value::Long(date)) = tuple.get_named("date") else {
                panic!("missing date field");
            };
            line.set_named("line", format!("{source}:{payload}@{date}"))
                .unwrap();
            out.collect(&line)?;
        }
        Ok(())
    }
}

#[test]
fn test_two_source_cogroup_scenario() {
    let config = crawl_config();
    // ship the configuration to the "workers" as JSON, like the real engine
    // would, and run against the shipped copy
    let shipped =
        CoGroupConfig::from_json(&config.to_json(), &Default::default()).unwrap();
    assert_eq!(shipped, config);

    let sink = SharedSink::default();
    let job = JobBuilder::new(shipped)
        .add_input(
            "a",
            Box::new(Rows {
                schema: config.sources()[0].clone(),
                rows: vec![
                    ("url1".into(), 10, "c1".into()),
                    ("url1".into(), 5, "c2".into()),
                    ("url2".into(), 7, "c3".into()),
                ],
                payload_field: "content",
            }),
        )
        .add_input(
            "b",
            Box::new(Rows {
                schema: config.sources()[1].clone(),
                rows: vec![("url1".into(), 10, "n1".into())],
                payload_field: "name",
            }),
        )
        .group_handler(Box::new(LineHandler {
            out_schema: out_schema(),
        }))
        .output(Box::new(sink.clone()))
        .build()
        .unwrap();

    run_local(job, 2).unwrap();

    let lines: Vec<(String, String)> = sink
        .0
        .borrow()
        .iter()
        .map(|t| {
            let url = match t.get_named("url").unwrap() {
                Value::String(s) => s.clone(),
                v => panic!("unexpected url value {v:?}"),
            };
            let line = match t.get_named("line").unwrap() {
                Value::String(s) => s.clone(),
                v => panic!("unexpected line value {v:?}"),
            };
            (url, line)
        })
        .collect();

    // the url1 group arrives date-descending, ties broken by source ordinal
    let url1: Vec<&str> = lines
        .iter()
        .filter(|(url, _)| url == "url1")
        .map(|(_, line)| line.as_str())
        .collect();
    assert_eq!(url1, vec!["a:c1@10", "b:n1@10", "a:c2@5"]);

    let url2: Vec<&str> = lines
        .iter()
        .filter(|(url, _)| url == "url2")
        .map(|(_, line)| line.as_str())
        .collect();
    assert_eq!(url2, vec!["a:c3@7"]);
}

fn clicks_config() -> Arc<CoGroupConfig> {
    let clicks = Schema::new(
        "clicks",
        vec![
            Field::new("site", FieldType::String),
            Field::new("n", FieldType::VLong),
        ],
    )
    .unwrap();
    Arc::new(
        ConfigBuilder::new()
            .add_source(clicks)
            .group_by(["site"])
            .build()
            .unwrap(),
    )
}

/// Sums `n` per site; works unchanged as combiner and as reducer, which is
/// exactly the associativity the combiner contract demands.
struct SumHandler {
    schema: Schema,
}

impl GroupHandler for SumHandler {
    fn on_group(
        &mut self,
        key: &GroupKey,
        tuples: &mut GroupRun<'_>,
        _ctx: &Context<'_>,
        out: &mut dyn Collector,
    ) -> cotuple::Result<()> {
        let mut total = 0i64;
        while let Some(tuple) = tuples.next_tuple()? {
            match tuple.get_named("n").unwrap() {
                Value::Long(n) => total += n,
                v => panic!("unexpected count value {v:?}"),
            }
        }
        let mut sum = Tuple::new(self.schema.clone());
        sum.set_named("site", key.get(0).clone()).unwrap();
        sum.set_named("n", total).unwrap();
        out.collect(&sum)
    }
}

#[test]
fn test_combiner_preaggregates_like_the_reducer() {
    let config = clicks_config();
    let serializer = TupleSerializer::new(config.clone());
    let comparator = SortComparator::new(config.clone());
    let schema = config.sources()[0].clone();

    let encode = |rows: &[(&str, i64)]| -> Vec<Vec<u8>> {
        let mut records: Vec<Vec<u8>> = rows
            .iter()
            .map(|(site, n)| {
                let mut t = Tuple::new(schema.clone());
                t.set_named("site", *site).unwrap();
                t.set_named("n", *n).unwrap();
                let mut buf = vec![];
                serializer.serialize(&t, &mut buf).unwrap();
                buf
            })
            .collect();
        records.sort_by(|a, b| comparator.compare(a, b).unwrap());
        records
    };

    // two map tasks, each combined locally before the shuffle
    let map_tasks = [
        vec![("x", 1i64), ("y", 10), ("x", 2)],
        vec![("y", 20), ("x", 4), ("z", 100)],
    ];
    let mut driver = GroupDriver::new(config.clone());
    let mut shuffled: Vec<Vec<u8>> = vec![];
    for task in &map_tasks {
        let mut combined: Vec<Tuple> = vec![];
        driver
            .combine(
                0,
                encode(task).into_iter().map(|r| Ok(Bytes::from(r))),
                &mut SumHandler {
                    schema: schema.clone(),
                },
                &mut combined,
            )
            .unwrap();
        for t in &combined {
            let mut buf = vec![];
            serializer.serialize(t, &mut buf).unwrap();
            shuffled.push(buf);
        }
    }

    // reduce over the combined records
    shuffled.sort_by(|a, b| comparator.compare(a, b).unwrap());
    let mut totals: Vec<Tuple> = vec![];
    driver
        .process(
            0,
            shuffled.into_iter().map(|r| Ok(Bytes::from(r))),
            &mut SumHandler {
                schema: schema.clone(),
            },
            &mut totals,
        )
        .unwrap();

    let mut result: Vec<(String, i64)> = totals
        .iter()
        .map(|t| {
            let site = match t.get_named("site").unwrap() {
                Value::String(s) => s.clone(),
                v => panic!("unexpected site value {v:?}"),
            };
            let n = match t.get_named("n").unwrap() {
                Value::Long(n) => *n,
                v => panic!("unexpected count value {v:?}"),
            };
            (site, n)
        })
        .collect();
    result.sort();
    assert_eq!(
        result,
        vec![("x".into(), 7), ("y".into(), 30), ("z".into(), 100)]
    );
}
