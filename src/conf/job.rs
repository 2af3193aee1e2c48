// Copyright 2024 Cotuple Project Authors. Licensed under Apache-2.0.

//! Job-level bindings.
//!
//! A configuration only becomes a runnable job once at least one input, a
//! grouped-element handler and an output are bound. The execution engine
//! adapter drives these; the engine itself stays outside the core.

use super::{CoGroupConfig, ConfigError};
use crate::group::{Collector, GroupHandler, TupleProducer};

/// One input binding: a producer emitting tuples of a declared source.
pub struct Input {
    pub source: String,
    pub producer: Box<dyn TupleProducer>,
}

pub struct JobBuilder {
    config: CoGroupConfig,
    inputs: Vec<Input>,
    handler: Option<Box<dyn GroupHandler>>,
    combiner: Option<Box<dyn GroupHandler>>,
    output: Option<Box<dyn Collector>>,
}

impl JobBuilder {
    pub fn new(config: CoGroupConfig) -> Self {
        Self {
            config,
            inputs: vec![],
            handler: None,
            combiner: None,
            output: None,
        }
    }

    pub fn add_input(mut self, source: impl Into<String>, producer: Box<dyn TupleProducer>) -> Self {
        self.inputs.push(Input {
            source: source.into(),
            producer,
        });
        self
    }

    pub fn group_handler(mut self, handler: Box<dyn GroupHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Optional map-local pre-aggregation pass. It may run zero, one or many
    /// times per key, so it must be associative and commutative.
    pub fn combiner(mut self, combiner: Box<dyn GroupHandler>) -> Self {
        self.combiner = Some(combiner);
        self
    }

    pub fn output(mut self, collector: Box<dyn Collector>) -> Self {
        self.output = Some(collector);
        self
    }

    pub fn build(self) -> Result<Job, ConfigError> {
        if self.inputs.is_empty() {
            return Err(ConfigError::MissingBinding("input"));
        }
        for input in &self.inputs {
            if self.config.source_index(&input.source).is_none() {
                return Err(ConfigError::UnknownSource(input.source.clone()));
            }
        }
        let handler = self
            .handler
            .ok_or(ConfigError::MissingBinding("group handler"))?;
        let output = self.output.ok_or(ConfigError::MissingBinding("output"))?;
        Ok(Job {
            config: self.config,
            inputs: self.inputs,
            handler,
            combiner: self.combiner,
            output,
        })
    }
}

/// A fully bound job, ready for an execution-engine adapter to run.
pub struct Job {
    config: CoGroupConfig,
    inputs: Vec<Input>,
    handler: Box<dyn GroupHandler>,
    combiner: Option<Box<dyn GroupHandler>>,
    output: Box<dyn Collector>,
}

impl Job {
    pub fn config(&self) -> &CoGroupConfig {
        &self.config
    }

    pub fn has_combiner(&self) -> bool {
        self.combiner.is_some()
    }

    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        CoGroupConfig,
        Vec<Input>,
        Box<dyn GroupHandler>,
        Option<Box<dyn GroupHandler>>,
        Box<dyn Collector>,
    ) {
        (
            self.config,
            self.inputs,
            self.handler,
            self.combiner,
            self.output,
        )
    }
}
