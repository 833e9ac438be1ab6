//! Top-level calls: choose one alternative per chooser, or compute logsums.
//!
//! Both calls compile the spec's expressions once, split the choosers into
//! chunks sized from `SimulateConfig::chunk_size`, run every chunk through
//! evaluate, utilities and probabilities, and concatenate the chunk outputs in
//! chooser order. Diagnostics are merged across chunks and logged once.

use std::collections::HashMap;
use std::ops::Range;
use std::time::Instant;

use contracts::{ChoiceRecord, DiagnosticReport, SimulateConfig};
use serde::Serialize;
use tracing::{debug, info, info_span, Span};

use crate::chunk::{chunk_label, row_size, ChunkPlan, ChunkRunner, Workload};
use crate::diagnostics::{log_report, ChunkDiagnostics, VariabilitySample};
use crate::env::Environment;
use crate::error::{Result, SimulateError};
use crate::expr::ExpressionPlan;
use crate::frame::Frame;
use crate::logit::{
    mnl_logsums, mnl_probabilities, nested_exp_utilities, nl_logsums, nl_probabilities,
};
use crate::nest::NestTree;
use crate::rng::RandomStream;
use crate::sampler::{make_choices, ROUNDING_TOLERANCE};
use crate::spec::Spec;
use crate::table::EntityTable;
use crate::utility::compute_utilities;

/// Choices in chooser order under a named result column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceResult {
    pub column: String,
    pub alternatives: Vec<String>,
    pub records: Vec<ChoiceRecord>,
}

impl ChoiceResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Linear scan; use [`ChoiceResult::by_key`] for repeated lookups.
    pub fn get(&self, entity_key: u64) -> Option<&ChoiceRecord> {
        self.records
            .iter()
            .find(|record| record.entity_key == entity_key)
    }

    /// Records indexed by entity key.
    pub fn by_key(&self) -> HashMap<u64, &ChoiceRecord> {
        self.records
            .iter()
            .map(|record| (record.entity_key, record))
            .collect()
    }

    /// Chosen-alternative indices in chooser order.
    pub fn indices(&self) -> Vec<usize> {
        self.records
            .iter()
            .map(|record| record.alternative_index)
            .collect()
    }

    /// How often each alternative was chosen, in alternative order.
    pub fn value_counts(&self) -> Vec<(String, usize)> {
        let mut counts = vec![0_usize; self.alternatives.len()];
        for record in &self.records {
            if let Some(count) = counts.get_mut(record.alternative_index) {
                *count += 1;
            }
        }
        self.alternatives.iter().cloned().zip(counts).collect()
    }
}

/// One logsum per chooser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Logsums {
    pub column: String,
    pub keys: Vec<u64>,
    pub values: Vec<f64>,
}

impl Logsums {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.keys.iter().copied().zip(self.values.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub choices: ChoiceResult,
    pub report: DiagnosticReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogsumSimulation {
    pub logsums: Logsums,
    pub report: DiagnosticReport,
}

/// Shared, read-only inputs of one call.
struct CallContext<'a> {
    choosers: &'a EntityTable,
    spec: &'a Spec,
    tree: Option<&'a NestTree>,
    env: &'a Environment,
    config: &'a SimulateConfig,
    plan: ExpressionPlan,
    sample: Option<VariabilitySample>,
    chunks: ChunkPlan,
    span: Span,
}

impl<'a> CallContext<'a> {
    fn new(
        stage: &str,
        workload: Workload,
        choosers: &'a EntityTable,
        spec: &'a Spec,
        tree: Option<&'a NestTree>,
        env: &'a Environment,
        config: &'a SimulateConfig,
    ) -> Result<Self> {
        if choosers.is_empty() {
            return Err(SimulateError::EmptyPopulation);
        }
        if let Some(tree) = tree {
            if tree.alternatives() != spec.alternatives() {
                return Err(SimulateError::invalid_nest(
                    "nest tree was built for different alternatives",
                ));
            }
        }
        let label = format!("{}.{stage}", config.trace_label);
        let span = info_span!("simulate", trace_label = %label);
        let plan = ExpressionPlan::for_spec(spec)?;
        let sample = config.check_variability.then(|| {
            VariabilitySample::new(choosers.len(), config.variability_sample_rows, config.seed)
        });
        let size = row_size(choosers.column_count(), spec, tree, workload);
        let chunks = span.in_scope(|| ChunkPlan::for_budget(choosers.len(), config.chunk_size, size));
        Ok(Self {
            choosers,
            spec,
            tree,
            env,
            config,
            plan,
            sample,
            chunks,
            span,
        })
    }

    fn label(&self, chunk: usize) -> String {
        chunk_label(&self.config.trace_label, chunk, self.chunks.len())
    }

    /// Evaluate expressions and utilities for one chunk.
    fn utilities(&self, rows: &Range<usize>, diagnostics: &mut ChunkDiagnostics) -> Result<Frame> {
        let view = self.choosers.rows(rows.clone())?;
        let started = Instant::now();
        let values = self.plan.evaluate(&view, self.env)?;
        if let Some(sample) = &self.sample {
            diagnostics.observe_values(&values, rows, sample);
        }
        let utilities = compute_utilities(&values, self.spec)?;
        debug!(
            rows = view.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "evaluated utilities"
        );
        Ok(utilities)
    }

    fn runner(&self) -> Result<ChunkRunner> {
        if self.chunks.len() > 1 {
            ChunkRunner::new(self.config.worker_threads)
        } else {
            Ok(ChunkRunner::sequential())
        }
    }

    fn finish(&self, diagnostics: Vec<ChunkDiagnostics>) -> DiagnosticReport {
        let mut merged = ChunkDiagnostics::default();
        for chunk in diagnostics {
            merged.merge(chunk);
        }
        let report = merged.into_report(&self.config.trace_label);
        log_report(&report);
        report
    }
}

/// Simulate one choice per chooser with multinomial logit, or nested logit
/// when `tree` is given.
///
/// Draws come from `stream`, keyed by chooser key, so the result does not
/// depend on `chunk_size` or `worker_threads`.
pub fn simple_simulate(
    choosers: &EntityTable,
    spec: &Spec,
    tree: Option<&NestTree>,
    env: &Environment,
    stream: &RandomStream,
    config: &SimulateConfig,
) -> Result<Simulation> {
    let ctx = CallContext::new(
        "simple_simulate",
        Workload::Choices,
        choosers,
        spec,
        tree,
        env,
        config,
    )?;
    let _entered = ctx.span.enter();
    info!(
        choosers = choosers.len(),
        expressions = spec.expression_count(),
        alternatives = spec.alternative_count(),
        nested = tree.is_some(),
        chunks = ctx.chunks.len(),
        "simulating choices"
    );

    let runner = ctx.runner()?;
    let outputs = runner.run(&ctx.chunks, |chunk, rows| {
        let label = ctx.label(chunk);
        let span = info_span!(parent: &ctx.span, "chunk", chunk, trace_label = %label);
        let _entered = span.enter();
        let mut diagnostics = ChunkDiagnostics::default();

        let utilities = ctx.utilities(&rows, &mut diagnostics)?;
        let probs = match ctx.tree {
            Some(tree) => {
                let (probs, degenerate) = nl_probabilities(&utilities, tree);
                diagnostics.record_degenerate(degenerate);
                probs
            }
            None => mnl_probabilities(&utilities),
        };
        diagnostics.check_probabilities(&probs, config.bad_probability_threshold);

        match make_choices(&probs, stream, ROUNDING_TOLERANCE) {
            Ok(records) => Ok((records, diagnostics)),
            Err(err) => {
                log_report(&diagnostics.into_report(&label));
                Err(err)
            }
        }
    })?;

    let mut records = Vec::with_capacity(choosers.len());
    let mut diagnostics = Vec::with_capacity(outputs.len());
    for (chunk_records, chunk_diagnostics) in outputs {
        records.extend(chunk_records);
        diagnostics.push(chunk_diagnostics);
    }
    let report = ctx.finish(diagnostics);

    let choices = ChoiceResult {
        column: config.choice_column.clone(),
        alternatives: spec.alternatives().to_vec(),
        records,
    };
    let summary: Vec<(String, usize)> = choices
        .value_counts()
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect();
    info!(column = %choices.column, choices = ?summary, "choice summary");

    Ok(Simulation { choices, report })
}

/// Logsum per chooser instead of a choice: `ln(sum(exp(u)))` for
/// multinomial logit, the root's log exponentiated utility for nested logit.
pub fn simple_simulate_logsums(
    choosers: &EntityTable,
    spec: &Spec,
    tree: Option<&NestTree>,
    env: &Environment,
    config: &SimulateConfig,
) -> Result<LogsumSimulation> {
    let ctx = CallContext::new(
        "simple_simulate_logsums",
        Workload::Logsums,
        choosers,
        spec,
        tree,
        env,
        config,
    )?;
    let _entered = ctx.span.enter();
    info!(
        choosers = choosers.len(),
        nested = tree.is_some(),
        chunks = ctx.chunks.len(),
        "computing logsums"
    );

    let runner = ctx.runner()?;
    let outputs = runner.run(&ctx.chunks, |chunk, rows| {
        let span = info_span!(parent: &ctx.span, "chunk", chunk, trace_label = %ctx.label(chunk));
        let _entered = span.enter();
        let mut diagnostics = ChunkDiagnostics::default();

        let utilities = ctx.utilities(&rows, &mut diagnostics)?;
        let values = match ctx.tree {
            Some(tree) => nl_logsums(&nested_exp_utilities(&utilities, tree)),
            None => mnl_logsums(&utilities),
        };
        Ok((values, diagnostics))
    })?;

    let mut values = Vec::with_capacity(choosers.len());
    let mut diagnostics = Vec::with_capacity(outputs.len());
    for (chunk_values, chunk_diagnostics) in outputs {
        values.extend(chunk_values);
        diagnostics.push(chunk_diagnostics);
    }
    let report = ctx.finish(diagnostics);

    Ok(LogsumSimulation {
        logsums: Logsums {
            column: config.choice_column.clone(),
            keys: choosers.keys().to_vec(),
            values,
        },
        report,
    })
}
