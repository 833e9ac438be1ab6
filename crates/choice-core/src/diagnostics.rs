//! Non-fatal findings gathered per chunk and reported once per call.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use contracts::{Diagnostic, DiagnosticReport};
use rand::seq::index;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use tracing::warn;

use crate::frame::Frame;

const EXAMPLE_KEYS: usize = 5;

/// Population rows whose expression values feed the variability check.
///
/// Sampled once over the whole population so the outcome does not depend on
/// chunking.
#[derive(Debug, Clone, Default)]
pub struct VariabilitySample {
    rows: BTreeSet<usize>,
}

impl VariabilitySample {
    pub fn new(population: usize, sample_rows: usize, seed: u64) -> Self {
        if sample_rows >= population {
            return Self {
                rows: (0..population).collect(),
            };
        }
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        Self {
            rows: index::sample(&mut rng, population, sample_rows).into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sampled rows inside `range`, relative to its start.
    fn local_rows(&self, range: &Range<usize>) -> impl Iterator<Item = usize> + '_ {
        let start = range.start;
        self.rows.range(range.clone()).map(move |row| row - start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ColumnStats {
    min: f64,
    max: f64,
    present: usize,
    missing: usize,
}

impl Default for ColumnStats {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            present: 0,
            missing: 0,
        }
    }
}

impl ColumnStats {
    fn observe(&mut self, value: f64) {
        if value.is_nan() {
            self.missing += 1;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
            self.present += 1;
        }
    }

    fn merge(&mut self, other: &Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.present += other.present;
        self.missing += other.missing;
    }
}

/// Diagnostics for one chunk; merged in chunk order into the call's report.
#[derive(Debug, Clone, Default)]
pub struct ChunkDiagnostics {
    columns: Vec<(String, ColumnStats)>,
    degenerate: BTreeMap<String, usize>,
    bad_rows: usize,
    max_deviation: f64,
    example_keys: Vec<u64>,
}

impl ChunkDiagnostics {
    /// Fold the sampled rows of `values` into per-expression statistics.
    pub fn observe_values(&mut self, values: &Frame, rows: &Range<usize>, sample: &VariabilitySample) {
        if self.columns.is_empty() {
            self.columns = values
                .columns()
                .iter()
                .map(|name| (name.clone(), ColumnStats::default()))
                .collect();
        }
        for row in sample.local_rows(rows) {
            for (col, value) in values.row(row).iter().enumerate() {
                self.columns[col].1.observe(*value);
            }
        }
    }

    pub fn record_degenerate(&mut self, degenerate: BTreeMap<String, usize>) {
        for (nest, rows) in degenerate {
            *self.degenerate.entry(nest).or_insert(0) += rows;
        }
    }

    /// Flag rows whose probabilities miss one by more than `threshold`.
    pub fn check_probabilities(&mut self, probs: &Frame, threshold: f64) {
        for (key, row) in probs.iter_rows() {
            let deviation = (row.iter().sum::<f64>() - 1.0).abs();
            if deviation <= threshold {
                continue;
            }
            self.bad_rows += 1;
            if deviation.is_nan() || deviation > self.max_deviation {
                self.max_deviation = deviation;
            }
            if self.example_keys.len() < EXAMPLE_KEYS {
                self.example_keys.push(key);
            }
        }
    }

    pub fn bad_rows(&self) -> usize {
        self.bad_rows
    }

    pub fn merge(&mut self, other: ChunkDiagnostics) {
        if self.columns.is_empty() {
            self.columns = other.columns;
        } else {
            for ((_, mine), (_, theirs)) in self.columns.iter_mut().zip(&other.columns) {
                mine.merge(theirs);
            }
        }
        self.record_degenerate(other.degenerate);
        self.bad_rows += other.bad_rows;
        if other.max_deviation.is_nan() || other.max_deviation > self.max_deviation {
            self.max_deviation = other.max_deviation;
        }
        for key in other.example_keys {
            if self.example_keys.len() == EXAMPLE_KEYS {
                break;
            }
            self.example_keys.push(key);
        }
    }

    pub fn into_report(self, trace_label: &str) -> DiagnosticReport {
        let mut diagnostics = Vec::new();
        for (expression, stats) in self.columns {
            if stats.present > 0 && stats.min == stats.max {
                diagnostics.push(Diagnostic::NoVariability {
                    expression: expression.clone(),
                    value: stats.min,
                });
            }
            if stats.missing > 0 {
                diagnostics.push(Diagnostic::MissingValues {
                    expression,
                    rows: stats.missing,
                });
            }
        }
        for (nest, rows) in self.degenerate {
            diagnostics.push(Diagnostic::DegenerateNest { nest, rows });
        }
        if self.bad_rows > 0 {
            diagnostics.push(Diagnostic::BadProbabilities {
                rows: self.bad_rows,
                max_deviation: self.max_deviation,
                example_keys: self.example_keys,
            });
        }
        DiagnosticReport {
            trace_label: trace_label.to_string(),
            diagnostics,
        }
    }
}

/// Emit one warning per diagnostic.
pub fn log_report(report: &DiagnosticReport) {
    for diagnostic in &report.diagnostics {
        warn!(trace_label = %report.trace_label, "{diagnostic}");
    }
}
