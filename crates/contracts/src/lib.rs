//! Cross-boundary contracts for the choice engine: run configuration, model
//! settings, nest specifications, choice records and diagnostics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod seed_string;

pub const DEFAULT_BAD_PROBABILITY_THRESHOLD: f64 = 0.001;
pub const DEFAULT_VARIABILITY_SAMPLE_ROWS: usize = 1000;
pub const DEFAULT_TRACE_LABEL: &str = "choice";
pub const DEFAULT_CHOICE_COLUMN: &str = "choice";

fn default_worker_threads() -> u16 {
    1
}

fn default_variability_sample_rows() -> usize {
    DEFAULT_VARIABILITY_SAMPLE_ROWS
}

fn default_bad_probability_threshold() -> f64 {
    DEFAULT_BAD_PROBABILITY_THRESHOLD
}

fn default_trace_label() -> String {
    DEFAULT_TRACE_LABEL.to_string()
}

fn default_choice_column() -> String {
    DEFAULT_CHOICE_COLUMN.to_string()
}

/// Per-call execution settings for a simulate or logsums run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulateConfig {
    #[serde(with = "seed_string", default)]
    pub seed: u64,
    /// Memory budget in floating-point cells; zero disables chunking.
    #[serde(default)]
    pub chunk_size: usize,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: u16,
    #[serde(default)]
    pub check_variability: bool,
    #[serde(default = "default_variability_sample_rows")]
    pub variability_sample_rows: usize,
    #[serde(default = "default_bad_probability_threshold")]
    pub bad_probability_threshold: f64,
    #[serde(default = "default_trace_label")]
    pub trace_label: String,
    #[serde(default = "default_choice_column")]
    pub choice_column: String,
    /// Salts the random stream so separate model steps draw independently.
    #[serde(default)]
    pub step_name: Option<String>,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            chunk_size: 0,
            worker_threads: default_worker_threads(),
            check_variability: false,
            variability_sample_rows: DEFAULT_VARIABILITY_SAMPLE_ROWS,
            bad_probability_threshold: DEFAULT_BAD_PROBABILITY_THRESHOLD,
            trace_label: default_trace_label(),
            choice_column: default_choice_column(),
            step_name: None,
        }
    }
}

impl fmt::Display for SimulateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "label={} seed={} chunk_size={} workers={} column={}",
            self.trace_label, self.seed, self.chunk_size, self.worker_threads, self.choice_column
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LogitType {
    #[default]
    #[serde(rename = "MNL", alias = "mnl")]
    Mnl,
    #[serde(rename = "NL", alias = "nl")]
    Nl,
}

/// One node of a nest tree as written in model settings.
///
/// `alternatives` mixes terminal alternative names with nested child nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NestSpec {
    pub name: String,
    pub coefficient: f64,
    pub alternatives: Vec<NestChild>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NestChild {
    Leaf(String),
    Nest(NestSpec),
}

impl NestSpec {
    /// Number of nodes in the tree, leaves included.
    pub fn node_count(&self) -> usize {
        1 + self
            .alternatives
            .iter()
            .map(|child| match child {
                NestChild::Leaf(_) => 1,
                NestChild::Nest(nest) => nest.node_count(),
            })
            .sum::<usize>()
    }

    /// Leaf names in pre-order.
    pub fn leaf_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_leaves(&mut names);
        names
    }

    fn collect_leaves<'a>(&'a self, names: &mut Vec<&'a str>) {
        for child in &self.alternatives {
            match child {
                NestChild::Leaf(name) => names.push(name.as_str()),
                NestChild::Nest(nest) => nest.collect_leaves(names),
            }
        }
    }
}

/// Model constant exposed to `@` expressions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConstantValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelSettings {
    #[serde(default, alias = "LOGIT_TYPE")]
    pub logit_type: LogitType,
    #[serde(default, alias = "NESTS")]
    pub nests: Option<NestSpec>,
    #[serde(default, alias = "CONSTANTS")]
    pub constants: BTreeMap<String, ConstantValue>,
    #[serde(default)]
    pub simulate: Option<SimulateConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    MissingNests,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingNests => write!(f, "logit_type NL requires a nests section"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl ModelSettings {
    /// Nest tree to use, `None` for multinomial logit.
    pub fn nest_spec(&self) -> Result<Option<&NestSpec>, SettingsError> {
        match self.logit_type {
            LogitType::Mnl => Ok(None),
            LogitType::Nl => self.nests.as_ref().map(Some).ok_or(SettingsError::MissingNests),
        }
    }

    pub fn simulate_config(&self) -> SimulateConfig {
        self.simulate.clone().unwrap_or_default()
    }
}

/// One chooser's outcome, with the draw kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChoiceRecord {
    #[serde(with = "seed_string")]
    pub entity_key: u64,
    pub alternative_index: usize,
    pub alternative: String,
    pub draw: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    NoVariability {
        expression: String,
        value: f64,
    },
    MissingValues {
        expression: String,
        rows: usize,
    },
    DegenerateNest {
        nest: String,
        rows: usize,
    },
    BadProbabilities {
        rows: usize,
        max_deviation: f64,
        example_keys: Vec<u64>,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoVariability { expression, value } => {
                write!(f, "no variability ({value}) in: {expression}")
            }
            Self::MissingValues { expression, rows } => {
                write!(f, "{rows} sampled rows with missing values in: {expression}")
            }
            Self::DegenerateNest { nest, rows } => {
                write!(f, "nest {nest} has zero exponentiated utility in {rows} rows")
            }
            Self::BadProbabilities {
                rows,
                max_deviation,
                example_keys,
            } => write!(
                f,
                "{rows} rows with probabilities not summing to 1 (max deviation {max_deviation:.6}, e.g. {example_keys:?})"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DiagnosticReport {
    pub trace_label: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn has_bad_probabilities(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| matches!(diagnostic, Diagnostic::BadProbabilities { .. }))
    }
}
