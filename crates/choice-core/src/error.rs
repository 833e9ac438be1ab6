//! Error types for the choice engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimulateError>;

/// Failure while evaluating one compiled expression against a row view.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unknown column `{0}`")]
    UnknownColumn(String),

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("cannot apply `{op}` to {operand}")]
    TypeMismatch { op: String, operand: String },

    #[error("operand lengths differ: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("`{0}` is a lookup provider and must be indexed with a key")]
    BareLookup(String),

    #[error("`{0}` is not a lookup provider")]
    NotALookup(String),

    #[error("lookup failed: {0}")]
    Lookup(#[from] LookupError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("skim `{0}` not found")]
    MissingSkim(String),

    #[error("zone {zone} in column `{column}` is not a skim zone")]
    UnknownZone { column: String, zone: i64 },

    #[error("column `{0}` is missing from the active rows")]
    MissingColumn(String),

    #[error("column `{0}` must hold integer zone ids")]
    ZoneColumnType(String),

    #[error("skim matrix `{name}` has {actual} cells, expected {expected}")]
    MatrixShape {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate zone id {0}")]
    DuplicateZone(i64),
}

/// Main error type for simulate calls.
#[derive(Error, Debug)]
pub enum SimulateError {
    #[error("expression `{expression}` failed to parse at byte {offset}: {message}")]
    Parse {
        expression: String,
        offset: usize,
        message: String,
    },

    #[error("expression `{expression}` failed to evaluate: {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: EvalError,
    },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("invalid nest spec: {0}")]
    InvalidNestSpec(String),

    #[error("invalid entity table: {0}")]
    InvalidTable(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("lookup provider error: {0}")]
    Lookup(#[from] LookupError),

    #[error("entity {entity_key}: probabilities sum to {sum} which is below draw {draw}")]
    ProbabilitySumBelowDraw { entity_key: u64, sum: f64, draw: f64 },

    #[error("no choosers to simulate")]
    EmptyPopulation,

    #[error("worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimulateError {
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    pub fn invalid_nest(msg: impl Into<String>) -> Self {
        Self::InvalidNestSpec(msg.into())
    }

    pub fn invalid_table(msg: impl Into<String>) -> Self {
        Self::InvalidTable(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    /// The expression string a fatal evaluation error points at, if any.
    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::Parse { expression, .. } | Self::Evaluation { expression, .. } => {
                Some(expression)
            }
            _ => None,
        }
    }
}
