//! Discrete-choice simulation for chooser populations.
//!
//! A [`Spec`] maps utility expressions to per-alternative coefficients. For
//! each chooser the expressions are evaluated, combined into utilities, turned
//! into multinomial or nested logit probabilities, and sampled with a
//! per-chooser [`RandomStream`]. Large populations are processed in chunks
//! whose size follows a memory budget; chunking never changes the result.

pub mod chunk;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod expr;
pub mod frame;
pub mod io;
pub mod logit;
pub mod nest;
pub mod rng;
pub mod sampler;
pub mod simulate;
pub mod skim;
pub mod spec;
pub mod table;
pub mod utility;

pub use chunk::{ChunkPlan, ChunkRunner, Workload};
pub use env::{EnvValue, Environment};
pub use error::{EvalError, LookupError, Result, SimulateError};
pub use expr::{ExpressionKind, ExpressionPlan};
pub use frame::Frame;
pub use io::{read_entity_table, read_entity_table_path, read_model_spec, read_model_spec_path};
pub use nest::{NestNode, NestTree};
pub use rng::RandomStream;
pub use simulate::{
    simple_simulate, simple_simulate_logsums, ChoiceResult, LogsumSimulation, Logsums, Simulation,
};
pub use skim::{LookupProvider, RowLookup, SkimDict, SkimWrapper};
pub use spec::{Spec, SpecBuilder};
pub use table::{Column, ColumnSlice, EntityTable, TableView};
pub use utility::compute_utilities;
