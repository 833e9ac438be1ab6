//! Chunk sizing and the per-chunk driver.

use std::ops::Range;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::Result;
use crate::nest::NestTree;
use crate::spec::Spec;

/// What a chunk produces; decides how many scratch columns each row needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Choices,
    Logsums,
}

/// Floating-point cells one chooser row occupies while its chunk runs.
///
/// Counts the chooser's own columns, the expression values, utilities and
/// probabilities, plus the nested exp-utility and probability columns per node.
pub fn row_size(chooser_columns: usize, spec: &Spec, tree: Option<&NestTree>, workload: Workload) -> usize {
    let expressions = spec.expression_count();
    let alternatives = spec.alternative_count();
    let extra = match (workload, tree) {
        (Workload::Choices, None) => expressions + 2 * alternatives,
        (Workload::Choices, Some(tree)) => {
            expressions + 2 * alternatives + (2 * tree.node_count()).saturating_sub(1)
        }
        (Workload::Logsums, None) => expressions + alternatives,
        (Workload::Logsums, Some(tree)) => expressions + alternatives + tree.node_count(),
    };
    chooser_columns + extra
}

/// Rows that fit `chunk_size` cells, at least one and at most the population.
/// A zero budget means no limit.
pub fn rows_per_chunk(chunk_size: usize, row_size: usize, population: usize) -> usize {
    let population = population.max(1);
    if chunk_size == 0 {
        return population;
    }
    (chunk_size / row_size.max(1)).clamp(1, population)
}

/// Consecutive row ranges covering the population in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    rows_per_chunk: usize,
    ranges: Vec<Range<usize>>,
}

impl ChunkPlan {
    pub fn new(population: usize, rows_per_chunk: usize) -> Self {
        let rows_per_chunk = rows_per_chunk.max(1);
        let ranges = (0..population)
            .step_by(rows_per_chunk)
            .map(|start| start..(start + rows_per_chunk).min(population))
            .collect();
        Self {
            rows_per_chunk,
            ranges,
        }
    }

    pub fn for_budget(population: usize, chunk_size: usize, row_size: usize) -> Self {
        let rows = rows_per_chunk(chunk_size, row_size, population);
        debug!(population, chunk_size, row_size, rows_per_chunk = rows, "chunk sizing");
        Self::new(population, rows)
    }

    pub fn rows_per_chunk(&self) -> usize {
        self.rows_per_chunk
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }
}

/// Per-chunk trace label; unchanged when the call runs as a single chunk.
pub fn chunk_label(trace_label: &str, chunk: usize, chunks: usize) -> String {
    if chunks > 1 {
        format!("{trace_label}.chunk_{chunk}")
    } else {
        trace_label.to_string()
    }
}

/// Runs chunk closures, in parallel when more than one worker is configured.
#[derive(Debug)]
pub struct ChunkRunner {
    worker_threads: usize,
    pool: Option<rayon::ThreadPool>,
}

impl ChunkRunner {
    pub fn new(worker_threads: u16) -> Result<Self> {
        let worker_threads = usize::from(worker_threads.max(1));
        let pool = if worker_threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(worker_threads)
                    .build()?,
            )
        } else {
            None
        };
        Ok(Self {
            worker_threads,
            pool,
        })
    }

    pub fn sequential() -> Self {
        Self {
            worker_threads: 1,
            pool: None,
        }
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Apply `run` to every chunk and return outputs in chunk order.
    ///
    /// The first failing chunk, by chunk index, decides the error.
    pub fn run<T, F>(&self, plan: &ChunkPlan, run: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize, Range<usize>) -> Result<T> + Sync,
    {
        let chunks = plan.len();
        let workloads = plan.ranges().iter().cloned().enumerate().collect::<Vec<_>>();
        let traced = |(chunk, rows): (usize, Range<usize>)| {
            info!(chunk = chunk + 1, chunks, rows = rows.len(), "running chunk");
            (chunk, run(chunk, rows))
        };

        match &self.pool {
            Some(pool) if chunks > 1 => {
                let mut outputs =
                    pool.install(|| workloads.into_par_iter().map(traced).collect::<Vec<_>>());
                outputs.sort_by_key(|(chunk, _)| *chunk);
                outputs.into_iter().map(|(_, output)| output).collect()
            }
            // Sequential runs stop at the first failing chunk.
            _ => workloads
                .into_iter()
                .map(|workload| traced(workload).1)
                .collect(),
        }
    }
}
