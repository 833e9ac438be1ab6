//! Inverse-CDF choice sampling.

use contracts::ChoiceRecord;

use crate::error::{Result, SimulateError};
use crate::frame::Frame;
use crate::rng::RandomStream;

/// Allowance for floating-point rounding when a row's cumulative total stops
/// just short of the draw.
pub const ROUNDING_TOLERANCE: f64 = 1e-9;

/// First alternative whose cumulative probability exceeds `draw`.
pub fn choose_index(probs: &[f64], draw: f64) -> Option<usize> {
    let mut cumulative = 0.0;
    for (idx, p) in probs.iter().enumerate() {
        cumulative += p;
        if cumulative > draw {
            return Some(idx);
        }
    }
    None
}

/// One choice per row, drawn from each entity's own stream.
///
/// A row whose cumulative total never passes the draw is an error unless the
/// row still sums to one within `tolerance`; rounding is then resolved in
/// favour of the last alternative with positive probability.
pub fn make_choices(probs: &Frame, stream: &RandomStream, tolerance: f64) -> Result<Vec<ChoiceRecord>> {
    probs
        .iter_rows()
        .map(|(entity_key, row)| {
            let draw = stream.draw(entity_key);
            let idx = choose_row(entity_key, row, draw, tolerance)?;
            Ok(ChoiceRecord {
                entity_key,
                alternative_index: idx,
                alternative: probs.columns()[idx].clone(),
                draw,
            })
        })
        .collect()
}

fn choose_row(entity_key: u64, row: &[f64], draw: f64, tolerance: f64) -> Result<usize> {
    if let Some(idx) = choose_index(row, draw) {
        return Ok(idx);
    }
    let sum: f64 = row.iter().sum();
    let last_positive = row.iter().rposition(|p| *p > 0.0);
    match last_positive {
        Some(idx) if (sum - 1.0).abs() <= tolerance => Ok(idx),
        _ => Err(SimulateError::ProbabilitySumBelowDraw {
            entity_key,
            sum,
            draw,
        }),
    }
}
