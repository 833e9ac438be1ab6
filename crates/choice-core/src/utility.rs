//! Linear utilities: expression values times spec coefficients.

use crate::error::{Result, SimulateError};
use crate::frame::Frame;
use crate::spec::Spec;

/// `values x coefficients`, one output column per alternative.
///
/// Value columns are matched to spec rows by expression text, so the frame's
/// column order does not matter; a missing or extra column is a shape error.
pub fn compute_utilities(values: &Frame, spec: &Spec) -> Result<Frame> {
    if values.cols() != spec.expression_count() {
        return Err(SimulateError::shape(format!(
            "{} expression columns for {} spec rows",
            values.cols(),
            spec.expression_count()
        )));
    }
    let columns = spec
        .expressions()
        .iter()
        .map(|expression| {
            values.column_index(expression).ok_or_else(|| {
                SimulateError::shape(format!("no values for expression `{expression}`"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut utilities = Frame::zeros(values.keys().to_vec(), spec.alternatives().to_vec());
    for row in 0..values.rows() {
        let inputs = values.row(row);
        let out = utilities.row_mut(row);
        for (expression, col) in columns.iter().enumerate() {
            let value = inputs[*col];
            for (slot, coefficient) in out.iter_mut().zip(spec.row(expression)) {
                *slot += value * coefficient;
            }
        }
    }
    Ok(utilities)
}
