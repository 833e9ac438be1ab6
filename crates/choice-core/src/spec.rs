//! Utility specifications: one row per expression, one coefficient column per
//! alternative.

use std::collections::BTreeMap;

use crate::error::{Result, SimulateError};

/// An immutable expression-by-alternative coefficient table.
#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    expressions: Vec<String>,
    alternatives: Vec<String>,
    coefficients: Vec<f64>,
}

impl Spec {
    /// Build from dense rows; every row must carry one value per alternative.
    pub fn from_rows<I, E>(alternatives: Vec<String>, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (E, Vec<f64>)>,
        E: Into<String>,
    {
        let mut builder = SpecBuilder::new(alternatives)?;
        for (expression, coefficients) in rows {
            builder.add_row(expression, &coefficients)?;
        }
        builder.build()
    }

    pub fn expressions(&self) -> &[String] {
        &self.expressions
    }

    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    pub fn expression_count(&self) -> usize {
        self.expressions.len()
    }

    pub fn alternative_count(&self) -> usize {
        self.alternatives.len()
    }

    pub fn expression_index(&self, expression: &str) -> Option<usize> {
        self.expressions.iter().position(|known| known == expression)
    }

    pub fn alternative_index(&self, alternative: &str) -> Option<usize> {
        self.alternatives.iter().position(|known| known == alternative)
    }

    /// Coefficients of one expression, in alternative order.
    pub fn row(&self, expression: usize) -> &[f64] {
        let width = self.alternative_count();
        &self.coefficients[expression * width..(expression + 1) * width]
    }

    pub fn coefficient(&self, expression: usize, alternative: usize) -> f64 {
        self.row(expression)[alternative]
    }
}

/// Accumulates spec rows before freezing them into a [`Spec`].
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    alternatives: Vec<String>,
    expressions: Vec<String>,
    positions: BTreeMap<String, usize>,
    coefficients: Vec<f64>,
}

impl SpecBuilder {
    pub fn new(alternatives: Vec<String>) -> Result<Self> {
        if alternatives.is_empty() {
            return Err(SimulateError::invalid_spec("no alternative columns"));
        }
        let mut seen = BTreeMap::new();
        for (idx, alternative) in alternatives.iter().enumerate() {
            if alternative.trim().is_empty() {
                return Err(SimulateError::invalid_spec(format!(
                    "alternative column {idx} has an empty name"
                )));
            }
            if seen.insert(alternative.as_str(), idx).is_some() {
                return Err(SimulateError::invalid_spec(format!(
                    "duplicate alternative `{alternative}`"
                )));
            }
        }
        Ok(Self {
            alternatives,
            expressions: Vec::new(),
            positions: BTreeMap::new(),
            coefficients: Vec::new(),
        })
    }

    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    /// Append a new expression row. Coefficients beyond the supplied ones
    /// default to zero.
    pub fn add_row(&mut self, expression: impl Into<String>, coefficients: &[f64]) -> Result<()> {
        let expression = expression.into();
        self.check_expression(&expression, coefficients)?;
        if self.positions.contains_key(&expression) {
            return Err(SimulateError::invalid_spec(format!(
                "duplicate expression `{expression}`"
            )));
        }
        self.push(expression, coefficients);
        Ok(())
    }

    /// Like [`SpecBuilder::add_row`], but an expression seen before has the
    /// new coefficients added onto its existing row.
    pub fn accumulate_row(
        &mut self,
        expression: impl Into<String>,
        coefficients: &[f64],
    ) -> Result<()> {
        let expression = expression.into();
        self.check_expression(&expression, coefficients)?;
        match self.positions.get(&expression) {
            Some(&row) => {
                let width = self.alternatives.len();
                let target = &mut self.coefficients[row * width..(row + 1) * width];
                for (slot, value) in target.iter_mut().zip(coefficients) {
                    *slot += value;
                }
            }
            None => self.push(expression, coefficients),
        }
        Ok(())
    }

    /// Set coefficients by alternative name; unnamed alternatives get zero.
    pub fn add_named_row<'n, I>(&mut self, expression: impl Into<String>, named: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'n str, f64)>,
    {
        let expression = expression.into();
        let mut dense = vec![0.0; self.alternatives.len()];
        for (name, value) in named {
            let idx = self
                .alternatives
                .iter()
                .position(|alternative| alternative == name)
                .ok_or_else(|| {
                    SimulateError::invalid_spec(format!(
                        "expression `{expression}` names unknown alternative `{name}`"
                    ))
                })?;
            dense[idx] = value;
        }
        self.add_row(expression, &dense)
    }

    pub fn build(self) -> Result<Spec> {
        if self.expressions.is_empty() {
            return Err(SimulateError::invalid_spec("no expression rows"));
        }
        Ok(Spec {
            expressions: self.expressions,
            alternatives: self.alternatives,
            coefficients: self.coefficients,
        })
    }

    fn check_expression(&self, expression: &str, coefficients: &[f64]) -> Result<()> {
        if expression.trim().is_empty() {
            return Err(SimulateError::invalid_spec("empty expression"));
        }
        if coefficients.len() > self.alternatives.len() {
            return Err(SimulateError::invalid_spec(format!(
                "expression `{expression}` has {} coefficients for {} alternatives",
                coefficients.len(),
                self.alternatives.len()
            )));
        }
        Ok(())
    }

    fn push(&mut self, expression: String, coefficients: &[f64]) {
        let width = self.alternatives.len();
        self.coefficients.extend_from_slice(coefficients);
        self.coefficients
            .extend(std::iter::repeat(0.0).take(width - coefficients.len()));
        self.positions.insert(expression.clone(), self.expressions.len());
        self.expressions.push(expression);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes() -> Vec<String> {
        vec!["walk".into(), "bike".into(), "drive".into()]
    }

    #[test]
    fn short_rows_are_zero_padded() {
        let spec = Spec::from_rows(modes(), [("age > 60", vec![0.5]), ("income", vec![0.0, 0.1, 0.2])])
            .expect("spec");
        assert_eq!(spec.row(0), &[0.5, 0.0, 0.0]);
        assert_eq!(spec.coefficient(1, 2), 0.2);
        assert_eq!(spec.expression_index("income"), Some(1));
        assert_eq!(spec.alternative_index("bike"), Some(1));
    }

    #[test]
    fn duplicate_expression_is_rejected() {
        let err = Spec::from_rows(modes(), [("age", vec![1.0]), ("age", vec![2.0])])
            .expect_err("duplicate");
        assert!(err.to_string().contains("duplicate expression `age`"));
    }

    #[test]
    fn blank_expression_and_wide_rows_are_rejected() {
        let mut builder = SpecBuilder::new(modes()).expect("builder");
        assert!(builder.add_row("  ", &[1.0]).is_err());
        assert!(builder.add_row("age", &[1.0, 2.0, 3.0, 4.0]).is_err());
    }

    #[test]
    fn duplicate_alternatives_are_rejected() {
        let err = SpecBuilder::new(vec!["car".into(), "car".into()]).expect_err("dup");
        assert!(err.to_string().contains("duplicate alternative `car`"));
    }

    #[test]
    fn accumulate_sums_repeated_expressions() {
        let mut builder = SpecBuilder::new(modes()).expect("builder");
        builder.accumulate_row("age", &[1.0, 0.0, 2.0]).expect("first");
        builder.accumulate_row("income", &[0.0, 1.0]).expect("second");
        builder.accumulate_row("age", &[0.5, 0.5, 0.5]).expect("merge");
        let spec = builder.build().expect("spec");
        assert_eq!(spec.expressions(), &["age".to_string(), "income".to_string()]);
        assert_eq!(spec.row(0), &[1.5, 0.5, 2.5]);
    }

    #[test]
    fn named_rows_fill_missing_with_zero() {
        let mut builder = SpecBuilder::new(modes()).expect("builder");
        builder.add_named_row("dist", [("drive", -0.3)]).expect("row");
        assert!(builder.add_named_row("x", [("boat", 1.0)]).is_err());
        let spec = builder.build().expect("spec");
        assert_eq!(spec.row(0), &[0.0, 0.0, -0.3]);
    }

    #[test]
    fn empty_spec_is_rejected() {
        let builder = SpecBuilder::new(modes()).expect("builder");
        assert!(builder.build().is_err());
    }
}
