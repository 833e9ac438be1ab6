//! A small expression language for spec rows.
//!
//! Two kinds of expressions are supported:
//!
//! - *table* expressions (`age >= 18 & tour_type == 'work'`) whose names are
//!   chooser columns;
//! - *environment* expressions, marked with a leading `@`, whose names are
//!   model constants and lookup providers (`@od_skims['DIST'] * cost_factor`),
//!   with chooser columns reachable as `df.<column>`. Scalar results are
//!   broadcast to every row.
//!
//! Both kinds share one grammar: arithmetic (`+ - * / // % **`), comparisons
//! (chainable), boolean `& | ~ and or not`, string and numeric literals,
//! `True`/`False`, and the functions `log exp abs sqrt floor ceil min max clip
//! where isnull`. Expressions compile once into a plan that is evaluated per
//! chunk.

mod eval;
mod lexer;
mod parser;

use std::collections::BTreeMap;

use tracing::debug;

use crate::env::{EnvValue, Environment};
use crate::error::{EvalError, Result, SimulateError};
use crate::frame::Frame;
use crate::spec::Spec;
use crate::table::TableView;

use eval::Scope;
use parser::Expr;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    Table,
    Environment,
}

#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    kind: ExpressionKind,
    ast: Expr,
}

impl CompiledExpression {
    pub fn compile(source: &str) -> Result<Self> {
        let leading = source.len() - source.trim_start().len();
        let (kind, body, prefix) = match source[leading..].strip_prefix('@') {
            Some(body) => (ExpressionKind::Environment, body, leading + 1),
            None => (ExpressionKind::Table, source, 0),
        };
        let ast = parser::parse(body).map_err(|err| SimulateError::Parse {
            expression: source.to_string(),
            offset: err.offset + prefix,
            message: err.message,
        })?;
        Ok(Self {
            source: source.to_string(),
            kind,
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> ExpressionKind {
        self.kind
    }
}

/// Compiled expressions of one spec, evaluated in spec order.
#[derive(Debug, Clone, Default)]
pub struct ExpressionPlan {
    expressions: Vec<CompiledExpression>,
    /// Lookup names with the index of the first expression using them.
    lookups: Vec<(String, usize)>,
}

impl ExpressionPlan {
    pub fn compile<I, S>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut expressions = Vec::new();
        let mut lookups = Vec::new();
        for (idx, source) in sources.into_iter().enumerate() {
            let compiled = CompiledExpression::compile(source.as_ref())?;
            if compiled.kind == ExpressionKind::Environment {
                let mut names = Vec::new();
                compiled.ast.collect_lookups(&mut names);
                for name in names {
                    if !lookups.iter().any(|(known, _): &(String, usize)| known == name) {
                        lookups.push((name.to_string(), idx));
                    }
                }
            }
            expressions.push(compiled);
        }
        debug!(
            expressions = expressions.len(),
            lookups = lookups.len(),
            "compiled expression plan"
        );
        Ok(Self {
            expressions,
            lookups,
        })
    }

    pub fn for_spec(spec: &Spec) -> Result<Self> {
        Self::compile(spec.expressions())
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn expressions(&self) -> &[CompiledExpression] {
        &self.expressions
    }

    pub fn names(&self) -> Vec<String> {
        self.expressions
            .iter()
            .map(|compiled| compiled.source.clone())
            .collect()
    }

    /// Evaluate every expression against `rows`, one column per expression.
    ///
    /// Lookup providers referenced by the plan are bound to `rows` for the
    /// duration of the call; a binding failure is charged to the first
    /// expression using that provider. The first failing expression aborts
    /// evaluation.
    pub fn evaluate(&self, rows: &TableView<'_>, env: &Environment) -> Result<Frame> {
        let mut lookups = BTreeMap::new();
        for (name, first_use) in &self.lookups {
            if let Some(EnvValue::Lookup(provider)) = env.get(name) {
                let bound = provider.bind_rows(rows).map_err(|err| SimulateError::Evaluation {
                    expression: self.expressions[*first_use].source.clone(),
                    source: EvalError::Lookup(err),
                })?;
                lookups.insert(name.clone(), bound);
            }
        }

        let row_count = rows.len();
        let mut frame = Frame::zeros(rows.keys().to_vec(), self.names());
        for (col, compiled) in self.expressions.iter().enumerate() {
            let scope = Scope {
                rows,
                env,
                lookups: &lookups,
                kind: compiled.kind,
            };
            let values = scope
                .eval(&compiled.ast)
                .and_then(|value| value.into_column(row_count))
                .map_err(|source| SimulateError::Evaluation {
                    expression: compiled.source.clone(),
                    source,
                })?;
            for (row, value) in values.into_iter().enumerate() {
                frame.set(row, col, value);
            }
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::LookupError;
    use crate::skim::SkimDict;
    use crate::table::EntityTable;

    fn persons() -> EntityTable {
        EntityTable::new(vec![101, 102, 103, 104])
            .and_then(|t| t.with_column("age", vec![34_i64, 8, 71, 45]))
            .and_then(|t| t.with_column("income", vec![52.5, 0.0, 20.0, f64::NAN]))
            .and_then(|t| t.with_column("is_worker", vec![true, false, false, true]))
            .and_then(|t| t.with_column("tour_type", vec!["work", "school", "shop", "work"]))
            .and_then(|t| t.with_column("home_zone", vec![1_i64, 2, 1, 2]))
            .and_then(|t| t.with_column("work_zone", vec![2_i64, 2, 1, 1]))
            .expect("persons")
    }

    fn column(frame: &Frame, col: usize) -> Vec<f64> {
        frame.column_values(col).collect()
    }

    #[test]
    fn table_expressions_use_row_columns() {
        let table = persons();
        let plan = ExpressionPlan::compile([
            "age >= 18 & is_worker",
            "tour_type == 'work'",
            "income / 10 + 1",
            "where(age < 18, 1, age // 10)",
            "isnull(income)",
        ])
        .expect("plan");
        let frame = plan.evaluate(&table.view(), &Environment::new()).expect("evaluate");

        assert_eq!(frame.columns()[1], "tour_type == 'work'");
        assert_eq!(column(&frame, 0), vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(column(&frame, 1), vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(column(&frame, 2)[..3], [6.25, 1.0, 3.0]);
        assert!(column(&frame, 2)[3].is_nan());
        assert_eq!(column(&frame, 3), vec![3.0, 1.0, 7.0, 4.0]);
        assert_eq!(column(&frame, 4), vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn environment_scalars_broadcast_to_rows() {
        let table = persons();
        let env = Environment::new().with_number("cost_factor", 0.25);
        let plan = ExpressionPlan::compile(["@cost_factor * 4", "@df.age * cost_factor"])
            .expect("plan");
        let frame = plan.evaluate(&table.view(), &env).expect("evaluate");
        assert_eq!(column(&frame, 0), vec![1.0; 4]);
        assert_eq!(column(&frame, 1), vec![8.5, 2.0, 17.75, 11.25]);
    }

    #[test]
    fn environment_expressions_read_lookups_for_active_rows() {
        let table = persons();
        let skims = SkimDict::new(vec![1, 2])
            .and_then(|d| d.with_matrix("DIST", vec![0.5, 4.0, 4.5, 1.0]))
            .expect("skims");
        let env = Environment::new().with_lookup("od_skims", Arc::new(skims).wrap("home_zone", "work_zone"));
        let plan = ExpressionPlan::compile(["@od_skims['DIST'] * 2"]).expect("plan");

        let view = table.rows(1..4).expect("view");
        let frame = plan.evaluate(&view, &env).expect("evaluate");
        assert_eq!(frame.keys(), &[102, 103, 104]);
        assert_eq!(column(&frame, 0), vec![2.0, 1.0, 9.0]);
    }

    #[test]
    fn failed_lookup_binding_names_first_expression_using_it() {
        let table = EntityTable::new(vec![1, 2])
            .and_then(|t| t.with_column("home_zone", vec![1_i64, 2]))
            .and_then(|t| t.with_column("work_zone", vec![2_i64, 9]))
            .expect("table");
        let skims = SkimDict::new(vec![1, 2])
            .and_then(|d| d.with_matrix("DIST", vec![0.5, 4.0, 4.5, 1.0]))
            .expect("skims");
        let env = Environment::new().with_lookup("od_skims", Arc::new(skims).wrap("home_zone", "work_zone"));
        let plan = ExpressionPlan::compile(["home_zone", "@od_skims['DIST']", "@od_skims['DIST'] * 2"])
            .expect("plan");
        let err = plan.evaluate(&table.view(), &env).expect_err("unknown zone");
        assert_eq!(err.expression(), Some("@od_skims['DIST']"));
        assert!(matches!(
            err,
            SimulateError::Evaluation {
                source: EvalError::Lookup(LookupError::UnknownZone { zone: 9, .. }),
                ..
            }
        ));
    }

    #[test]
    fn unknown_column_identifies_expression() {
        let table = persons();
        let plan = ExpressionPlan::compile(["age > 1", "height > 2"]).expect("plan");
        let err = plan.evaluate(&table.view(), &Environment::new()).expect_err("unknown");
        assert_eq!(err.expression(), Some("height > 2"));
        assert!(matches!(
            err,
            SimulateError::Evaluation {
                source: EvalError::UnknownColumn(ref name),
                ..
            } if name == "height"
        ));
    }

    #[test]
    fn table_expressions_do_not_see_environment() {
        let table = persons();
        let env = Environment::new().with_number("min_age", 18.0);
        let plan = ExpressionPlan::compile(["age > min_age"]).expect("plan");
        let err = plan.evaluate(&table.view(), &env).expect_err("column only");
        assert_eq!(err.expression(), Some("age > min_age"));
    }

    #[test]
    fn arithmetic_on_text_is_a_type_error() {
        let table = persons();
        let plan = ExpressionPlan::compile(["tour_type + 1"]).expect("plan");
        let err = plan.evaluate(&table.view(), &Environment::new()).expect_err("text");
        assert!(matches!(
            err,
            SimulateError::Evaluation {
                source: EvalError::TypeMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn bare_lookup_is_rejected() {
        let table = persons();
        let skims = Arc::new(SkimDict::new(vec![1, 2]).expect("skims"));
        let env = Environment::new().with_lookup("od_skims", skims.wrap("home_zone", "work_zone"));
        let plan = ExpressionPlan::compile(["@od_skims + 1"]).expect("plan");
        let err = plan.evaluate(&table.view(), &env).expect_err("bare lookup");
        assert!(matches!(
            err,
            SimulateError::Evaluation {
                source: EvalError::BareLookup(_),
                ..
            }
        ));
    }

    #[test]
    fn parse_errors_carry_offsets_past_the_marker() {
        let err = ExpressionPlan::compile(["  @cost *"]).expect_err("parse");
        match err {
            SimulateError::Parse {
                expression, offset, ..
            } => {
                assert_eq!(expression, "  @cost *");
                assert_eq!(offset, 9);
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
