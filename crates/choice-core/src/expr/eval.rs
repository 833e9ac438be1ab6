use std::collections::BTreeMap;

use super::parser::{BinaryOp, Expr, Function, UnaryOp};
use super::ExpressionKind;
use crate::env::{EnvValue, Environment};
use crate::error::EvalError;
use crate::skim::RowLookup;
use crate::table::{ColumnSlice, TableView};

/// Intermediate result; scalars broadcast lazily against row vectors.
#[derive(Debug, Clone)]
pub(crate) enum Value<'a> {
    Scalar(f64),
    Vector(Vec<f64>),
    Text(String),
    TextColumn(&'a [String]),
}

impl<'a> Value<'a> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "number",
            Self::Vector(_) => "numeric column",
            Self::Text(_) => "string",
            Self::TextColumn(_) => "text column",
        }
    }

    fn is_text(&self) -> bool {
        matches!(self, Self::Text(_) | Self::TextColumn(_))
    }

    /// Broadcast to exactly `rows` floats.
    pub(crate) fn into_column(self, rows: usize) -> Result<Vec<f64>, EvalError> {
        match self {
            Self::Scalar(value) => Ok(vec![value; rows]),
            Self::Vector(values) if values.len() == rows => Ok(values),
            Self::Vector(values) => Err(EvalError::LengthMismatch {
                left: values.len(),
                right: rows,
            }),
            other => Err(EvalError::TypeMismatch {
                op: "float coercion".to_string(),
                operand: other.kind().to_string(),
            }),
        }
    }
}

fn truthy(value: f64) -> bool {
    value != 0.0
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn python_mod(a: f64, b: f64) -> f64 {
    a - b * (a / b).floor()
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

pub(crate) struct Scope<'s, 'a> {
    pub rows: &'s TableView<'a>,
    pub env: &'s Environment,
    pub lookups: &'s BTreeMap<String, Box<dyn RowLookup + 'a>>,
    pub kind: ExpressionKind,
}

impl<'s, 'a> Scope<'s, 'a> {
    pub(crate) fn eval(&self, expr: &Expr) -> Result<Value<'a>, EvalError> {
        match expr {
            Expr::Number(value) => Ok(Value::Scalar(*value)),
            Expr::Text(text) => Ok(Value::Text(text.clone())),
            Expr::Name(name) => self.name(name),
            Expr::Attribute { base, attr } => self.attribute(base, attr),
            Expr::Lookup { provider, key } => self.lookup(provider, key),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => numeric_unary(value, "-", |x| -x),
                    UnaryOp::Not => numeric_unary(value, "not", |x| flag(!truthy(x))),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }
            Expr::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(*function, values)
            }
        }
    }

    fn column(&self, name: &str) -> Result<Value<'a>, EvalError> {
        let slice = self
            .rows
            .column(name)
            .ok_or_else(|| EvalError::UnknownColumn(name.to_string()))?;
        Ok(match slice {
            ColumnSlice::Text(values) => Value::TextColumn(values),
            numeric => Value::Vector(numeric.to_f64().unwrap_or_default()),
        })
    }

    fn name(&self, name: &str) -> Result<Value<'a>, EvalError> {
        if self.kind == ExpressionKind::Table {
            return self.column(name);
        }
        match self.env.get(name) {
            Some(EnvValue::Number(value)) => Ok(Value::Scalar(*value)),
            Some(EnvValue::Text(text)) => Ok(Value::Text(text.clone())),
            Some(EnvValue::Lookup(_)) => Err(EvalError::BareLookup(name.to_string())),
            None => Err(EvalError::UnknownVariable(name.to_string())),
        }
    }

    fn attribute(&self, base: &str, attr: &str) -> Result<Value<'a>, EvalError> {
        match self.kind {
            ExpressionKind::Environment if base == "df" => self.column(attr),
            ExpressionKind::Environment => Err(EvalError::UnknownVariable(format!("{base}.{attr}"))),
            ExpressionKind::Table => Err(EvalError::UnknownColumn(format!("{base}.{attr}"))),
        }
    }

    fn lookup(&self, provider: &str, key: &str) -> Result<Value<'a>, EvalError> {
        if self.kind == ExpressionKind::Table {
            return Err(EvalError::UnknownColumn(provider.to_string()));
        }
        let bound = match self.lookups.get(provider) {
            Some(bound) => bound,
            None => {
                return Err(match self.env.get(provider) {
                    Some(_) => EvalError::NotALookup(provider.to_string()),
                    None => EvalError::UnknownVariable(provider.to_string()),
                })
            }
        };
        let values = bound.value(key)?;
        if values.len() != self.rows.len() {
            return Err(EvalError::LengthMismatch {
                left: values.len(),
                right: self.rows.len(),
            });
        }
        Ok(Value::Vector(values))
    }

    fn call(&self, function: Function, mut args: Vec<Value<'a>>) -> Result<Value<'a>, EvalError> {
        let name = function.name();
        match function {
            Function::Log => numeric_unary(take(&mut args), name, f64::ln),
            Function::Exp => numeric_unary(take(&mut args), name, f64::exp),
            Function::Abs => numeric_unary(take(&mut args), name, f64::abs),
            Function::Sqrt => numeric_unary(take(&mut args), name, f64::sqrt),
            Function::Floor => numeric_unary(take(&mut args), name, f64::floor),
            Function::Ceil => numeric_unary(take(&mut args), name, f64::ceil),
            Function::IsNull => numeric_unary(take(&mut args), name, |x| flag(x.is_nan())),
            Function::Min => {
                let left = take(&mut args);
                let right = take(&mut args);
                numeric_binary(left, right, name, nan_min)
            }
            Function::Max => {
                let left = take(&mut args);
                let right = take(&mut args);
                numeric_binary(left, right, name, nan_max)
            }
            Function::Clip => {
                let value = take(&mut args);
                let lower = take(&mut args);
                let upper = take(&mut args);
                let floored = numeric_binary(value, lower, name, nan_max)?;
                numeric_binary(floored, upper, name, nan_min)
            }
            Function::Where => {
                let condition = take(&mut args);
                let when_true = take(&mut args);
                let when_false = take(&mut args);
                self.select(condition, when_true, when_false)
            }
        }
    }

    fn select(
        &self,
        condition: Value<'a>,
        when_true: Value<'a>,
        when_false: Value<'a>,
    ) -> Result<Value<'a>, EvalError> {
        if let (Value::Scalar(c), Value::Scalar(t), Value::Scalar(f)) =
            (&condition, &when_true, &when_false)
        {
            return Ok(Value::Scalar(if truthy(*c) { *t } else { *f }));
        }
        let rows = self.rows.len();
        let condition = condition.into_column(rows)?;
        let when_true = when_true.into_column(rows)?;
        let when_false = when_false.into_column(rows)?;
        Ok(Value::Vector(
            condition
                .iter()
                .zip(when_true.iter().zip(&when_false))
                .map(|(c, (t, f))| if truthy(*c) { *t } else { *f })
                .collect(),
        ))
    }
}

// Arity was checked by the parser.
fn take<'a>(args: &mut Vec<Value<'a>>) -> Value<'a> {
    if args.is_empty() {
        Value::Scalar(f64::NAN)
    } else {
        args.remove(0)
    }
}

fn numeric_unary<'a>(
    value: Value<'a>,
    op: &str,
    f: impl Fn(f64) -> f64,
) -> Result<Value<'a>, EvalError> {
    match value {
        Value::Scalar(x) => Ok(Value::Scalar(f(x))),
        Value::Vector(values) => Ok(Value::Vector(values.into_iter().map(f).collect())),
        other => Err(EvalError::TypeMismatch {
            op: op.to_string(),
            operand: other.kind().to_string(),
        }),
    }
}

fn numeric_binary<'a>(
    left: Value<'a>,
    right: Value<'a>,
    op: &str,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value<'a>, EvalError> {
    match (left, right) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(a, b))),
        (Value::Scalar(a), Value::Vector(b)) => {
            Ok(Value::Vector(b.into_iter().map(|y| f(a, y)).collect()))
        }
        (Value::Vector(a), Value::Scalar(b)) => {
            Ok(Value::Vector(a.into_iter().map(|x| f(x, b)).collect()))
        }
        (Value::Vector(a), Value::Vector(b)) => {
            if a.len() != b.len() {
                return Err(EvalError::LengthMismatch {
                    left: a.len(),
                    right: b.len(),
                });
            }
            Ok(Value::Vector(
                a.into_iter().zip(b).map(|(x, y)| f(x, y)).collect(),
            ))
        }
        (left, right) => {
            let operand = if left.is_text() { left.kind() } else { right.kind() };
            Err(EvalError::TypeMismatch {
                op: op.to_string(),
                operand: operand.to_string(),
            })
        }
    }
}

fn text_at<'v>(value: &'v Value<'_>, row: usize) -> &'v str {
    match value {
        Value::Text(text) => text,
        Value::TextColumn(values) => &values[row],
        _ => "",
    }
}

fn text_len(value: &Value<'_>) -> Option<usize> {
    match value {
        Value::TextColumn(values) => Some(values.len()),
        _ => None,
    }
}

fn compare_text<'a>(op: BinaryOp, left: Value<'a>, right: Value<'a>) -> Result<Value<'a>, EvalError> {
    if !(left.is_text() && right.is_text()) {
        let operand = if left.is_text() { right.kind() } else { left.kind() };
        return Err(EvalError::TypeMismatch {
            op: op.symbol().to_string(),
            operand: operand.to_string(),
        });
    }
    let test = |a: &str, b: &str| match op {
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    };
    let rows = match (text_len(&left), text_len(&right)) {
        (None, None) => return Ok(Value::Scalar(flag(test(text_at(&left, 0), text_at(&right, 0))))),
        (Some(a), Some(b)) if a != b => {
            return Err(EvalError::LengthMismatch { left: a, right: b })
        }
        (Some(n), _) | (None, Some(n)) => n,
    };
    Ok(Value::Vector(
        (0..rows)
            .map(|row| flag(test(text_at(&left, row), text_at(&right, row))))
            .collect(),
    ))
}

fn binary<'a>(op: BinaryOp, left: Value<'a>, right: Value<'a>) -> Result<Value<'a>, EvalError> {
    let symbol = op.symbol();
    match op {
        BinaryOp::Add => numeric_binary(left, right, symbol, |a, b| a + b),
        BinaryOp::Sub => numeric_binary(left, right, symbol, |a, b| a - b),
        BinaryOp::Mul => numeric_binary(left, right, symbol, |a, b| a * b),
        BinaryOp::Div => numeric_binary(left, right, symbol, |a, b| a / b),
        BinaryOp::FloorDiv => numeric_binary(left, right, symbol, |a, b| (a / b).floor()),
        BinaryOp::Mod => numeric_binary(left, right, symbol, python_mod),
        BinaryOp::Pow => numeric_binary(left, right, symbol, f64::powf),
        BinaryOp::And => numeric_binary(left, right, symbol, |a, b| flag(truthy(a) && truthy(b))),
        BinaryOp::Or => numeric_binary(left, right, symbol, |a, b| flag(truthy(a) || truthy(b))),
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
            if left.is_text() || right.is_text() =>
        {
            compare_text(op, left, right)
        }
        BinaryOp::Eq => numeric_binary(left, right, symbol, |a, b| flag(a == b)),
        BinaryOp::Ne => numeric_binary(left, right, symbol, |a, b| flag(a != b)),
        BinaryOp::Lt => numeric_binary(left, right, symbol, |a, b| flag(a < b)),
        BinaryOp::Le => numeric_binary(left, right, symbol, |a, b| flag(a <= b)),
        BinaryOp::Gt => numeric_binary(left, right, symbol, |a, b| flag(a > b)),
        BinaryOp::Ge => numeric_binary(left, right, symbol, |a, b| flag(a >= b)),
    }
}
