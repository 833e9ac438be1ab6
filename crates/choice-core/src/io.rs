//! CSV loaders for spec files and chooser tables.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, SimulateError};
use crate::spec::{Spec, SpecBuilder};
use crate::table::{Column, EntityTable};

pub const EXPRESSION_COLUMN: &str = "Expression";
pub const DESCRIPTION_COLUMN: &str = "Description";

/// Read a spec CSV.
///
/// The header names the columns. A `Description` column is dropped, the
/// `Expression` column (or the first remaining column when there is none)
/// holds the expressions, and every column after it is an alternative. Lines
/// starting with `#` are comments, rows with a blank expression are skipped,
/// and blank coefficients are zero.
pub fn read_model_spec<R: Read>(reader: R) -> Result<Spec> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let kept: Vec<usize> = (0..headers.len())
        .filter(|idx| headers.get(*idx) != Some(DESCRIPTION_COLUMN))
        .collect();
    let expression_pos = kept
        .iter()
        .position(|idx| headers.get(*idx) == Some(EXPRESSION_COLUMN))
        .unwrap_or(0);
    let expression_col = *kept
        .get(expression_pos)
        .ok_or_else(|| SimulateError::invalid_spec("spec file has no columns"))?;
    let alternative_cols = &kept[expression_pos + 1..];
    let alternatives = alternative_cols
        .iter()
        .map(|idx| headers.get(*idx).unwrap_or_default().to_string())
        .collect();

    let mut builder = SpecBuilder::new(alternatives)?;
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let expression = record.get(expression_col).unwrap_or_default();
        if expression.is_empty() {
            continue;
        }
        let coefficients = alternative_cols
            .iter()
            .map(|idx| parse_coefficient(record.get(*idx).unwrap_or_default(), expression, line))
            .collect::<Result<Vec<_>>>()?;
        builder.add_row(expression, &coefficients)?;
    }
    let spec = builder.build()?;
    debug!(
        expressions = spec.expression_count(),
        alternatives = spec.alternative_count(),
        "read model spec"
    );
    Ok(spec)
}

pub fn read_model_spec_path(path: impl AsRef<Path>) -> Result<Spec> {
    read_model_spec(File::open(path)?)
}

fn parse_coefficient(raw: &str, expression: &str, line: usize) -> Result<f64> {
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>().map_err(|_| {
        SimulateError::invalid_spec(format!(
            "record {} (`{expression}`): coefficient `{raw}` is not a number",
            line + 1
        ))
    })
}

/// Read a chooser table keyed by the unsigned integer `key_column`.
///
/// Column types are inferred from the values: integers, then floats (blank
/// cells become NaN), then booleans, otherwise text.
pub fn read_entity_table<R: Read>(reader: R, key_column: &str) -> Result<EntityTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let key_idx = headers
        .iter()
        .position(|name| name == key_column)
        .ok_or_else(|| SimulateError::invalid_table(format!("missing key column `{key_column}`")))?;
    let records = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;

    let keys = records
        .iter()
        .map(|record| {
            let raw = record.get(key_idx).unwrap_or_default();
            raw.parse::<u64>().map_err(|_| {
                SimulateError::invalid_table(format!("key `{raw}` in `{key_column}` is not an unsigned integer"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut table = EntityTable::new(keys)?;
    for (idx, name) in headers.iter().enumerate() {
        if idx == key_idx {
            continue;
        }
        let cells: Vec<&str> = records
            .iter()
            .map(|record| record.get(idx).unwrap_or_default())
            .collect();
        table.insert_column(name, infer_column(&cells))?;
    }
    debug!(rows = table.len(), columns = table.column_count(), "read entity table");
    Ok(table)
}

pub fn read_entity_table_path(path: impl AsRef<Path>, key_column: &str) -> Result<EntityTable> {
    read_entity_table(File::open(path)?, key_column)
}

fn infer_column(cells: &[&str]) -> Column {
    if cells.iter().all(|cell| !cell.is_empty()) {
        let ints: Option<Vec<i64>> = cells.iter().map(|cell| cell.parse().ok()).collect();
        if let Some(ints) = ints {
            return Column::Int(ints);
        }
    }
    let floats: Option<Vec<f64>> = cells
        .iter()
        .map(|cell| {
            if cell.is_empty() {
                Some(f64::NAN)
            } else {
                cell.parse::<f64>().ok()
            }
        })
        .collect();
    if let Some(floats) = floats {
        return Column::Float(floats);
    }
    let flags: Option<Vec<bool>> = cells.iter().map(|cell| parse_flag(cell)).collect();
    if let Some(flags) = flags {
        return Column::Bool(flags);
    }
    Column::Text(cells.iter().map(|cell| cell.to_string()).collect())
}

fn parse_flag(cell: &str) -> Option<bool> {
    match cell {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}
