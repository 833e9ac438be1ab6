//! Column-oriented chooser tables and the row views chunks are evaluated on.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use crate::error::{Result, SimulateError};

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Float(values) => values.len(),
            Self::Int(values) => values.len(),
            Self::Bool(values) => values.len(),
            Self::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Text(_) => "text",
        }
    }

    fn slice(&self, rows: Range<usize>) -> ColumnSlice<'_> {
        match self {
            Self::Float(values) => ColumnSlice::Float(&values[rows]),
            Self::Int(values) => ColumnSlice::Int(&values[rows]),
            Self::Bool(values) => ColumnSlice::Bool(&values[rows]),
            Self::Text(values) => ColumnSlice::Text(&values[rows]),
        }
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Self::Float(values)
    }
}

impl From<Vec<i64>> for Column {
    fn from(values: Vec<i64>) -> Self {
        Self::Int(values)
    }
}

impl From<Vec<bool>> for Column {
    fn from(values: Vec<bool>) -> Self {
        Self::Bool(values)
    }
}

impl From<Vec<String>> for Column {
    fn from(values: Vec<String>) -> Self {
        Self::Text(values)
    }
}

impl From<Vec<&str>> for Column {
    fn from(values: Vec<&str>) -> Self {
        Self::Text(values.into_iter().map(str::to_string).collect())
    }
}

/// Borrowed rows of one column.
#[derive(Debug, Clone, Copy)]
pub enum ColumnSlice<'a> {
    Float(&'a [f64]),
    Int(&'a [i64]),
    Bool(&'a [bool]),
    Text(&'a [String]),
}

impl<'a> ColumnSlice<'a> {
    pub fn len(&self) -> usize {
        match self {
            Self::Float(values) => values.len(),
            Self::Int(values) => values.len(),
            Self::Bool(values) => values.len(),
            Self::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of the rows; booleans become 0/1. `None` for text.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Self::Float(values) => Some(values.to_vec()),
            Self::Int(values) => Some(values.iter().map(|value| *value as f64).collect()),
            Self::Bool(values) => Some(
                values
                    .iter()
                    .map(|value| if *value { 1.0 } else { 0.0 })
                    .collect(),
            ),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&'a [String]> {
        match self {
            Self::Text(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&'a [i64]> {
        match self {
            Self::Int(values) => Some(values),
            _ => None,
        }
    }
}

/// Chooser table: one unique entity key per row plus named feature columns.
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    keys: Vec<u64>,
    names: Vec<String>,
    columns: Vec<Column>,
    index: BTreeMap<String, usize>,
}

impl EntityTable {
    pub fn new(keys: Vec<u64>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = keys.iter().find(|key| !seen.insert(**key)) {
            return Err(SimulateError::invalid_table(format!(
                "duplicate entity key {duplicate}"
            )));
        }
        Ok(Self {
            keys,
            ..Self::default()
        })
    }

    pub fn with_column(mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<Self> {
        self.insert_column(name, column)?;
        Ok(self)
    }

    pub fn insert_column(&mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let name = name.into();
        let column = column.into();
        if name.trim().is_empty() {
            return Err(SimulateError::invalid_table("column name is empty"));
        }
        if column.len() != self.keys.len() {
            return Err(SimulateError::invalid_table(format!(
                "column `{name}` has {} rows, table has {}",
                column.len(),
                self.keys.len()
            )));
        }
        if self.index.contains_key(&name) {
            return Err(SimulateError::invalid_table(format!(
                "duplicate column `{name}`"
            )));
        }
        self.index.insert(name.clone(), self.columns.len());
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|idx| &self.columns[*idx])
    }

    pub fn view(&self) -> TableView<'_> {
        TableView {
            table: self,
            rows: 0..self.len(),
        }
    }

    pub fn rows(&self, rows: Range<usize>) -> Result<TableView<'_>> {
        if rows.start > rows.end || rows.end > self.len() {
            return Err(SimulateError::invalid_table(format!(
                "row range {}..{} out of bounds for {} rows",
                rows.start,
                rows.end,
                self.len()
            )));
        }
        Ok(TableView { table: self, rows })
    }
}

/// A contiguous row range of an [`EntityTable`]; what a chunk sees.
#[derive(Debug, Clone)]
pub struct TableView<'a> {
    table: &'a EntityTable,
    rows: Range<usize>,
}

impl<'a> TableView<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Offset of the first row within the full table.
    pub fn start(&self) -> usize {
        self.rows.start
    }

    pub fn keys(&self) -> &'a [u64] {
        &self.table.keys[self.rows.clone()]
    }

    pub fn column_count(&self) -> usize {
        self.table.column_count()
    }

    pub fn column(&self, name: &str) -> Option<ColumnSlice<'a>> {
        self.table
            .column(name)
            .map(|column| column.slice(self.rows.clone()))
    }
}
