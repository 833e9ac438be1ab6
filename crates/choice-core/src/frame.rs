//! Dense row-major matrices keyed by entity rows and labelled columns.
//!
//! Expression values, utilities and probabilities all share this layout so a
//! chunk's intermediate working set is a handful of `rows * cols` buffers.

use crate::error::{Result, SimulateError};

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    keys: Vec<u64>,
    columns: Vec<String>,
    data: Vec<f64>,
}

impl Frame {
    pub fn zeros(keys: Vec<u64>, columns: Vec<String>) -> Self {
        let data = vec![0.0; keys.len() * columns.len()];
        Self {
            keys,
            columns,
            data,
        }
    }

    pub fn from_rows(keys: Vec<u64>, columns: Vec<String>, data: Vec<f64>) -> Result<Self> {
        if data.len() != keys.len() * columns.len() {
            return Err(SimulateError::shape(format!(
                "{} cells for {} rows x {} columns",
                data.len(),
                keys.len(),
                columns.len()
            )));
        }
        Ok(Self {
            keys,
            columns,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.keys.len()
    }

    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    pub fn cells(&self) -> usize {
        self.data.len()
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let width = self.cols();
        &self.data[row * width..(row + 1) * width]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        let width = self.cols();
        &mut self.data[row * width..(row + 1) * width]
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols() + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        let width = self.cols();
        self.data[row * width + col] = value;
    }

    pub fn column_values(&self, col: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.rows()).map(move |row| self.get(row, col))
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = (u64, &[f64])> + '_ {
        self.keys
            .iter()
            .enumerate()
            .map(move |(idx, key)| (*key, self.row(idx)))
    }
}
