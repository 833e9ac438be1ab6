//! Lookup providers ("skims"): keyed origin/destination tables whose values
//! are pulled into `@` expressions one value per chooser row.
//!
//! A provider is bound to the rows of the chunk being evaluated through
//! [`LookupProvider::bind_rows`]; binding only resolves row keys to matrix
//! offsets and never mutates the underlying tables, so one provider can be
//! shared by chunks running on different threads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::LookupError;
use crate::table::TableView;

pub trait LookupProvider: Send + Sync + fmt::Debug {
    /// Project the provider onto the active rows of the current chunk.
    fn bind_rows<'a>(
        &'a self,
        rows: &TableView<'a>,
    ) -> Result<Box<dyn RowLookup + 'a>, LookupError>;
}

/// A provider projected onto a chunk: one value per active row.
pub trait RowLookup {
    fn value(&self, key: &str) -> Result<Vec<f64>, LookupError>;
}

/// Square zone-to-zone matrices addressed by zone id.
///
/// Time-period slices are stored as separate matrices named `<key>__<period>`.
#[derive(Debug, Clone, Default)]
pub struct SkimDict {
    zones: Vec<i64>,
    zone_index: BTreeMap<i64, usize>,
    matrices: BTreeMap<String, Vec<f64>>,
}

impl SkimDict {
    pub fn new(zones: Vec<i64>) -> Result<Self, LookupError> {
        let mut zone_index = BTreeMap::new();
        for (idx, zone) in zones.iter().enumerate() {
            if zone_index.insert(*zone, idx).is_some() {
                return Err(LookupError::DuplicateZone(*zone));
            }
        }
        Ok(Self {
            zones,
            zone_index,
            matrices: BTreeMap::new(),
        })
    }

    /// Add a row-major `zones x zones` matrix.
    pub fn with_matrix(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, LookupError> {
        self.insert_matrix(name, values)?;
        Ok(self)
    }

    pub fn insert_matrix(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), LookupError> {
        let name = name.into();
        let expected = self.zones.len() * self.zones.len();
        if values.len() != expected {
            return Err(LookupError::MatrixShape {
                name,
                expected,
                actual: values.len(),
            });
        }
        self.matrices.insert(name, values);
        Ok(())
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.matrices.contains_key(name)
    }

    fn matrix(&self, name: &str) -> Result<&[f64], LookupError> {
        self.matrices
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| LookupError::MissingSkim(name.to_string()))
    }

    /// Handle looking up `origin -> destination` per row.
    pub fn wrap(self: &Arc<Self>, origin: &str, destination: &str) -> SkimWrapper {
        SkimWrapper {
            skims: Arc::clone(self),
            origin: origin.to_string(),
            destination: destination.to_string(),
            period: None,
        }
    }

    /// Like [`SkimDict::wrap`], selecting the `<key>__<period>` slice with the
    /// period read per row from a text column.
    pub fn wrap_with_period(
        self: &Arc<Self>,
        origin: &str,
        destination: &str,
        period: &str,
    ) -> SkimWrapper {
        SkimWrapper {
            period: Some(period.to_string()),
            ..self.wrap(origin, destination)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkimWrapper {
    skims: Arc<SkimDict>,
    origin: String,
    destination: String,
    period: Option<String>,
}

impl SkimWrapper {
    fn zone_offsets(&self, rows: &TableView<'_>, column: &str) -> Result<Vec<usize>, LookupError> {
        let slice = rows
            .column(column)
            .ok_or_else(|| LookupError::MissingColumn(column.to_string()))?;
        let zones = slice
            .as_int()
            .ok_or_else(|| LookupError::ZoneColumnType(column.to_string()))?;
        zones
            .iter()
            .map(|zone| {
                self.skims
                    .zone_index
                    .get(zone)
                    .copied()
                    .ok_or_else(|| LookupError::UnknownZone {
                        column: column.to_string(),
                        zone: *zone,
                    })
            })
            .collect()
    }
}

impl LookupProvider for SkimWrapper {
    fn bind_rows<'a>(
        &'a self,
        rows: &TableView<'a>,
    ) -> Result<Box<dyn RowLookup + 'a>, LookupError> {
        let origins = self.zone_offsets(rows, &self.origin)?;
        let destinations = self.zone_offsets(rows, &self.destination)?;
        let periods = match &self.period {
            Some(column) => Some(
                rows.column(column)
                    .and_then(|slice| slice.as_text())
                    .ok_or_else(|| LookupError::MissingColumn(column.clone()))?,
            ),
            None => None,
        };
        Ok(Box::new(BoundSkim {
            skims: &self.skims,
            origins,
            destinations,
            periods,
        }))
    }
}

struct BoundSkim<'a> {
    skims: &'a SkimDict,
    origins: Vec<usize>,
    destinations: Vec<usize>,
    periods: Option<&'a [String]>,
}

impl RowLookup for BoundSkim<'_> {
    fn value(&self, key: &str) -> Result<Vec<f64>, LookupError> {
        let width = self.skims.zone_count();
        let cell = |row: usize| self.origins[row] * width + self.destinations[row];

        let Some(periods) = self.periods else {
            let matrix = self.skims.matrix(key)?;
            return Ok((0..self.origins.len()).map(|row| matrix[cell(row)]).collect());
        };

        let mut by_period: BTreeMap<&str, &[f64]> = BTreeMap::new();
        let mut values = Vec::with_capacity(self.origins.len());
        for (row, period) in periods.iter().enumerate() {
            let matrix = match by_period.get(period.as_str()) {
                Some(matrix) => *matrix,
                None => {
                    let matrix = self.skims.matrix(&format!("{key}__{period}"))?;
                    by_period.insert(period.as_str(), matrix);
                    matrix
                }
            };
            values.push(matrix[cell(row)]);
        }
        Ok(values)
    }
}
