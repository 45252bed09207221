//! Per-cell input table: one column of values per referenced map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorldgenError};

/// Per-cell values of every map the template references, one row per grid cell.
/// All columns share one spatial resolution, so every column has the same length
/// and row `i` of each column describes the same cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellTable {
    /// Cell width in map units (metres for projected rasters).
    pub cell_width: f64,
    /// Cell height in map units.
    pub cell_height: f64,
    pub columns: BTreeMap<String, Vec<f64>>,
}

impl CellTable {
    /// Create an empty table for cells of the given size.
    pub fn new(cell_width: f64, cell_height: f64) -> Self {
        Self {
            cell_width,
            cell_height,
            columns: BTreeMap::new(),
        }
    }

    /// Add or replace a column.
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Self {
        self.columns.insert(name.to_string(), values);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    /// Number of cells (rows).
    pub fn len(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Area of one grid cell.
    #[inline]
    pub fn cell_area(&self) -> f64 {
        self.cell_width * self.cell_height
    }

    /// Check that the table is non-empty and all columns have equal length.
    pub fn validate(&self) -> Result<()> {
        let expected = self.len();
        if expected == 0 {
            return Err(WorldgenError::EmptyCellTable);
        }
        for (name, values) in &self.columns {
            if values.len() != expected {
                return Err(WorldgenError::ColumnLength {
                    name: name.clone(),
                    expected,
                    found: values.len(),
                });
            }
        }
        Ok(())
    }

    /// Values of the named column, in cell order.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        let values = self
            .columns
            .get(name)
            .ok_or_else(|| WorldgenError::MissingColumn { name: name.to_string() })?;
        if values.len() != self.len() {
            return Err(WorldgenError::ColumnLength {
                name: name.to_string(),
                expected: self.len(),
                found: values.len(),
            });
        }
        Ok(values)
    }
}
