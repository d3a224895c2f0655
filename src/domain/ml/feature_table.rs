use crate::domain::errors::{MlError, MlResult};
use chrono::NaiveDateTime;
use std::collections::HashSet;

/// Name of the column used to derive direction labels.
pub const CLOSE_COLUMN: &str = "close";

/// Date-indexed table of technical indicator values.
///
/// Rows are ordered by a strictly increasing date index and every cell is a finite
/// number. The table must carry a `close` column, which drives label derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    index: Vec<NaiveDateTime>,
    rows: Vec<Vec<f64>>,
    close_idx: usize,
}

impl FeatureTable {
    pub fn new(
        columns: Vec<String>,
        index: Vec<NaiveDateTime>,
        rows: Vec<Vec<f64>>,
    ) -> MlResult<Self> {
        if columns.is_empty() {
            return Err(MlError::invalid_table("table has no columns"));
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for name in &columns {
            if name.trim().is_empty() {
                return Err(MlError::invalid_table("empty column name"));
            }
            if !seen.insert(name.as_str()) {
                return Err(MlError::invalid_table(format!(
                    "duplicate column '{}'",
                    name
                )));
            }
        }

        let close_idx = columns
            .iter()
            .position(|c| c == CLOSE_COLUMN)
            .ok_or_else(|| MlError::invalid_table("missing 'close' column"))?;

        if index.len() != rows.len() {
            return Err(MlError::shape(format!(
                "{} index entries for {} rows",
                index.len(),
                rows.len()
            )));
        }

        for (i, pair) in index.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(MlError::invalid_table(format!(
                    "date index not strictly increasing at row {} ({} after {})",
                    i + 1,
                    pair[1],
                    pair[0]
                )));
            }
        }

        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(MlError::shape(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
            if let Some(j) = row.iter().position(|v| !v.is_finite()) {
                return Err(MlError::invalid_table(format!(
                    "non-numeric value in row {} column '{}'",
                    i, columns[j]
                )));
            }
        }

        Ok(Self {
            columns,
            index,
            rows,
            close_idx,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn row(&self, i: usize) -> Option<&[f64]> {
        self.rows.get(i).map(Vec::as_slice)
    }

    pub fn close(&self, i: usize) -> Option<f64> {
        self.rows.get(i).map(|row| row[self.close_idx])
    }

    /// Most recent `n` rows (the whole table when it is shorter).
    pub fn tail(&self, n: usize) -> FeatureTable {
        let start = self.rows.len().saturating_sub(n);
        self.slice_unchecked(start, self.rows.len())
    }

    /// Rows `[start, end)`, or `None` when the range is out of bounds.
    pub fn slice(&self, start: usize, end: usize) -> Option<FeatureTable> {
        (start <= end && end <= self.rows.len()).then(|| self.slice_unchecked(start, end))
    }

    fn slice_unchecked(&self, start: usize, end: usize) -> FeatureTable {
        FeatureTable {
            columns: self.columns.clone(),
            index: self.index[start..end].to_vec(),
            rows: self.rows[start..end].to_vec(),
            close_idx: self.close_idx,
        }
    }

    /// Close of row `i`; callers guarantee `i < len()`.
    pub(crate) fn close_at(&self, i: usize) -> f64 {
        self.rows[i][self.close_idx]
    }

    /// Row-major copy of rows `[start, start + len)`.
    pub(crate) fn flatten_rows(&self, start: usize, len: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(len * self.columns.len());
        for row in &self.rows[start..start + len] {
            out.extend_from_slice(row);
        }
        out
    }
}
