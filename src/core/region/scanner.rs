// src/core/region/scanner.rs

//! Forward row cursors over a region.

use super::{Region, RowResult, row_successor};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Selects which columns a scanner returns. An entry of the form
/// `family:qualifier` matches exactly; `family:` matches the whole family.
/// An empty selection matches every column.
#[derive(Debug, Clone, Default)]
pub struct ColumnFilter {
    matchers: Vec<String>,
}

impl ColumnFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn exact(column: &str) -> Self {
        Self {
            matchers: vec![column.to_string()],
        }
    }

    pub fn new(columns: &[String]) -> Self {
        Self {
            matchers: columns.to_vec(),
        }
    }

    pub fn matches(&self, column: &str) -> bool {
        if self.matchers.is_empty() {
            return true;
        }
        self.matchers.iter().any(|m| {
            if let Some(family) = m.strip_suffix(':') {
                column
                    .strip_prefix(family)
                    .is_some_and(|rest| rest.starts_with(':'))
            } else {
                m == column
            }
        })
    }
}

/// A row-level predicate applied while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanFilter {
    /// Stop (exclusively) once the scan reaches this row.
    StopRow(Bytes),
    /// Only return rows carrying this prefix; the scan ends at the first
    /// non-matching row.
    RowPrefix(Bytes),
}

impl ScanFilter {
    fn passes(&self, row: &Bytes) -> bool {
        match self {
            ScanFilter::StopRow(stop) => row < stop,
            ScanFilter::RowPrefix(prefix) => row.starts_with(prefix.as_ref()),
        }
    }
}

/// An open cursor over one region. Each call to [`RegionScanner::next`]
/// returns the next row at or after the cursor position with any live cell
/// matching the column selection.
pub struct RegionScanner {
    region: Arc<Region>,
    columns: ColumnFilter,
    timestamp: u64,
    filter: Option<ScanFilter>,
    /// `None` once the scan is exhausted.
    position: Option<Bytes>,
}

impl RegionScanner {
    pub fn new(
        region: Arc<Region>,
        columns: ColumnFilter,
        first_row: Bytes,
        timestamp: u64,
        filter: Option<ScanFilter>,
    ) -> Self {
        Self {
            region,
            columns,
            timestamp,
            filter,
            position: Some(first_row),
        }
    }

    pub fn region_name(&self) -> &str {
        self.region.name()
    }

    /// Advances the cursor and returns the next matching row, or `None` once
    /// the region (or the filter's range) is exhausted.
    pub fn next_row(&mut self) -> Option<RowResult> {
        let start = self.position.take()?;
        let result = self
            .region
            .next_row_at_or_after(&start, &self.columns, self.timestamp)?;
        if let Some(filter) = &self.filter
            && !filter.passes(&result.row)
        {
            return None;
        }
        self.position = Some(row_successor(&result.row));
        Some(result)
    }
}
