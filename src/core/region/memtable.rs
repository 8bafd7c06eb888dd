// src/core/region/memtable.rs

//! The in-memory sorted write buffer of a region.
//!
//! Cells are ordered by (row ascending, column ascending, timestamp
//! descending) so that a forward range scan visits the newest version of a
//! cell first. Deletions are ordinary cells carrying a tombstone value: a
//! tombstone at timestamp `T` masks every put at or below `T` for its column.

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Fixed per-cell bookkeeping overhead used by the size accounting.
const CELL_OVERHEAD: usize = 48;

/// Identifies one version of one column of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellKey {
    pub row: Bytes,
    /// Column name in `family:qualifier` form.
    pub column: String,
    pub timestamp: u64,
}

impl CellKey {
    pub fn new(row: Bytes, column: impl Into<String>, timestamp: u64) -> Self {
        Self {
            row,
            column: column.into(),
            timestamp,
        }
    }

    /// The smallest key belonging to `row` under this ordering.
    pub fn first_for_row(row: Bytes) -> Self {
        Self {
            row,
            column: String::new(),
            timestamp: u64::MAX,
        }
    }

    /// The family part of the column name, without the separator.
    pub fn family(&self) -> &str {
        self.column.split(':').next().unwrap_or("")
    }
}

impl Ord for CellKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.column.cmp(&other.column))
            // Newest version first within a column.
            .then_with(|| other.timestamp.cmp(&self.timestamp))
    }
}

impl PartialOrd for CellKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The payload of a cell: a value, or a tombstone masking older values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Put(Bytes),
    Delete,
}

impl CellValue {
    pub fn is_delete(&self) -> bool {
        matches!(self, CellValue::Delete)
    }

    fn byte_len(&self) -> usize {
        match self {
            CellValue::Put(v) => v.len(),
            CellValue::Delete => 0,
        }
    }
}

/// The smallest row key strictly greater than `row`.
pub fn row_successor(row: &[u8]) -> Bytes {
    let mut next = Vec::with_capacity(row.len() + 1);
    next.extend_from_slice(row);
    next.push(0);
    Bytes::from(next)
}

/// An ordered cell map with live byte-size accounting.
#[derive(Debug, Default)]
pub struct Memtable {
    cells: BTreeMap<CellKey, CellValue>,
    size: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a cell, replacing any existing version at the same key.
    pub fn insert(&mut self, key: CellKey, value: CellValue) {
        let key_len = key.row.len() + key.column.len() + CELL_OVERHEAD;
        let value_len = value.byte_len();
        match self.cells.insert(key, value) {
            Some(old) => {
                self.size = self.size.saturating_sub(old.byte_len());
                self.size += value_len;
            }
            None => self.size += key_len + value_len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Approximate live bytes held by this memtable.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cells(&self) -> &BTreeMap<CellKey, CellValue> {
        &self.cells
    }

    /// Takes the full contents, leaving this memtable empty.
    pub fn take(&mut self) -> Memtable {
        Memtable {
            cells: std::mem::take(&mut self.cells),
            size: std::mem::replace(&mut self.size, 0),
        }
    }

    /// Iterates all cells of one row.
    pub fn row_range(
        &self,
        row: &Bytes,
    ) -> impl Iterator<Item = (&CellKey, &CellValue)> {
        let lower = CellKey::first_for_row(row.clone());
        let upper = CellKey::first_for_row(row_successor(row));
        self.cells
            .range((Bound::Included(lower), Bound::Excluded(upper)))
    }

    /// The smallest row key at or after `start`, if any.
    pub fn next_row_at_or_after(&self, start: &Bytes) -> Option<Bytes> {
        let lower = CellKey::first_for_row(start.clone());
        self.cells
            .range((Bound::Included(lower), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.row.clone())
    }

    /// The largest row key at or before `row`, if any.
    pub fn prev_row_at_or_before(&self, row: &Bytes) -> Option<Bytes> {
        let upper = CellKey::first_for_row(row_successor(row));
        self.cells
            .range((Bound::Unbounded, Bound::Excluded(upper)))
            .next_back()
            .map(|(k, _)| k.row.clone())
    }
}
