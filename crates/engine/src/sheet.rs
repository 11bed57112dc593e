use serde::{Deserialize, Serialize};

use super::cell::{format_number, CellValue};

pub const CLUSTER_COLUMN: &str = "CLUSTER";
pub const CUID_COLUMN: &str = "CUID";

/// Columns every constraint sheet is expected to carry.
pub const REQUIRED_COLUMNS: [&str; 3] = [CLUSTER_COLUMN, CUID_COLUMN, "VIEW"];

/// How a caller-supplied cluster argument is matched against `CLUSTER` cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClusterKey {
    Int(i64),
    Text(String),
}

impl ClusterKey {
    /// Integer if the trimmed input parses as one, otherwise text.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed.parse::<i64>() {
            Ok(n) => ClusterKey::Int(n),
            Err(_) => ClusterKey::Text(trimmed.to_string()),
        }
    }

    pub fn matches(&self, cell: &CellValue) -> bool {
        match (self, cell) {
            (ClusterKey::Int(n), CellValue::Number(v)) => *v == *n as f64,
            (ClusterKey::Int(n), CellValue::Text(s)) => s.trim().parse::<i64>().ok() == Some(*n),
            (ClusterKey::Text(key), cell) => !cell.is_empty() && cell.display() == *key,
            (ClusterKey::Int(_), CellValue::Empty) => false,
        }
    }
}

impl std::fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterKey::Int(n) => write!(f, "{}", n),
            ClusterKey::Text(s) => f.write_str(s),
        }
    }
}

/// One sheet's worth of constraint rows.
///
/// Rows are stored in load order; that order is never changed, so
/// filtering by cluster yields each cluster's rows in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintTable {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl ConstraintTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Build a table from headers and rows. Short rows are padded with
    /// `Empty`, long rows truncated to the header width.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.columns.len(), CellValue::Empty);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column position: exact name first, then ASCII case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Overwrite a cell, returning the previous value. `None` if the
    /// coordinates are outside the table.
    pub fn set(&mut self, row: usize, col: usize, value: CellValue) -> Option<CellValue> {
        let cell = self.rows.get_mut(row)?.get_mut(col)?;
        Some(std::mem::replace(cell, value))
    }

    /// Absolute row indices belonging to `key`, in original order.
    /// Empty when the sheet has no `CLUSTER` column.
    pub fn cluster_rows(&self, key: &ClusterKey) -> Vec<usize> {
        let Some(col) = self.column_index(CLUSTER_COLUMN) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| key.matches(&row[col]))
            .map(|(i, _)| i)
            .collect()
    }

    /// Distinct non-blank cluster ids, stringified, in first-appearance order.
    pub fn cluster_ids(&self) -> Vec<String> {
        let Some(col) = self.column_index(CLUSTER_COLUMN) else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for row in &self.rows {
            let cell = &row[col];
            if cell.is_empty() {
                continue;
            }
            let id = match cell {
                CellValue::Number(n) => format_number(*n),
                other => other.display(),
            };
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
        ids
    }

    /// Required columns absent from this table.
    pub fn missing_required_columns(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !self.has_column(c))
            .collect()
    }
}

/// A copied row handed out to readers, tagged with its absolute index.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub index: usize,
    pub values: Vec<CellValue>,
}

/// Result of a cluster read: a projection of the active table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterData {
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl ClusterData {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    /// Cell at (position within cluster, column name).
    pub fn value(&self, constraint_index: usize, column: &str) -> Option<&CellValue> {
        let col = self.column_index(column)?;
        self.rows.get(constraint_index).and_then(|r| r.values.get(col))
    }

    /// Project `table`'s `indices` rows onto `columns` (all when `None`).
    /// Unknown requested columns are dropped; if none remain the result
    /// is empty.
    pub(crate) fn project(table: &ConstraintTable, indices: &[usize], columns: Option<&[&str]>) -> Self {
        let selected: Vec<usize> = match columns {
            None => (0..table.columns().len()).collect(),
            Some(names) => names.iter().filter_map(|n| table.column_index(n)).collect(),
        };
        if selected.is_empty() {
            return Self::default();
        }
        let rows = indices
            .iter()
            .filter_map(|&i| {
                let row = table.rows().get(i)?;
                Some(TableRow {
                    index: i,
                    values: selected.iter().map(|&c| row[c].clone()).collect(),
                })
            })
            .collect();
        Self {
            columns: selected.iter().map(|&c| table.columns()[c].clone()).collect(),
            rows,
        }
    }
}
