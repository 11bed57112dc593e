//! Typed view of a constraint row, for colouring and summaries.

use crate::cell::CellValue;
use crate::sheet::{ConstraintTable, CLUSTER_COLUMN, CUID_COLUMN};

/// Flow at or above this share of the limit marks a constraint as binding.
pub const BINDING_RATIO: f64 = 0.95;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintRow {
    pub cluster: String,
    pub cuid: String,
    pub view: f64,
    pub shortlimit: Option<f64>,
    pub prev: Option<f64>,
    pub flow: Option<f64>,
    pub limit: Option<f64>,
    pub max_hist: Option<f64>,
    pub recent_delta: Option<f64>,
    pub mon: String,
    pub cont: String,
}

impl ConstraintRow {
    /// Build from one table row. `None` when VIEW is missing or not numeric.
    pub fn from_row(columns: &[String], values: &[CellValue]) -> Option<Self> {
        let cell = |name: &str| {
            columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .and_then(|i| values.get(i))
        };
        let number = |name: &str| cell(name).and_then(CellValue::to_number_lossy);
        let text = |name: &str| cell(name).map(CellValue::display).unwrap_or_default();

        Some(Self {
            cluster: text(CLUSTER_COLUMN),
            cuid: text(CUID_COLUMN),
            view: number("VIEW")?,
            shortlimit: number("SHORTLIMIT"),
            prev: number("PREV"),
            flow: number("FLOW"),
            limit: number("LIMIT"),
            max_hist: number("MAXHIST"),
            recent_delta: number("RECENT_DELTA"),
            mon: text("MON"),
            cont: text("CONT"),
        })
    }

    /// All typed rows of `table` at `indices`, skipping rows without a VIEW.
    pub fn collect(table: &ConstraintTable, indices: &[usize]) -> Vec<Self> {
        indices
            .iter()
            .filter_map(|&i| table.rows().get(i))
            .filter_map(|values| Self::from_row(table.columns(), values))
            .collect()
    }

    /// flow / limit, when both are known and the limit is non-zero.
    pub fn utilization(&self) -> Option<f64> {
        match (self.flow, self.limit) {
            (Some(flow), Some(limit)) if limit != 0.0 => Some(flow / limit),
            _ => None,
        }
    }

    pub fn is_binding(&self) -> bool {
        match (self.flow, self.limit) {
            (Some(flow), Some(limit)) if limit != 0.0 => flow >= BINDING_RATIO * limit,
            _ => false,
        }
    }
}

/// Summary of one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterInfo {
    pub cluster_id: String,
    pub constraint_count: usize,
    pub cuids: Vec<String>,
    pub monitor: Option<String>,
    pub contingency: Option<String>,
}

impl ClusterInfo {
    pub(crate) fn build(cluster_id: String, table: &ConstraintTable, indices: &[usize]) -> Self {
        let text_at = |row: usize, name: &str| {
            table
                .column_index(name)
                .and_then(|c| table.get(row, c))
                .filter(|v| !v.is_empty())
                .map(CellValue::display)
        };
        let first = indices.first().copied();
        Self {
            constraint_count: indices.len(),
            cuids: indices.iter().filter_map(|&i| text_at(i, CUID_COLUMN)).collect(),
            monitor: first.and_then(|i| text_at(i, "MON")),
            contingency: first.and_then(|i| text_at(i, "CONT")),
            cluster_id,
        }
    }
}

impl std::fmt::Display for ClusterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cluster {} ({} constraints)", self.cluster_id, self.constraint_count)
    }
}
