use flowgrid_engine::cell::CellValue;
use flowgrid_engine::color::{ColorFormatter, Rgb};
use flowgrid_engine::constraint::ConstraintRow;
use flowgrid_engine::sheet::{ClusterData, CUID_COLUMN};

use crate::util;

/// Columns that get a value-derived background.
const COLORED_COLUMNS: [&str; 4] = ["VIEW", "SHORTLIMIT", "PREV", "RECENT_DELTA"];

fn is_colored(column: &str) -> bool {
    let upper = column.to_ascii_uppercase();
    COLORED_COLUMNS.contains(&upper.as_str()) || upper.starts_with("LODF")
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellView {
    pub text: String,
    pub numeric: bool,
    pub bg: Option<Rgb>,
    pub bold: bool,
}

/// One cluster, display-ready.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    pub cluster_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellView>>,
    /// Absolute sheet row of each displayed row.
    pub sheet_rows: Vec<usize>,
    /// Display widths, clamped to [3, 16]
    pub col_widths: Vec<usize>,
}

impl ClusterView {
    pub fn build(cluster_id: &str, data: &ClusterData, formatter: &ColorFormatter) -> Self {
        let flow_col = data.column_index("FLOW");
        let rows: Vec<Vec<CellView>> = data
            .rows
            .iter()
            .map(|row| {
                let typed = ConstraintRow::from_row(&data.columns, &row.values);
                let bold_flow = typed
                    .as_ref()
                    .and_then(|t| Some(formatter.should_bold_flow(t.flow?, t.max_hist?)))
                    .unwrap_or(false);
                data.columns
                    .iter()
                    .zip(&row.values)
                    .enumerate()
                    .map(|(c, (column, value))| {
                        let bg = if column.eq_ignore_ascii_case(CUID_COLUMN) {
                            typed.as_ref().map(|t| formatter.constraint_color(t))
                        } else if is_colored(column) {
                            Some(formatter.column_color(column, value))
                        } else {
                            None
                        };
                        CellView {
                            text: value.display(),
                            numeric: matches!(value, CellValue::Number(_)),
                            bg,
                            bold: bold_flow && Some(c) == flow_col,
                        }
                    })
                    .collect()
            })
            .collect();

        let col_widths = data
            .columns
            .iter()
            .enumerate()
            .map(|(c, name)| {
                let widest = rows
                    .iter()
                    .filter_map(|r| r.get(c))
                    .map(|cell| util::display_width(&cell.text))
                    .max()
                    .unwrap_or(0);
                util::display_width(name).max(widest).clamp(3, 16)
            })
            .collect();

        Self {
            cluster_id: cluster_id.to_string(),
            columns: data.columns.clone(),
            sheet_rows: data.rows.iter().map(|r| r.index).collect(),
            rows,
            col_widths,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&CellView> {
        self.rows.get(row).and_then(|r| r.get(col))
    }
}
